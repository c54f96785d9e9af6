//! The one module in this crate that touches a real socket (§4.8's
//! redesign note: everything else about sync is a synchronous state
//! machine so it can be driven by tests without a runtime). This is a
//! thin tokio_tungstenite loop: it keeps `Connection`'s watchdogs fed
//! from wall-clock time and hands inbound frames to a caller-supplied
//! handler, rather than owning message decoding itself.

use super::connection::Connection;
use super::ConnectionTerminationReason;
use crate::error::SyncProtocolError;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

/// Callback invoked for every inbound binary frame (a `Mark`/`Upload`/
/// `Download`/... message per §6.3); the connection loop only owns
/// transport plumbing, not protocol semantics.
pub trait FrameHandler {
    fn on_frame(&mut self, bytes: &[u8]);
}

/// Connects to `url` and drives `conn`'s PING/PONG watchdogs and
/// reconnect back-off until the socket closes or a fatal protocol
/// violation is reported by `handler`. Returns the termination reason
/// so the caller can decide whether and how soon to call this again.
pub async fn run_connection_loop(
    url: &str,
    conn: &mut Connection,
    handler: &mut impl FrameHandler,
) -> Result<ConnectionTerminationReason, SyncProtocolError> {
    let mut rng = StdRng::from_entropy();
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| SyncProtocolError::HttpTunnelFailed(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    conn.on_connected(Instant::now());
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    let mut last_ping_sent: Option<u64> = None;

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Binary(bytes))) => handler.on_frame(&bytes),
                    Some(Ok(Message::Pong(payload))) => {
                        let echoed = decode_ping_payload(&payload);
                        let sent = last_ping_sent.unwrap_or(echoed);
                        if !conn.on_pong_received(echoed, sent) {
                            return Ok(ConnectionTerminationReason::SyncProtocolViolation);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(ConnectionTerminationReason::OperationFailed);
                    }
                    Some(Err(_)) => {
                        return Ok(ConnectionTerminationReason::WebsocketProtocolViolation);
                    }
                    _ => {}
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                if conn.pong_timed_out(now) {
                    return Ok(ConnectionTerminationReason::PongTimeout);
                }
                if conn.ping_due(now) {
                    let nonce = rng.gen::<u64>();
                    last_ping_sent = Some(nonce);
                    if sink.send(Message::Ping(nonce.to_le_bytes().to_vec())).await.is_err() {
                        return Ok(ConnectionTerminationReason::OperationFailed);
                    }
                    conn.on_ping_sent(now, &mut rng);
                }
            }
        }
    }
}

fn decode_ping_payload(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}
