//! Shared sync protocol types (§3.6, §6.3): progress cursors, wire
//! message types, and session/connection lifecycle states. The actual
//! state machines live in `connection.rs`/`session.rs`; this module
//! holds the vocabulary both share.

pub mod backoff;
pub mod connection;
pub mod runtime;
pub mod session;

/// The client's view of how far it has uploaded, per §6.3's invariant
/// that both fields only move forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub client_version: u64,
    pub last_integrated_server_version: u64,
}

/// The server's view of how far a client has downloaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DownloadCursor {
    pub server_version: u64,
    pub last_integrated_client_version: u64,
}

/// Wire message types (§6.3); the crate implements their encode/decode
/// and session-level invariants, not the WebSocket framing bytes
/// themselves (that boundary is `sync/runtime.rs`'s job, layered over
/// `tokio_tungstenite` and outside this module).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Bind,
    Refresh,
    Ident,
    Upload,
    Download,
    Mark,
    Alloc,
    Unbind,
    StateRequest,
    State,
    ClientVersionRequest,
    ClientVersion,
    Error,
    Ping,
    Pong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unactivated,
    Active,
    Deactivating,
    Deactivated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Categorized connect/session failure, driving the reconnect back-off
/// category selection in `backoff.rs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionTerminationReason {
    OperationFailed,
    HttpResponseSaysNonfatal,
    SyncConnectTimeout,
    HttpTunnelFailed,
    SslServerCertRejected,
    WebsocketProtocolViolation,
    SyncProtocolViolation,
    HttpResponseSaysFatal,
    MissingFeature,
    PongTimeout,
    ServerSaysTryAgainLater,
}
