//! Shared sync-history data model (§3.5): the append-only log of
//! accepted changesets plus the per-peer bookkeeping needed to decide
//! what each peer still needs to download and when a peer's reciprocal
//! history can be discarded.

pub mod client;
pub mod converter;
pub mod server;

use crate::changeset::Changeset;

/// One entry in `sync_history`. `cumulative_byte_size` is the running
/// total through this entry, letting `fetch_download_info` bound a
/// response by byte size without re-summing from scratch each call.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub salt: u64,
    pub origin_file_ident: u64,
    pub client_version: u64,
    pub timestamp: u64,
    pub changeset: Changeset,
    pub cumulative_byte_size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientType {
    SelfPeer,
    Upstream,
    Indirect,
    Regular,
    Subserver,
    Legacy,
}

/// One `client_files` row. Index 0 is a sentinel and index 1 is the
/// root-node self entry, per §3.5's invariant; both live in the same
/// `Vec` as every other peer to keep indices stable as identifiers.
#[derive(Clone, Debug)]
pub struct ClientFile {
    pub ident_salt: u64,
    pub last_client_version_integrated: u64,
    pub reciprocal_history_base_version: u64,
    pub reciprocal_history: Vec<HistoryEntry>,
    pub proxy_file: bool,
    pub client_type: ClientType,
    pub last_seen_timestamp: u64,
    pub locked_server_version: u64,
}

impl ClientFile {
    pub fn new(ident_salt: u64, client_type: ClientType) -> ClientFile {
        ClientFile {
            ident_salt,
            last_client_version_integrated: 0,
            reciprocal_history_base_version: 0,
            reciprocal_history: Vec::new(),
            proxy_file: false,
            client_type,
            last_seen_timestamp: 0,
            locked_server_version: 0,
        }
    }

    /// An expired peer per §3.5: its reciprocal history must already
    /// have been discarded.
    pub fn is_expired(&self) -> bool {
        self.last_seen_timestamp == 0
    }
}

/// The append-only shared history plus every peer's bookkeeping row.
/// `history_base_version` is the server version at `sync_history[0]`;
/// entries before it have already been compacted away.
#[derive(Clone, Debug, Default)]
pub struct HistoryState {
    pub history_base_version: u64,
    pub sync_history: Vec<HistoryEntry>,
    pub client_files: Vec<ClientFile>,
    pub compacted_until_version: u64,
    pub last_compaction_timestamp: u64,
}

impl HistoryState {
    pub fn new() -> HistoryState {
        let mut s = HistoryState::default();
        // index 0: sentinel, index 1: root-node self entry.
        s.client_files.push(ClientFile::new(0, ClientType::SelfPeer));
        s.client_files.push(ClientFile::new(0, ClientType::SelfPeer));
        s
    }

    /// The server version one past the last entry in `sync_history`.
    pub fn latest_version(&self) -> u64 {
        self.history_base_version + self.sync_history.len() as u64
    }
}
