//! Error taxonomy (five disjoint groups).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file access denied: {0}")]
    FileAccessDenied(String),
    #[error("file too large to grow by {requested} bytes")]
    FileTooLarge { requested: u64 },
    #[error("file format version {found} unsupported (max {max})")]
    FileFormatUnsupported { found: u32, max: u32 },
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("another writer already holds the write lock")]
    BusyWriter,
    #[error("accessor refers to a version that has been superseded")]
    VersionInvalidated,
    #[error("index {index} out of bounds (size {size})")]
    IndexOutOfBounds { index: usize, size: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid column key: {0}")]
    InvalidColumnKey(String),
    #[error("invalid primary key: {0}")]
    InvalidPrimaryKey(String),
    #[error("embedded object cycle detected at {0}")]
    EmbeddedObjectCycle(String),
}

#[derive(Error, Debug)]
pub enum ChangesetError {
    #[error("malformed changeset: {0}")]
    BadChangeset(String),
    #[error("transform conflict could not be resolved: {0}")]
    TransformError(String),
    #[error("changeset carries origin file ident {found}, expected {expected}")]
    BadOriginFileIdent { found: u64, expected: u64 },
}

#[derive(Error, Debug)]
pub enum SyncProtocolError {
    #[error("message arrived out of order: {0}")]
    BadMessageOrder(String),
    #[error("unknown session ident {0}")]
    BadSessionIdent(u64),
    #[error("bad client file ident {0}")]
    BadClientFileIdent(u64),
    #[error("bad client file ident salt for ident {0}")]
    BadClientFileIdentSalt(u64),
    #[error("bad server version {0}")]
    BadServerVersion(u64),
    #[error("bad server version salt")]
    BadServerVersionSalt,
    #[error("progress cursors regressed: {0}")]
    BadProgress(String),
    #[error("bad compression flag")]
    BadCompression,
    #[error("bad error code {0}")]
    BadErrorCode(u32),
    #[error("bad request ident {0}")]
    BadRequestIdent(u64),
    #[error("bad STATE message: {0}")]
    BadStateMessage(String),
    #[error("client protocol version {client} is older than the server's minimum {min}")]
    ClientTooOld { client: u32, min: u32 },
    #[error("client protocol version {client} is newer than the server's maximum {max}")]
    ClientTooNew { client: u32, max: u32 },
    #[error("no protocol version in common (client offered down to {client_min}, server requires {server_min})")]
    ProtocolMismatch { client_min: u32, server_min: u32 },
    #[error("missing feature: {0}")]
    MissingFeature(String),
    #[error("SSL server certificate rejected")]
    SSLServerCertRejected,
    #[error("HTTP CONNECT tunnel failed: {0}")]
    HttpTunnelFailed(String),
    #[error("PONG watchdog timed out")]
    PongTimeout,
    #[error("connect attempt timed out")]
    ConnectTimeout,
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("client file has expired")]
    ClientFileExpired,
    #[error("bad client file ident")]
    BadClientFileIdent,
    #[error("bad client file ident salt")]
    BadClientFileIdentSalt,
    #[error("bad download server version")]
    BadDownloadServerVersion,
    #[error("bad download client version")]
    BadDownloadClientVersion,
    #[error("bad server version")]
    BadServerVersion,
    #[error("bad server version salt")]
    BadServerVersionSalt,
    #[error("bad client type")]
    BadClientType,
    #[error("client file has expired")]
    ClientFileExpiredStrict,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("changeset: {0}")]
    Changeset(#[from] ChangesetError),
    #[error("sync protocol: {0}")]
    SyncProtocol(#[from] SyncProtocolError),
    #[error("bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),
}

pub type CoreResult<T> = Result<T, CoreError>;
