//! User-facing configuration (§6.4): plain serde structs with defaults
//! matching the named defaults, so a host application can load these
//! from TOML/JSON or build them programmatically.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    Normal,
    Testing,
}

impl Default for ReconnectMode {
    fn default() -> ReconnectMode {
        ReconnectMode::Normal
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Http,
    Socks5,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub reconnect_mode: ReconnectMode,
    pub connect_timeout_ms: u64,
    pub connection_linger_time_ms: u64,
    pub ping_keepalive_period_ms: u64,
    pub pong_keepalive_timeout_ms: u64,
    pub fast_reconnect_limit_ms: u64,
    pub disable_upload_activation_delay: bool,
    pub disable_upload_compaction: bool,
    pub dry_run: bool,
    pub tcp_no_delay: bool,
    pub enable_default_port_hack: bool,
    pub proxy: Option<ProxyConfig>,
    pub ssl_trust_cert_path: Option<String>,
    pub user_agent: String,
}

impl Default for ConnectionConfig {
    fn default() -> ConnectionConfig {
        ConnectionConfig {
            reconnect_mode: ReconnectMode::Normal,
            connect_timeout_ms: 120_000,
            connection_linger_time_ms: 30_000,
            ping_keepalive_period_ms: 60_000,
            pong_keepalive_timeout_ms: 120_000,
            fast_reconnect_limit_ms: 60_000,
            disable_upload_activation_delay: false,
            disable_upload_compaction: false,
            dry_run: false,
            tcp_no_delay: false,
            enable_default_port_hack: false,
            proxy: None,
            ssl_trust_cert_path: None,
            user_agent: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerHistoryConfig {
    pub history_ttl_seconds: u64,
    pub history_compaction_interval_seconds: u64,
    pub disable_history_compaction: bool,
    pub history_compaction_ignore_clients: bool,
}

impl Default for ServerHistoryConfig {
    fn default() -> ServerHistoryConfig {
        ServerHistoryConfig {
            history_ttl_seconds: 30 * 24 * 60 * 60,
            history_compaction_interval_seconds: 60 * 60,
            disable_history_compaction: false,
            history_compaction_ignore_clients: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_default_matches_named_defaults() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.ping_keepalive_period_ms, 60_000);
        assert_eq!(cfg.reconnect_mode, ReconnectMode::Normal);
    }

    #[test]
    fn server_history_config_default_matches_named_defaults() {
        let cfg = ServerHistoryConfig::default();
        assert_eq!(cfg.history_ttl_seconds, 30 * 24 * 60 * 60);
        assert!(!cfg.disable_history_compaction);
    }
}
