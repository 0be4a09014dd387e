//! Server configuration as consumed by the core. Assembled from CLI flags
//! in `main`.

use std::path::PathBuf;

/// Default lobby port; rooms occupy the contiguous range above it.
pub const DEFAULT_BASE_PORT: u16 = 45000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public server name, echoed in LAN discovery replies.
    pub server_name: String,
    /// Lobby WebSocket port. Room ports are `base_port+1..=base_port+max_games`.
    pub base_port: u16,
    /// Maximum concurrent rooms, which is also the size of the port range.
    pub max_games: u16,
    /// Message of the day returned by `request_motd`.
    pub motd: String,
    /// Require the time-bounded shared-secret digest on `create_room` and
    /// `get_rooms`.
    pub enable_auth: bool,
    /// Suppress the LAN discovery responder.
    pub disable_broadcast: bool,
    /// Mirror logs into this directory when set.
    pub log_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "local".to_string(),
            base_port: DEFAULT_BASE_PORT,
            max_games: 10,
            motd: "MPN Beta".to_string(),
            enable_auth: false,
            disable_broadcast: false,
            log_path: None,
        }
    }
}

impl ServerConfig {
    /// Server build string sent in `reply_version`.
    #[must_use]
    pub fn build_string() -> String {
        format!("MPN-{}", env!("CARGO_PKG_VERSION"))
    }
}
