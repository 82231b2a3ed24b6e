use std::path::PathBuf;
use std::time::Duration;

use crate::notification::ntfy::DEFAULT_BASE_URL;

pub const BOOTSTRAP_FILE: &str = "approval-daemon.json";
pub const SOCKET_FILE: &str = "approval.sock";

#[derive(Debug, Clone)]
pub struct Config {
    /// Holds the bootstrap config and, by default, the IPC socket.
    /// Set via APPROVAL_CONFIG_DIR. Default: `<user config dir>/gmail-mcp`.
    pub config_dir: PathBuf,
    /// Set via APPROVAL_SOCKET_PATH. Default: `<config_dir>/approval.sock`.
    pub socket_path: PathBuf,
    pub ntfy_base_url: String,
    /// Bearer token for brokers that require authentication.
    pub ntfy_token: Option<String>,
    /// Dashboard port on 127.0.0.1. 0 disables the dashboard.
    pub dashboard_port: u16,
    pub poll_interval: Duration,
}

impl Config {
    pub fn bootstrap_path(&self) -> PathBuf {
        self.config_dir.join(BOOTSTRAP_FILE)
    }

    pub fn dashboard_enabled(&self) -> bool {
        self.dashboard_port != 0
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable source.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let config_dir = match lookup("APPROVAL_CONFIG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| {
                anyhow::anyhow!("cannot locate a config directory; set APPROVAL_CONFIG_DIR")
            })?
            .join("gmail-mcp"),
    };

    let socket_path = lookup("APPROVAL_SOCKET_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir.join(SOCKET_FILE));

    Ok(Config {
        socket_path,
        ntfy_base_url: lookup("NTFY_BASE_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        ntfy_token: lookup("NTFY_TOKEN").filter(|s| !s.trim().is_empty()),
        dashboard_port: lookup("APPROVAL_DASHBOARD_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8787),
        poll_interval: Duration::from_millis(
            lookup("APPROVAL_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(1000),
        ),
        config_dir,
    })
}
