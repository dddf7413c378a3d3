//! Gateway configuration.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// TCP endpoint for FIX clients.
    pub listen_addr: String,
    /// Our CompID (tag 49 on outbound, expected tag 56 on inbound).
    pub comp_id: String,
    /// Heartbeat interval when the client's Logon does not carry tag 108.
    pub default_heartbeat_secs: u64,
    /// Cancel a session's resting orders when its socket goes away.
    pub cancel_on_disconnect: bool,
    /// Journal directory; `None` keeps everything in memory.
    pub journal_dir: Option<PathBuf>,
    /// Bound on a single socket write.
    pub write_timeout: Duration,
    /// Event-bus channel capacity; laggards beyond this lose events.
    pub bus_capacity: usize,
    /// Executions included in the snapshot sent to new subscribers.
    pub snapshot_executions: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9878".to_string(),
            comp_id: "EXCHANGE".to_string(),
            default_heartbeat_secs: 30,
            cancel_on_disconnect: false,
            journal_dir: None,
            write_timeout: Duration::from_secs(5),
            bus_capacity: 1024,
            snapshot_executions: 20,
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `EXCHANGE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("EXCHANGE_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(comp_id) = std::env::var("EXCHANGE_COMP_ID") {
            config.comp_id = comp_id;
        }
        if let Ok(secs) = std::env::var("EXCHANGE_HEARTBEAT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.default_heartbeat_secs = secs;
            }
        }
        if let Ok(flag) = std::env::var("EXCHANGE_CANCEL_ON_DISCONNECT") {
            config.cancel_on_disconnect = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(dir) = std::env::var("EXCHANGE_JOURNAL_DIR") {
            if !dir.is_empty() {
                config.journal_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }
}
