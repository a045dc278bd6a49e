//! User-visible status derivation
//!
//! Pure derivation over a controller snapshot, the link report and the
//! server directory. The reporter owns no state of its own and never
//! fabricates a value: when the transport reported nothing, the sentinel
//! is shown instead.

use crate::controller::{ConnectionState, VpnController};
use crate::directory::ServerDirectory;
use std::sync::Arc;
use std::time::SystemTime;

/// Sentinel shown when no address was reported
pub const UNKNOWN_IP: &str = "unknown";

/// One coherent view of the connection for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub public_ip: String,
    pub latency_ms: Option<u32>,
    /// Formatted uptime, `None` while disconnected
    pub uptime: Option<String>,
}

/// Derives user-visible metrics from controller state
pub struct StatusReporter {
    controller: Arc<VpnController>,
    directory: Arc<ServerDirectory>,
}

impl StatusReporter {
    pub fn new(controller: Arc<VpnController>, directory: Arc<ServerDirectory>) -> Self {
        Self {
            controller,
            directory,
        }
    }

    /// Public address reported by the transport, or the unknown sentinel
    pub fn public_ip(&self) -> String {
        if !self.controller.current_state().is_connected() {
            return UNKNOWN_IP.to_string();
        }

        self.controller
            .link_report()
            .and_then(|r| r.public_ip)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }

    /// Measured link latency, falling back to the connected server's last
    /// observation; `None` while disconnected
    pub fn latency_ms(&self) -> Option<u32> {
        let state = self.controller.current_state();
        if !state.is_connected() {
            return None;
        }

        self.controller
            .link_report()
            .and_then(|r| r.latency_ms)
            .or_else(|| {
                state
                    .server_id()
                    .and_then(|id| self.directory.get(id).ok())
                    .and_then(|s| s.last_latency_ms)
            })
    }

    /// Formatted uptime as of `now`, `None` while disconnected
    pub fn uptime_at(&self, now: SystemTime) -> Option<String> {
        match self.controller.current_state() {
            ConnectionState::Connected { connected_at, .. } => Some(uptime(now, connected_at)),
            _ => None,
        }
    }

    /// All metrics in one read
    pub fn snapshot(&self, now: SystemTime) -> StatusSnapshot {
        StatusSnapshot {
            state: self.controller.current_state(),
            public_ip: self.public_ip(),
            latency_ms: self.latency_ms(),
            uptime: self.uptime_at(now),
        }
    }
}

/// Format the elapsed time between two instants
///
/// Pure and deterministic; a `now` earlier than `connected_at` counts as
/// zero elapsed time.
pub fn uptime(now: SystemTime, connected_at: SystemTime) -> String {
    let elapsed = now
        .duration_since(connected_at)
        .unwrap_or_default()
        .as_secs();
    format_uptime(elapsed)
}

/// Format elapsed seconds as `H h M m S s`, omitting leading zero units
///
/// Seconds are always shown: `3725` formats as `1h 2m 5s`, `45` as `45s`.
pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
