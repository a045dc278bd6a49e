//! Transport collaborator
//!
//! The lifecycle controller drives an injected [`Transport`] to bring links
//! up and down. Real transports do the platform work and measure the link;
//! [`SimulatedTransport`] is the bundled in-process implementation with
//! deterministic timing and scriptable failures.

use crate::directory::ServerDescriptor;
use crate::error::{Result, VpnError};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// What an established link observed
///
/// Absent values stay absent; the core never substitutes a made-up address
/// or latency for a missing measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub public_ip: Option<IpAddr>,
    pub latency_ms: Option<u32>,
}

/// Link setup and teardown collaborator
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bring the link up against the given server
    ///
    /// Runs for the duration of the setup interval and returns what the
    /// link observed, or [`VpnError::ConnectionSetup`] when setup did not
    /// complete.
    async fn establish(&self, server: &ServerDescriptor) -> Result<LinkReport>;

    /// Tear the link down
    async fn teardown(&self) -> Result<()>;
}

const DEFAULT_SETUP_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_TEARDOWN_DELAY: Duration = Duration::from_secs(1);

/// Deterministic in-process transport
pub struct SimulatedTransport {
    setup_delay: Duration,
    teardown_delay: Duration,
    report: LinkReport,
    /// Number of upcoming establish calls that fail before one succeeds
    failures_remaining: AtomicU32,
    establish_calls: AtomicU32,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            setup_delay: DEFAULT_SETUP_DELAY,
            teardown_delay: DEFAULT_TEARDOWN_DELAY,
            report: LinkReport::default(),
            failures_remaining: AtomicU32::new(0),
            establish_calls: AtomicU32::new(0),
        }
    }

    /// Builder method to set setup and teardown intervals
    pub fn with_delays(mut self, setup: Duration, teardown: Duration) -> Self {
        self.setup_delay = setup;
        self.teardown_delay = teardown;
        self
    }

    /// Builder method to set the report returned on successful setup
    pub fn with_report(mut self, report: LinkReport) -> Self {
        self.report = report;
        self
    }

    /// Make the next `n` establish calls fail with a setup error
    pub fn fail_next_attempts(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of establish calls seen so far
    pub fn establish_calls(&self) -> u32 {
        self.establish_calls.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn establish(&self, server: &ServerDescriptor) -> Result<LinkReport> {
        self.establish_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.setup_delay).await;

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(VpnError::ConnectionSetup(format!(
                "simulated setup failure for {}",
                server.id
            )));
        }

        Ok(self.report.clone())
    }

    async fn teardown(&self) -> Result<()> {
        tokio::time::sleep(self.teardown_delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::default_catalogue;

    #[tokio::test(start_paused = true)]
    async fn test_establish_returns_configured_report() {
        let report = LinkReport {
            public_ip: Some("203.0.113.42".parse().unwrap()),
            latency_ms: Some(24),
        };
        let transport = SimulatedTransport::new().with_report(report.clone());
        let servers = default_catalogue();
        let server = &servers[0];

        let observed = transport.establish(server).await.unwrap();
        assert_eq!(observed, report);
        assert_eq!(transport.establish_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_failures_then_success() {
        let transport = SimulatedTransport::new();
        transport.fail_next_attempts(2);
        let servers = default_catalogue();
        let server = &servers[0];

        assert!(transport.establish(server).await.is_err());
        assert!(transport.establish(server).await.is_err());
        assert!(transport.establish(server).await.is_ok());
        assert_eq!(transport.establish_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_runs_for_the_configured_interval() {
        let transport = SimulatedTransport::new()
            .with_delays(Duration::from_millis(500), Duration::from_millis(100));
        let servers = default_catalogue();
        let server = &servers[0];

        let started = tokio::time::Instant::now();
        transport.establish(server).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }
}
