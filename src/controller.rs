//! Connection lifecycle controller
//!
//! Owns the connection state, orchestrates connect/disconnect against a
//! selected server through the injected transport, and publishes every
//! transition to subscribed observers. Only one lifecycle operation may be
//! in flight per controller; concurrent calls fail instead of queuing.

use crate::config::AppSettings;
use crate::directory::{ServerDescriptor, ServerDirectory};
use crate::error::{Result, VpnError};
use crate::transport::{LinkReport, Transport};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// Default bound on a single setup attempt
const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Observer channel capacity; observers that keep up never miss an event
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state
///
/// Exactly one state is active at any instant and transitions happen only
/// through the controller. A `server_id` always references a descriptor in
/// the directory the controller was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not attempting to connect
    Disconnected,
    /// A user-initiated connect is running its setup interval
    Connecting { server_id: String },
    /// Link established
    Connected {
        server_id: String,
        connected_at: SystemTime,
    },
    /// Teardown in progress
    Disconnecting,
    /// Automatic reconnect after an unexpected drop
    Reconnecting { server_id: String, attempt: u32 },
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl ConnectionState {
    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Reconnecting { .. } => "reconnecting",
        }
    }

    /// Check if a link is currently up
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// The server this state refers to, if any
    pub fn server_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Connecting { server_id }
            | ConnectionState::Connected { server_id, .. }
            | ConnectionState::Reconnecting { server_id, .. } => Some(server_id),
            _ => None,
        }
    }
}

/// Events delivered to subscribed observers
///
/// `StateChanged` fires on every transition. The reconnect events are
/// distinct so observers can tell automatic transitions from user-initiated
/// ones.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChanged(ConnectionState),
    ReconnectScheduled {
        server_id: String,
        attempt: u32,
        delay: Duration,
    },
    ReconnectFailed {
        server_id: String,
        attempts: u32,
    },
}

/// Exponential backoff policy for automatic reconnects
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt (in milliseconds)
    pub initial_delay_ms: u64,
    /// Cap on the delay between attempts (in milliseconds)
    pub max_delay_ms: u64,
    /// Backoff multiplier applied after each attempt
    pub multiplier: f64,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate the delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay_ms = delay_ms.min(self.max_delay_ms as f64) as u64;

        Duration::from_millis(capped_delay_ms)
    }
}

/// Connection lifecycle controller
pub struct VpnController {
    directory: Arc<ServerDirectory>,
    transport: Arc<dyn Transport>,
    settings: Mutex<AppSettings>,
    policy: ReconnectPolicy,
    setup_timeout: Duration,

    state: Mutex<ConnectionState>,
    /// Last report from the transport while a link is up
    link: Mutex<Option<LinkReport>>,
    /// Guards lifecycle re-entrancy; held for the whole operation
    in_flight: AtomicBool,
    events: broadcast::Sender<LifecycleEvent>,
}

impl VpnController {
    /// Create a controller over the given directory, transport and settings
    pub fn new(
        directory: Arc<ServerDirectory>,
        transport: Arc<dyn Transport>,
        settings: AppSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            directory,
            transport,
            settings: Mutex::new(settings),
            policy: ReconnectPolicy::default(),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            state: Mutex::new(ConnectionState::Disconnected),
            link: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    /// Builder method to set the reconnect policy
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder method to bound a single setup attempt
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    // ==================== State Access ====================

    /// Snapshot of the current connection state; never blocks on in-flight
    /// lifecycle work
    pub fn current_state(&self) -> ConnectionState {
        self.state.lock().unwrap().clone()
    }

    /// Last link report from the transport, `None` while disconnected
    pub fn link_report(&self) -> Option<LinkReport> {
        self.link.lock().unwrap().clone()
    }

    /// Register an observer; every transition is delivered in order
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Current settings record
    pub fn settings(&self) -> AppSettings {
        self.settings.lock().unwrap().clone()
    }

    /// Replace the settings record
    pub fn update_settings(&self, settings: AppSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    // ==================== Lifecycle Operations ====================

    /// Connect to the server with the given id
    ///
    /// Transitions through Connecting to Connected once the transport
    /// completes setup. On setup failure the state returns to Disconnected
    /// with no partial state left behind.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        let server = self.directory.get(server_id)?;
        self.begin_operation()?;

        let guard_err = {
            let state = self.state.lock().unwrap();
            match &*state {
                ConnectionState::Disconnected => None,
                ConnectionState::Connected {
                    server_id: current, ..
                } => Some(VpnError::AlreadyConnected(current.clone())),
                _ => Some(VpnError::OperationInProgress),
            }
        };
        if let Some(err) = guard_err {
            self.end_operation();
            return Err(err);
        }

        info!(
            "connecting to {} ({}, {}) via {}",
            server.name, server.city, server.country, server.protocol
        );
        self.set_state(ConnectionState::Connecting {
            server_id: server.id.clone(),
        });

        match self.establish_bounded(&server).await {
            Ok(report) => {
                *self.link.lock().unwrap() = Some(report);
                self.set_state(ConnectionState::Connected {
                    server_id: server.id.clone(),
                    connected_at: SystemTime::now(),
                });
                info!("connected to {}", server.id);
                self.end_operation();
                Ok(())
            }
            Err(e) => {
                warn!("setup for {} failed: {e}", server.id);
                self.set_state(ConnectionState::Disconnected);
                self.end_operation();
                Err(e)
            }
        }
    }

    /// Disconnect the current link
    ///
    /// Transitions through Disconnecting to Disconnected, clearing the
    /// connection timestamp and link report. Fails with
    /// [`VpnError::NotConnected`] when no link is up.
    pub async fn disconnect(&self) -> Result<()> {
        self.begin_operation()?;

        let guard_err = {
            let state = self.state.lock().unwrap();
            match &*state {
                ConnectionState::Connected { .. } => None,
                ConnectionState::Disconnected => Some(VpnError::NotConnected),
                _ => Some(VpnError::OperationInProgress),
            }
        };
        if let Some(err) = guard_err {
            self.end_operation();
            return Err(err);
        }

        self.set_state(ConnectionState::Disconnecting);
        let result = self.transport.teardown().await;
        if let Err(ref e) = result {
            warn!("teardown reported an error: {e}");
        }

        *self.link.lock().unwrap() = None;
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected");
        self.end_operation();
        result
    }

    /// Handle an unexpected drop reported by the link monitor
    ///
    /// With auto-reconnect enabled, re-invokes connect on the dropped
    /// server under the reconnect policy; otherwise transitions straight to
    /// Disconnected. A drop signal arriving in any state other than
    /// Connected is ignored.
    pub async fn handle_link_drop(&self) -> Result<()> {
        let dropped_server = {
            let state = self.state.lock().unwrap();
            match &*state {
                ConnectionState::Connected { server_id, .. } => server_id.clone(),
                _ => {
                    debug!("link drop signal ignored in state {}", state.as_str());
                    return Ok(());
                }
            }
        };

        warn!("link to {dropped_server} dropped unexpectedly");
        *self.link.lock().unwrap() = None;

        if !self.settings.lock().unwrap().auto_reconnect {
            info!("auto-reconnect disabled, staying down");
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        }

        self.begin_operation()?;
        self.reconnect(dropped_server).await
    }

    /// Run the bounded reconnect loop; the in-flight flag is already held
    async fn reconnect(&self, server_id: String) -> Result<()> {
        let server = match self.directory.get(&server_id) {
            Ok(server) => server,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                self.end_operation();
                return Err(e);
            }
        };

        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_for_attempt(attempt - 1);
            self.set_state(ConnectionState::Reconnecting {
                server_id: server_id.clone(),
                attempt,
            });
            let _ = self.events.send(LifecycleEvent::ReconnectScheduled {
                server_id: server_id.clone(),
                attempt,
                delay,
            });
            info!(
                "reconnect attempt {attempt}/{} to {server_id} in {delay:?}",
                self.policy.max_attempts
            );
            tokio::time::sleep(delay).await;

            match self.establish_bounded(&server).await {
                Ok(report) => {
                    *self.link.lock().unwrap() = Some(report);
                    self.set_state(ConnectionState::Connected {
                        server_id: server_id.clone(),
                        connected_at: SystemTime::now(),
                    });
                    info!("reconnected to {server_id} on attempt {attempt}");
                    self.end_operation();
                    return Ok(());
                }
                Err(e) => warn!("reconnect attempt {attempt} to {server_id} failed: {e}"),
            }
        }

        let attempts = self.policy.max_attempts;
        warn!("giving up on {server_id} after {attempts} reconnect attempts");
        let _ = self.events.send(LifecycleEvent::ReconnectFailed {
            server_id: server_id.clone(),
            attempts,
        });
        self.set_state(ConnectionState::Disconnected);
        self.end_operation();
        Err(VpnError::ConnectionSetup(format!(
            "reconnect to {server_id} failed after {attempts} attempts"
        )))
    }

    // ==================== Internals ====================

    async fn establish_bounded(&self, server: &ServerDescriptor) -> Result<LinkReport> {
        match tokio::time::timeout(self.setup_timeout, self.transport.establish(server)).await {
            Ok(result) => result,
            Err(_) => Err(VpnError::ConnectionSetup(format!(
                "setup did not complete within {:?}",
                self.setup_timeout
            ))),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        debug!("connection state -> {}", next.as_str());
        *self.state.lock().unwrap() = next.clone();
        let _ = self.events.send(LifecycleEvent::StateChanged(next));
    }

    fn begin_operation(&self) -> Result<()> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VpnError::OperationInProgress);
        }
        Ok(())
    }

    fn end_operation(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::default_catalogue;
    use crate::transport::SimulatedTransport;

    fn fixture() -> (Arc<VpnController>, Arc<SimulatedTransport>) {
        fixture_with(AppSettings::default(), ReconnectPolicy::default())
    }

    fn fixture_with(
        settings: AppSettings,
        policy: ReconnectPolicy,
    ) -> (Arc<VpnController>, Arc<SimulatedTransport>) {
        let directory = Arc::new(ServerDirectory::seeded(default_catalogue()));
        let transport = Arc::new(SimulatedTransport::new());
        let controller = Arc::new(
            VpnController::new(directory, transport.clone(), settings)
                .with_reconnect_policy(policy),
        );
        (controller, transport)
    }

    fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn states(events: &[LifecycleEvent]) -> Vec<&'static str> {
        events
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::StateChanged(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reconnect_policy_delay_calculation() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(16000));
        // Capped at the maximum delay from here on
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(30000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(30000));
    }

    #[test]
    fn test_connection_state_as_str() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(
            ConnectionState::Connecting {
                server_id: "us-nyc-1".to_string()
            }
            .as_str(),
            "connecting"
        );
        assert_eq!(ConnectionState::Disconnecting.as_str(), "disconnecting");
    }

    #[test]
    fn test_connection_state_server_id() {
        assert_eq!(ConnectionState::Disconnected.server_id(), None);
        assert_eq!(ConnectionState::Disconnecting.server_id(), None);

        let connecting = ConnectionState::Connecting {
            server_id: "us-nyc-1".to_string(),
        };
        assert_eq!(connecting.server_id(), Some("us-nyc-1"));

        let connected = ConnectionState::Connected {
            server_id: "uk-lon-1".to_string(),
            connected_at: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(connected.server_id(), Some("uk-lon-1"));

        let reconnecting = ConnectionState::Reconnecting {
            server_id: "de-fra-1".to_string(),
            attempt: 2,
        };
        assert_eq!(reconnecting.server_id(), Some("de-fra-1"));
    }

    #[tokio::test]
    async fn test_controller_starts_disconnected() {
        let (controller, _) = fixture();
        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert!(controller.link_report().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_unknown_server() {
        let (controller, transport) = fixture();

        let err = controller.connect("srv-missing").await.unwrap_err();
        assert!(matches!(err, VpnError::InvalidServer(_)));
        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert_eq!(transport.establish_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_happy_path() {
        let (controller, _) = fixture();
        let mut rx = controller.subscribe();

        controller.connect("us-nyc-1").await.unwrap();

        let state = controller.current_state();
        match &state {
            ConnectionState::Connected { server_id, .. } => assert_eq!(server_id, "us-nyc-1"),
            other => panic!("expected connected state, got {other:?}"),
        }

        let events = drain(&mut rx);
        assert_eq!(states(&events), vec!["connecting", "connected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected() {
        let (controller, _) = fixture();
        controller.connect("us-nyc-1").await.unwrap();

        let err = controller.connect("us-nyc-1").await.unwrap_err();
        match err {
            VpnError::AlreadyConnected(id) => assert_eq!(id, "us-nyc-1"),
            other => panic!("expected AlreadyConnected, got {other:?}"),
        }
        assert!(controller.current_state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_while_connecting() {
        let (controller, _) = fixture();

        let pending = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect("us-nyc-1").await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(matches!(
            controller.current_state(),
            ConnectionState::Connecting { .. }
        ));

        let err = controller.connect("uk-lon-1").await.unwrap_err();
        assert!(matches!(err, VpnError::OperationInProgress));

        pending.await.unwrap().unwrap();
        assert!(controller.current_state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_returns_to_disconnected() {
        let (controller, transport) = fixture();
        transport.fail_next_attempts(1);

        let err = controller.connect("us-nyc-1").await.unwrap_err();
        assert!(matches!(err, VpnError::ConnectionSetup(_)));
        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert!(controller.link_report().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_timeout() {
        let directory = Arc::new(ServerDirectory::seeded(default_catalogue()));
        let transport = Arc::new(
            SimulatedTransport::new()
                .with_delays(Duration::from_secs(120), Duration::from_secs(1)),
        );
        let controller = VpnController::new(directory, transport, AppSettings::default())
            .with_setup_timeout(Duration::from_secs(5));

        let err = controller.connect("us-nyc-1").await.unwrap_err();
        assert!(matches!(err, VpnError::ConnectionSetup(_)));
        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_happy_path() {
        let (controller, _) = fixture();
        controller.connect("us-nyc-1").await.unwrap();

        let mut rx = controller.subscribe();
        controller.disconnect().await.unwrap();

        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert!(controller.link_report().is_none());

        let events = drain(&mut rx);
        assert_eq!(states(&events), vec!["disconnecting", "disconnected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_disconnected() {
        let (controller, _) = fixture();
        let err = controller.disconnect().await.unwrap_err();
        assert!(matches!(err, VpnError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_drop_without_auto_reconnect() {
        let mut settings = AppSettings::default();
        settings.auto_reconnect = false;
        let (controller, transport) = fixture_with(settings, ReconnectPolicy::default());
        controller.connect("us-nyc-1").await.unwrap();

        controller.handle_link_drop().await.unwrap();

        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert!(controller.link_report().is_none());
        // No automatic attempts were made
        assert_eq!(transport.establish_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_drop_triggers_reconnect() {
        let (controller, transport) = fixture();
        controller.connect("us-nyc-1").await.unwrap();

        let mut rx = controller.subscribe();
        transport.fail_next_attempts(2);
        controller.handle_link_drop().await.unwrap();

        let state = controller.current_state();
        match &state {
            ConnectionState::Connected { server_id, .. } => assert_eq!(server_id, "us-nyc-1"),
            other => panic!("expected connected state, got {other:?}"),
        }
        // Initial connect plus two failed and one successful reconnect
        assert_eq!(transport.establish_calls(), 4);

        let events = drain(&mut rx);
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        let (controller, transport) = fixture_with(AppSettings::default(), policy);
        controller.connect("us-nyc-1").await.unwrap();

        let mut rx = controller.subscribe();
        transport.fail_next_attempts(2);
        let err = controller.handle_link_drop().await.unwrap_err();

        assert!(matches!(err, VpnError::ConnectionSetup(_)));
        assert_eq!(controller.current_state(), ConnectionState::Disconnected);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            LifecycleEvent::ReconnectFailed { attempts: 2, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_drop_ignored_when_disconnected() {
        let (controller, transport) = fixture();

        controller.handle_link_drop().await.unwrap();

        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert_eq!(transport.establish_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_settings_changes_drop_behavior() {
        let (controller, transport) = fixture();
        controller.connect("us-nyc-1").await.unwrap();

        let mut settings = controller.settings();
        settings.auto_reconnect = false;
        controller.update_settings(settings);

        controller.handle_link_drop().await.unwrap();
        assert_eq!(controller.current_state(), ConnectionState::Disconnected);
        assert_eq!(transport.establish_calls(), 1);
    }
}
