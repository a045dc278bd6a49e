//! DRAXX VPN client core
//!
//! Connection lifecycle engine behind the DRAXX VPN client: the server
//! directory, the lifecycle controller and the status reporter. The crate
//! owns the connection state machine and nothing else.
//!
//! ## What This Crate Provides
//! - Server directory with filtering, favorites and Smart Connect selection
//! - Connection lifecycle controller with auto-reconnect and an observer
//!   channel for every state transition
//! - Status derivation (public IP, latency, uptime) that never fabricates
//!   a value the transport did not report
//! - Settings parsing, validation and single-record persistence
//!
//! ## What Your Application Must Implement
//! - A real [`transport::Transport`]: platform tunnel setup/teardown and
//!   link measurement
//! - A durable [`store::RecordStore`] if records should outlive the process
//! - The presentation layer consuming [`controller::LifecycleEvent`]s and
//!   [`status::StatusSnapshot`]s

pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod status;
pub mod store;
pub mod transport;

// Re-export core types for the library interface
pub use config::{AppSettings, DnsProvider, SettingsStore, Theme};
pub use controller::{ConnectionState, LifecycleEvent, ReconnectPolicy, VpnController};
pub use directory::{ProtocolTag, ServerDescriptor, ServerDirectory, ServerFilter};
pub use error::{Result, VpnError};
pub use status::{StatusReporter, StatusSnapshot};
pub use store::{MemoryStore, RecordStore, StoredRecord};
pub use transport::{LinkReport, SimulatedTransport, Transport};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
