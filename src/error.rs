//! Error types and handling for the DRAXX VPN client core

use thiserror::Error;

/// Main error type for lifecycle, directory and settings operations
#[derive(Error, Debug)]
pub enum VpnError {
    /// The requested server id is not in the directory
    #[error("unknown server: {0}")]
    InvalidServer(String),

    /// Connect was called while a connection is already up
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// Disconnect was called with no connection up
    #[error("not connected")]
    NotConnected,

    /// A lifecycle operation is already in flight on this controller
    #[error("another lifecycle operation is in progress")]
    OperationInProgress,

    /// The transport could not complete connection setup
    #[error("connection setup failed: {0}")]
    ConnectionSetup(String),

    /// The record store could not commit a write
    #[error("persistence unavailable: {0}")]
    Persistence(String),

    /// Settings parse or validation errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, VpnError>;

impl From<toml::de::Error> for VpnError {
    fn from(err: toml::de::Error) -> Self {
        VpnError::Config(format!("TOML parsing error: {err}"))
    }
}
