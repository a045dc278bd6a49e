//! Application settings for the DRAXX VPN client
//!
//! This module provides TOML-based settings parsing and validation, plus the
//! persistence flow over the external record store (a single settings record
//! per install, updated in place or created on first save).

use crate::error::{Result, VpnError};
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// App theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// DNS provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    #[default]
    Cloudflare,
    Quad9,
    /// Resolver supplied via `custom_dns`
    Custom,
}

/// Per-install application settings
///
/// One record per install. The lifecycle controller consumes this as an
/// explicit configuration value passed at construction and replaced through
/// [`crate::controller::VpnController::update_settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// App theme preference
    #[serde(default)]
    pub theme: Theme,
    /// Block general traffic when the tunnel is not active
    #[serde(default = "default_true")]
    pub kill_switch: bool,
    /// Reconnect automatically after an unexpected drop
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// DNS provider
    #[serde(default)]
    pub dns_provider: DnsProvider,
    /// Custom DNS server address, required when `dns_provider` is `custom`
    pub custom_dns: Option<String>,
    /// Enable notifications
    #[serde(default = "default_true")]
    pub notifications: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            kill_switch: true,
            auto_reconnect: true,
            dns_provider: DnsProvider::Cloudflare,
            custom_dns: None,
            notifications: true,
        }
    }
}

impl AppSettings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| VpnError::Config(format!("Failed to read settings file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert settings to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VpnError::Config(format!("Failed to serialize settings: {e}")))
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.dns_provider == DnsProvider::Custom {
            let addr = self
                .custom_dns
                .as_deref()
                .ok_or_else(|| {
                    VpnError::Config(
                        "A custom DNS address is required when dns_provider is custom".to_string(),
                    )
                })?;

            addr.parse::<std::net::IpAddr>().map_err(|_| {
                VpnError::Config(format!("Invalid custom DNS address '{addr}'"))
            })?;
        }

        Ok(())
    }
}

impl FromStr for AppSettings {
    type Err = VpnError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| VpnError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

/// Settings persistence over the external record store
///
/// Mirrors the single-record flow of the presentation layer: the first
/// stored record is the install's settings; saving updates it in place or
/// creates it if no record exists yet. Store failures surface as
/// [`VpnError::Persistence`] and never touch the in-memory value.
pub struct SettingsStore {
    store: Arc<dyn RecordStore<AppSettings>>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn RecordStore<AppSettings>>) -> Self {
        Self { store }
    }

    /// Load the stored settings, or defaults if none were saved yet
    pub async fn load(&self) -> Result<AppSettings> {
        let records = self.store.list().await?;
        Ok(records
            .into_iter()
            .next()
            .map(|r| r.record)
            .unwrap_or_default())
    }

    /// Persist the settings, updating the existing record or creating one
    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        let records = self.store.list().await?;
        match records.first() {
            Some(existing) => self.store.update(&existing.id, settings.clone()).await,
            None => self.store.create(settings.clone()).await.map(|_| ()),
        }
    }
}
