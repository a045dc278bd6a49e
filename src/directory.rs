//! Server directory
//!
//! Holds the known server descriptors and exposes listing, filtering and
//! the favorite flag. Descriptors are seeded or imported at construction,
//! mutated only through the favorite toggle, and never deleted during a
//! session. Writes go through the external record store; the in-memory view
//! is only committed once the store accepts the write.

use crate::error::{Result, VpnError};
use crate::store::{MemoryStore, RecordStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Tunnel protocol a server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolTag {
    WireGuard,
    OpenVpn,
}

impl ProtocolTag {
    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolTag::WireGuard => "wireguard",
            ProtocolTag::OpenVpn => "openvpn",
        }
    }
}

impl std::fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known VPN server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique server id, doubles as the record id in the backing store
    pub id: String,
    pub name: String,
    pub city: String,
    pub country: String,
    /// Flag emoji shown next to the server
    pub flag: String,
    pub protocol: ProtocolTag,
    /// Last observed latency in milliseconds, `None` if never measured
    pub last_latency_ms: Option<u32>,
    /// Current load percentage, 0-100
    pub load: u8,
    pub favorite: bool,
}

/// Predicate for [`ServerDirectory::filter`]
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    /// Case-insensitive match across name, city and country
    pub search: Option<String>,
    pub favorites_only: bool,
}

impl ServerFilter {
    fn matches(&self, server: &ServerDescriptor) -> bool {
        if self.favorites_only && !server.favorite {
            return false;
        }

        match self.search.as_deref() {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                server.name.to_lowercase().contains(&term)
                    || server.city.to_lowercase().contains(&term)
                    || server.country.to_lowercase().contains(&term)
            }
        }
    }
}

/// Directory of known servers backed by a record store
pub struct ServerDirectory {
    store: Arc<dyn RecordStore<ServerDescriptor>>,
    servers: Mutex<Vec<ServerDescriptor>>,
}

impl ServerDirectory {
    /// Load the directory from an existing store snapshot
    pub async fn load(store: Arc<dyn RecordStore<ServerDescriptor>>) -> Result<Self> {
        let servers = store
            .list()
            .await?
            .into_iter()
            .map(|r| r.record)
            .collect();

        Ok(Self {
            store,
            servers: Mutex::new(servers),
        })
    }

    /// Build a directory over an in-memory store seeded with the given servers
    pub fn seeded(servers: Vec<ServerDescriptor>) -> Self {
        let store = MemoryStore::preloaded(
            servers.iter().map(|s| (s.id.clone(), s.clone())),
        );

        Self {
            store: Arc::new(store),
            servers: Mutex::new(servers),
        }
    }

    /// All known servers, ordering stable across calls unless mutated
    pub fn list(&self) -> Vec<ServerDescriptor> {
        self.servers.lock().unwrap().clone()
    }

    /// Look up a server by id
    pub fn get(&self, id: &str) -> Result<ServerDescriptor> {
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| VpnError::InvalidServer(id.to_string()))
    }

    /// Flip the favorite flag on a server and persist the change
    ///
    /// Each call inverts the flag, so a double toggle restores the original
    /// value. If the store rejects the write the in-memory flag is left
    /// unchanged and the error is surfaced.
    pub async fn toggle_favorite(&self, id: &str) -> Result<ServerDescriptor> {
        let mut updated = self.get(id)?;
        updated.favorite = !updated.favorite;

        self.store.update(id, updated.clone()).await.map_err(|e| {
            log::warn!("favorite toggle for {id} not persisted: {e}");
            e
        })?;

        let mut servers = self.servers.lock().unwrap();
        if let Some(slot) = servers.iter_mut().find(|s| s.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Servers matching the filter, sorted ascending by latency
    ///
    /// Servers with unknown latency sort last. The sort is stable, so equal
    /// latencies keep their directory order.
    pub fn filter(&self, filter: &ServerFilter) -> Vec<ServerDescriptor> {
        let mut matched: Vec<ServerDescriptor> = self
            .servers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();

        matched.sort_by_key(|s| (s.last_latency_ms.is_none(), s.last_latency_ms));
        matched
    }

    /// Lowest-latency server of the filtered view (Smart Connect selection)
    pub fn best_match(&self, filter: &ServerFilter) -> Option<ServerDescriptor> {
        self.filter(filter).into_iter().next()
    }
}

/// Built-in server catalogue used when no imported snapshot exists
pub fn default_catalogue() -> Vec<ServerDescriptor> {
    vec![
        ServerDescriptor {
            id: "us-nyc-1".to_string(),
            name: "US East 1".to_string(),
            city: "New York".to_string(),
            country: "United States".to_string(),
            flag: "\u{1F1FA}\u{1F1F8}".to_string(),
            protocol: ProtocolTag::WireGuard,
            last_latency_ms: Some(24),
            load: 41,
            favorite: false,
        },
        ServerDescriptor {
            id: "uk-lon-1".to_string(),
            name: "UK London 1".to_string(),
            city: "London".to_string(),
            country: "United Kingdom".to_string(),
            flag: "\u{1F1EC}\u{1F1E7}".to_string(),
            protocol: ProtocolTag::WireGuard,
            last_latency_ms: Some(71),
            load: 58,
            favorite: false,
        },
        ServerDescriptor {
            id: "de-fra-1".to_string(),
            name: "DE Frankfurt 1".to_string(),
            city: "Frankfurt".to_string(),
            country: "Germany".to_string(),
            flag: "\u{1F1E9}\u{1F1EA}".to_string(),
            protocol: ProtocolTag::OpenVpn,
            last_latency_ms: Some(83),
            load: 35,
            favorite: false,
        },
        ServerDescriptor {
            id: "jp-tyo-1".to_string(),
            name: "JP Tokyo 1".to_string(),
            city: "Tokyo".to_string(),
            country: "Japan".to_string(),
            flag: "\u{1F1EF}\u{1F1F5}".to_string(),
            protocol: ProtocolTag::WireGuard,
            last_latency_ms: Some(162),
            load: 22,
            favorite: false,
        },
        ServerDescriptor {
            id: "sg-sin-1".to_string(),
            name: "SG Singapore 1".to_string(),
            city: "Singapore".to_string(),
            country: "Singapore".to_string(),
            flag: "\u{1F1F8}\u{1F1EC}".to_string(),
            protocol: ProtocolTag::OpenVpn,
            last_latency_ms: None,
            load: 64,
            favorite: false,
        },
    ]
}
