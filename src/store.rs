//! Generic record persistence for the client core
//!
//! Server descriptors and app settings live in an external record store that
//! this crate treats as an opaque collection with list/create/update
//! operations. At-least-once consistency is assumed and there are no
//! transactions. [`MemoryStore`] is the bundled implementation.

use crate::error::{Result, VpnError};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A record paired with the id the store knows it by
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<T> {
    pub id: String,
    pub record: T,
}

/// Schema-less record store collaborator
///
/// Implementations must keep `list()` ordering stable across calls unless a
/// record was created or updated in between.
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// All records in insertion order.
    async fn list(&self) -> Result<Vec<StoredRecord<T>>>;

    /// Insert a new record; the store assigns and returns its id.
    async fn create(&self, record: T) -> Result<String>;

    /// Replace the record with the given id.
    async fn update(&self, id: &str, record: T) -> Result<()>;
}

/// In-memory, insertion-ordered record store
pub struct MemoryStore<T> {
    records: Mutex<Vec<StoredRecord<T>>>,
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Create a store preloaded with records under caller-supplied ids
    pub fn preloaded<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let records = pairs
            .into_iter()
            .map(|(id, record)| StoredRecord { id, record })
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }
}

impl<T> Default for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn list(&self) -> Result<Vec<StoredRecord<T>>> {
        Ok(self.records.lock().await.clone())
    }

    async fn create(&self, record: T) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.records.lock().await.push(StoredRecord {
            id: id.clone(),
            record,
        });
        Ok(id)
    }

    async fn update(&self, id: &str, record: T) -> Result<()> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(slot) => {
                slot.record = record;
                Ok(())
            }
            None => Err(VpnError::Persistence(format!("no record with id {id}"))),
        }
    }
}
