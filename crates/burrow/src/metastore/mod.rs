//! Stacktrace metadata store boundary.
//!
//! Profile samples are keyed by stacktrace. The store maps a stacktrace's
//! byte key to a [`StacktraceId`] and the id to its [`Sample`]. The chunk
//! storage never talks to the store; query and ingest layers do.
//!
//! [`RemoteMetaStore`] is not implemented yet and answers every call with
//! [`MetaStoreError::NotImplemented`]. [`InMemoryMetaStore`] is a complete
//! local implementation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

use thiserror::Error;

/// A convenience `Result` type for metadata store operations.
pub type Result<T> = std::result::Result<T, MetaStoreError>;

/// The error type for metadata store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaStoreError {
    /// The operation is not available on this store. Not retryable.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// No stacktrace is registered under the key.
    #[error("Stacktrace not found for key {0}")]
    StacktraceNotFound(String),
}

/// Identifier assigned to a stacktrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StacktraceId(pub u64);

impl fmt::Display for StacktraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Stacktrace metadata attached to profile values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Location ids from leaf to root.
    pub location_ids: Vec<u64>,
    /// String labels.
    pub labels: BTreeMap<String, Vec<String>>,
    /// Numeric labels.
    pub num_labels: BTreeMap<String, Vec<i64>>,
}

/// Store resolving stacktrace keys and ids.
pub trait ProfileMetaStore: Send + Sync {
    /// Returns the id registered for `key`.
    fn get_stacktrace_by_key(&self, key: &[u8]) -> Result<StacktraceId>;

    /// Returns the samples of the known `ids`; unknown ids are left out.
    fn get_stacktrace_by_ids(
        &self,
        ids: &[StacktraceId],
    ) -> Result<HashMap<StacktraceId, Sample>>;

    /// Registers `sample` under `key` and returns its id.
    ///
    /// Registering an existing key returns the existing id.
    fn create_stacktrace(&self, key: &[u8], sample: Sample) -> Result<StacktraceId>;
}

/// Metadata store served by a remote process. Not implemented yet.
#[derive(Debug, Clone)]
pub struct RemoteMetaStore {
    addr: String,
}

impl RemoteMetaStore {
    /// Creates a store for the service at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Returns the service address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl ProfileMetaStore for RemoteMetaStore {
    fn get_stacktrace_by_key(&self, _key: &[u8]) -> Result<StacktraceId> {
        Err(MetaStoreError::NotImplemented("remote get_stacktrace_by_key"))
    }

    fn get_stacktrace_by_ids(
        &self,
        _ids: &[StacktraceId],
    ) -> Result<HashMap<StacktraceId, Sample>> {
        Err(MetaStoreError::NotImplemented("remote get_stacktrace_by_ids"))
    }

    fn create_stacktrace(&self, _key: &[u8], _sample: Sample) -> Result<StacktraceId> {
        Err(MetaStoreError::NotImplemented("remote create_stacktrace"))
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    ids: HashMap<Vec<u8>, StacktraceId>,
    samples: HashMap<StacktraceId, Sample>,
    next_id: u64,
}

/// Metadata store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    inner: RwLock<InMemoryState>,
}

impl InMemoryMetaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered stacktraces.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|err| err.into_inner()).ids.len()
    }

    /// Returns true if no stacktrace is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn hex(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

impl ProfileMetaStore for InMemoryMetaStore {
    fn get_stacktrace_by_key(&self, key: &[u8]) -> Result<StacktraceId> {
        let state = self.inner.read().unwrap_or_else(|err| err.into_inner());
        state
            .ids
            .get(key)
            .copied()
            .ok_or_else(|| MetaStoreError::StacktraceNotFound(hex(key)))
    }

    fn get_stacktrace_by_ids(
        &self,
        ids: &[StacktraceId],
    ) -> Result<HashMap<StacktraceId, Sample>> {
        let state = self.inner.read().unwrap_or_else(|err| err.into_inner());
        Ok(ids
            .iter()
            .filter_map(|id| state.samples.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    fn create_stacktrace(&self, key: &[u8], sample: Sample) -> Result<StacktraceId> {
        let mut state = self.inner.write().unwrap_or_else(|err| err.into_inner());
        if let Some(id) = state.ids.get(key) {
            return Ok(*id);
        }
        let id = StacktraceId(state.next_id);
        state.next_id += 1;
        state.ids.insert(key.to_vec(), id);
        state.samples.insert(id, sample);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(locations: &[u64]) -> Sample {
        Sample {
            location_ids: locations.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_remote_store_reports_not_implemented() {
        let store = RemoteMetaStore::new("127.0.0.1:7070");
        assert_eq!(store.addr(), "127.0.0.1:7070");

        assert!(matches!(
            store.get_stacktrace_by_key(b"key"),
            Err(MetaStoreError::NotImplemented(_))
        ));
        assert!(matches!(
            store.get_stacktrace_by_ids(&[StacktraceId(1)]),
            Err(MetaStoreError::NotImplemented(_))
        ));
        assert!(matches!(
            store.create_stacktrace(b"key", Sample::default()),
            Err(MetaStoreError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_in_memory_create_and_lookup() {
        let store = InMemoryMetaStore::new();
        let a = store.create_stacktrace(b"a", sample(&[1, 2])).unwrap();
        let b = store.create_stacktrace(b"b", sample(&[3])).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);

        // Same key, same id; the first sample wins.
        assert_eq!(store.create_stacktrace(b"a", sample(&[9])).unwrap(), a);
        assert_eq!(store.get_stacktrace_by_key(b"a").unwrap(), a);

        let found = store
            .get_stacktrace_by_ids(&[a, b, StacktraceId(99)])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&a].location_ids, vec![1, 2]);
        assert_eq!(found[&b].location_ids, vec![3]);
    }

    #[test]
    fn test_in_memory_unknown_key() {
        let store = InMemoryMetaStore::new();
        assert!(store.is_empty());
        assert_eq!(
            store.get_stacktrace_by_key(&[0xde, 0xad]),
            Err(MetaStoreError::StacktraceNotFound("dead".to_string()))
        );
    }

    #[test]
    fn test_store_as_trait_object() {
        let stores: Vec<Box<dyn ProfileMetaStore>> = vec![
            Box::new(InMemoryMetaStore::new()),
            Box::new(RemoteMetaStore::new("remote:7070")),
        ];
        let results: Vec<bool> = stores
            .iter()
            .map(|s| s.create_stacktrace(b"k", Sample::default()).is_ok())
            .collect();
        assert_eq!(results, vec![true, false]);
    }
}
