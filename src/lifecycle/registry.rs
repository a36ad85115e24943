//! Tables of live components.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::process::ProcessGuard;
use crate::rpc::RpcClient;

/// Identifies one running service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub name: String,
    pub shard: usize,
    pub context: Option<u64>,
}

impl ServiceKey {
    pub fn new(name: impl Into<String>, shard: usize, context: Option<u64>) -> Self {
        Self {
            name: name.into(),
            shard,
            context,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.shard)?;
        if let Some(context) = self.context {
            write!(f, "@{context}")?;
        }
        Ok(())
    }
}

/// A service that answered its readiness probe.
#[derive(Debug)]
pub struct ServiceHandle {
    pub client: RpcClient,
    pub process: ProcessGuard,
    /// Distinguishes successive handles for the same key.
    pub generation: u64,
    pub started_at: Instant,
}

/// A web server; it has no RPC endpoint.
#[derive(Debug)]
pub struct ServerHandle {
    pub name: String,
    pub process: ProcessGuard,
    pub started_at: Instant,
}

/// Map from key to handle that refuses duplicate keys and missing lookups.
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: BTreeMap<K, V>,
}

pub type ServiceRegistry = Registry<ServiceKey, ServiceHandle>;
pub type ServerRegistry = Registry<String, ServerHandle>;

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone + fmt::Display, V> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(Error::AlreadyRegistered(key.to_string()));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> Result<V> {
        self.entries
            .remove(key)
            .ok_or_else(|| Error::NotRegistered(key.to_string()))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of the current keys, so callers may mutate while iterating.
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
