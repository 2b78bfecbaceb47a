//! The key/value coordination backend [`LockRegistry`](crate::lock::LockRegistry)
//! is built on. The production backend (e.g. Redis) is an external
//! collaborator (spec §6); this crate ships only the trait and an
//! in-memory implementation used for tests and single-process deployment.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use transit_core::Result;

/// Minimal key/value operations `LockRegistry` needs: `setnx`/`get`/`delete`
/// for the exclusive slot, `lpush`/`lrem`/`lrange`/`llen` for the shared list.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Set `key` to `value` only if it is currently unset. Returns whether
    /// the set happened.
    async fn setnx(&self, key: &str, value: Vec<u8>) -> Result<bool>;
    /// Fetch the current value of `key`, if set.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Unconditionally remove `key`.
    async fn delete(&self, key: &str) -> Result<()>;
    /// Push `value` onto the list at `key`.
    async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<()>;
    /// Remove all occurrences of `value` from the list at `key`.
    async fn lrem(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Fetch every entry in the list at `key`.
    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>>;
    /// Count entries in the list at `key`.
    async fn llen(&self, key: &str) -> Result<usize>;
}

#[derive(Default)]
struct State {
    scalars: HashMap<String, Vec<u8>>,
    lists: HashMap<String, Vec<Vec<u8>>>,
}

/// An in-process `KvBackend`, suitable for a single-process deployment and
/// for tests. A production deployment coordinating multiple processes needs
/// a real external store (Redis or similar) behind this same trait.
#[derive(Default)]
pub struct MemoryKvBackend {
    state: Mutex<State>,
}

impl MemoryKvBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn setnx(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let mut state = self.state.lock().expect("mutex poisoned");
        if state.scalars.contains_key(key) {
            Ok(false)
        } else {
            state.scalars.insert(key.to_string(), value);
            Ok(true)
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().expect("mutex poisoned");
        Ok(state.scalars.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().expect("mutex poisoned");
        state.scalars.remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().expect("mutex poisoned");
        state.lists.entry(key.to_string()).or_default().insert(0, value);
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut state = self.state.lock().expect("mutex poisoned");
        if let Some(list) = state.lists.get_mut(key) {
            list.retain(|v| v != value);
        }
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock().expect("mutex poisoned");
        Ok(state.lists.get(key).cloned().unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let state = self.state.lock().expect("mutex poisoned");
        Ok(state.lists.get(key).map_or(0, Vec::len))
    }
}
