//! Cross-process named shared/exclusive locks backed by a [`KvBackend`].
//!
//! Generalizes `original_source/lock.py`'s Redis-backed `Lock` class: an
//! exclusive lock on a name blocks every new acquisition of that name; a
//! shared lock blocks new exclusive acquisition but permits other shared
//! acquisitions. Each held lock carries an expiry (crash recovery) and an
//! owner id. Acquisition sleeps in steps up to a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use transit_core::{Error, Result};

use crate::kv::KvBackend;

const EXCLUSIVE_PREFIX: &str = "transit-lock-x-";
const SHARED_PREFIX: &str = "transit-lock-s-";

/// Default lock expiry: how long a held lock remains valid before it is
/// considered abandoned and eligible for crash-recovery reclamation.
pub const DEFAULT_EXPIRES: Duration = Duration::from_secs(25);
/// Default maximum time to wait for a lock before failing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default polling interval while waiting for a lock.
pub const DEFAULT_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Exclusive,
    Shared,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    expires_at_ms: i64,
    owner: String,
}

impl Entry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms < now_ms
    }
}

/// Named shared/exclusive lock coordinator.
///
/// Lock names are opaque strings; the ingestion tasks use `"agencies"` and
/// `"routes"` per the matrix in spec §4.2.
pub struct LockRegistry {
    backend: Arc<dyn KvBackend>,
    owner: String,
    expires: Duration,
    timeout: Duration,
    step: Duration,
}

/// A held lock. Release explicitly with [`LockGuard::release`] for
/// deterministic cleanup; dropping without releasing still reclaims the
/// lock on a best-effort basis if a Tokio runtime is available, mirroring
/// [`transit_core`]'s stream-handle drop contract.
#[must_use = "a lock is released by calling `release()`, not by dropping it silently"]
pub struct LockGuard {
    backend: Arc<dyn KvBackend>,
    key: String,
    mode: Mode,
    entry_bytes: Vec<u8>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// Release the lock. For an exclusive lock this deletes the slot; for a
    /// shared lock this removes this holder's entry from the list.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match self.mode {
            Mode::Exclusive => self.backend.delete(&self.key).await,
            Mode::Shared => self.backend.lrem(&self.key, &self.entry_bytes).await,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = self.backend.clone();
        let key = self.key.clone();
        let mode = self.mode;
        let entry_bytes = std::mem::take(&mut self.entry_bytes);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let result = match mode {
                    Mode::Exclusive => backend.delete(&key).await,
                    Mode::Shared => backend.lrem(&key, &entry_bytes).await,
                };
                if let Err(err) = result {
                    warn!(%key, %err, "failed to release lock on drop");
                }
            });
        } else {
            warn!(%key, "lock dropped without a Tokio runtime available to release it");
        }
    }
}

impl LockRegistry {
    /// Build a registry with the default expiry/timeout/step (spec §4.2),
    /// owned by this process (identified by its pid).
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            owner: std::process::id().to_string(),
            expires: DEFAULT_EXPIRES,
            timeout: DEFAULT_TIMEOUT,
            step: DEFAULT_STEP,
        }
    }

    /// Override the acquisition timeout (used by tests to assert non-blocking failure).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the lock expiry.
    #[must_use]
    pub fn with_expires(mut self, expires: Duration) -> Self {
        self.expires = expires;
        self
    }

    /// Override the polling step.
    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Override the owner id (defaults to the process id).
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Acquire `name` exclusively. Blocks new shared or exclusive
    /// acquisition immediately, but only returns once all existing shared
    /// locks on `name` have drained or expired.
    pub async fn acquire_exclusive(&self, name: &str) -> Result<LockGuard> {
        self.acquire(name, Mode::Exclusive).await
    }

    /// Acquire `name` as a shared (reader) lock. Fails while an exclusive
    /// lock is held; otherwise coexists with any number of other shared locks.
    pub async fn acquire_shared(&self, name: &str) -> Result<LockGuard> {
        self.acquire(name, Mode::Shared).await
    }

    async fn acquire(&self, name: &str, mode: Mode) -> Result<LockGuard> {
        let exclusive_key = format!("{EXCLUSIVE_PREFIX}{name}");
        let shared_key = format!("{SHARED_PREFIX}{name}");
        let deadline = Instant::now() + self.timeout;

        loop {
            let entry_bytes = self.new_entry_bytes()?;
            match mode {
                Mode::Exclusive => {
                    if self.backend.setnx(&exclusive_key, entry_bytes.clone()).await? {
                        self.wait_for_shared_drain(name, &shared_key, deadline).await?;
                        return Ok(LockGuard {
                            backend: self.backend.clone(),
                            key: exclusive_key,
                            mode,
                            entry_bytes,
                            released: false,
                        });
                    }
                }
                Mode::Shared => {
                    if self.backend.get(&exclusive_key).await?.is_none() {
                        self.backend.lpush(&shared_key, entry_bytes.clone()).await?;
                        return Ok(LockGuard {
                            backend: self.backend.clone(),
                            key: shared_key,
                            mode,
                            entry_bytes,
                            released: false,
                        });
                    }
                }
            }
            self.reap_stale_exclusive(&exclusive_key).await?;
            if Instant::now() >= deadline {
                return Err(Error::lock_timeout(name, self.timeout));
            }
            tokio::time::sleep(self.step).await;
        }
    }

    fn new_entry_bytes(&self) -> Result<Vec<u8>> {
        let expires_at_ms = (Utc::now() + chrono_duration(self.expires)).timestamp_millis();
        let entry = Entry {
            expires_at_ms,
            owner: self.owner.clone(),
        };
        serde_json::to_vec(&entry).map_err(|err| Error::store(err.to_string()))
    }

    async fn reap_stale_exclusive(&self, exclusive_key: &str) -> Result<()> {
        if let Some(raw) = self.backend.get(exclusive_key).await?
            && let Ok(existing) = serde_json::from_slice::<Entry>(&raw)
                && existing.is_expired(Utc::now().timestamp_millis()) {
                    debug!(key = exclusive_key, owner = %existing.owner, "reaping stale exclusive lock");
                    self.backend.delete(exclusive_key).await?;
                }
        Ok(())
    }

    async fn wait_for_shared_drain(
        &self,
        name: &str,
        shared_key: &str,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            let entries = self.backend.lrange(shared_key).await?;
            if entries.is_empty() {
                return Ok(());
            }
            let now_ms = Utc::now().timestamp_millis();
            for raw in &entries {
                if let Ok(existing) = serde_json::from_slice::<Entry>(raw)
                    && existing.is_expired(now_ms) {
                        self.backend.lrem(shared_key, raw).await?;
                    }
            }
            if self.backend.llen(shared_key).await? == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::lock_timeout(name, self.timeout));
            }
            tokio::time::sleep(self.step).await;
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvBackend;

    fn registry(timeout: Duration) -> LockRegistry {
        LockRegistry::new(Arc::new(MemoryKvBackend::new()))
            .with_timeout(timeout)
            .with_step(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn exclusive_blocks_new_shared() {
        let reg = registry(Duration::from_millis(0));
        let guard = reg.acquire_exclusive("agencies").await.unwrap();
        let err = reg.acquire_shared("agencies").await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        guard.release().await.unwrap();
        reg.acquire_shared("agencies").await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn shared_blocks_new_exclusive() {
        let reg = registry(Duration::from_millis(0));
        let shared = reg.acquire_shared("routes").await.unwrap();
        let err = reg.acquire_exclusive("routes").await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        shared.release().await.unwrap();
    }

    #[tokio::test]
    async fn shared_locks_coexist() {
        let reg = registry(Duration::from_millis(0));
        let a = reg.acquire_shared("routes").await.unwrap();
        let b = reg.acquire_shared("routes").await.unwrap();
        a.release().await.unwrap();
        b.release().await.unwrap();
    }

    #[tokio::test]
    async fn exclusive_waits_for_shared_drain_then_proceeds() {
        let reg = Arc::new(registry(Duration::from_secs(2)));
        let shared = reg.acquire_shared("routes").await.unwrap();
        let reg2 = reg.clone();
        let handle = tokio::spawn(async move { reg2.acquire_exclusive("routes").await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        shared.release().await.unwrap();
        let exclusive = handle.await.unwrap().unwrap();
        exclusive.release().await.unwrap();
    }

    #[tokio::test]
    async fn expired_exclusive_lock_is_reclaimed() {
        let reg = LockRegistry::new(Arc::new(MemoryKvBackend::new()))
            .with_expires(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(200))
            .with_step(Duration::from_millis(5));
        let first = reg.acquire_exclusive("agencies").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Simulate a crash: leak the guard instead of releasing it.
        std::mem::forget(first);
        let second = reg.acquire_exclusive("agencies").await.unwrap();
        second.release().await.unwrap();
    }
}
