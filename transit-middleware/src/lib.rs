//! transit-middleware
//!
//! The cross-cutting concerns that sit between the ingestion tasks and their
//! collaborators: a byte-budget [`QuotaMeter`] over the upstream feed, and a
//! cross-process [`LockRegistry`] coordinating concurrent task runs.
//!
//! - `kv`: the [`KvBackend`] trait the lock registry is built on, plus an
//!   in-memory implementation.
//! - `lock`: named shared/exclusive locks, generalized from the original
//!   Redis-backed implementation.
//! - `quota`: sliding-window byte accounting over the `Store`.
#![warn(missing_docs)]

/// Key/value backend trait used by the lock registry.
pub mod kv;
/// Cross-process named locking.
pub mod lock;
/// Sliding-window quota accounting.
pub mod quota;

pub use kv::{KvBackend, MemoryKvBackend};
pub use lock::{LockGuard, LockRegistry};
pub use quota::QuotaMeter;
