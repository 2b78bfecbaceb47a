//! transit-store
//!
//! The in-memory reference [`Store`](transit_core::Store) implementation.
//!
//! - `memory`: [`MemoryStore`], a `tokio::sync::RwLock`-guarded in-process store.
//! - `coalesce`: the stop streaming-mean decision, as pure logic.
#![warn(missing_docs)]

/// The stop-coalescing decision function.
pub mod coalesce;
/// The in-memory `Store` implementation.
pub mod memory;

pub use memory::MemoryStore;
