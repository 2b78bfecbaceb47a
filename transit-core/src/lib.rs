//! transit-core
//!
//! Core data model, the [`Store`] persistence trait, and the shared error
//! type for the transit ingestion engine.
//!
//! - `types`: entities (`Agency`, `Route`, `Stop`, `Prediction`, ...) as
//!   plain structs keyed by surrogate ids, plus the `New*` structs used to
//!   write them before they have one.
//! - `store`: the `Store` trait — transactional persistence, implemented
//!   externally (see `transit-store` for the in-memory reference impl).
//! - `error`: the workspace-wide `Error` enum.
#![warn(missing_docs)]

/// The workspace-wide error type and taxonomy.
pub mod error;
/// Persistence interface.
pub mod store;
/// Data model.
pub mod types;

pub use error::{Error, Result};
pub use store::Store;
pub use types::*;
