//! TTL-scoped shared stores: datasets, memoized analytics results,
//! conversation state, and persisted confirmation plans.
//!
//! All in-process stores are multi-reader/multi-writer behind `RwLock`s;
//! expiry is lazy on access with an explicit sweep for housekeeping. Only
//! confirmation plans outlive a turn — they live in sqlite.

pub mod conversation;
pub mod dataset_store;
pub mod plans;
pub mod result_cache;

pub use conversation::{ConversationState, ConversationStore};
pub use dataset_store::{DatasetBackend, DatasetStore, InMemoryDatasetBackend};
pub use plans::{ConfirmationPlan, PlanStore};
pub use result_cache::{CachedResult, ResultCache};

/// Errors surfaced by store backends.
///
/// Callers of the resilient wrappers rarely see these: a failing remote
/// backend degrades to the in-process fallback instead of failing the
/// request.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A pluggable backend failed (remote cache down, serialization).
    #[error("store backend failure: {0}")]
    Backend(String),
    /// Sqlite failure from the confirmation-plan store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
