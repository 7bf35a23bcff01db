//! Dataset store: TTL-bounded, tenant/user-scoped dataset shelf.
//!
//! Lookups require the caller's `(tenant, user)`; a dataset owned by anyone
//! else is simply not found. The store is backend-pluggable: the in-memory
//! backend keeps a canonical-key map plus a `dataset_id → canonical key`
//! index (the same structure a remote backend must maintain so id lookups
//! stay O(1)). The public [`DatasetStore`] wraps a primary backend and an
//! in-process fallback; a failing primary degrades, it never fails the
//! request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, warn};

use crate::engine::dataset::Dataset;

use super::StoreError;

/// TTL clamp range and default, in seconds.
const TTL_MIN_SECS: u64 = 60;
const TTL_MAX_SECS: u64 = 3600;
/// Default dataset lifetime: 10 minutes.
pub const DEFAULT_TTL_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Storage backend contract.
///
/// Implementations must preserve per-column type tags across
/// serialization (see [`crate::engine::dataset::Cell`]'s tagged encoding)
/// and must resolve ids without scanning.
pub trait DatasetBackend: Send + Sync {
    /// Store a dataset under its canonical key and index its id.
    fn put(&self, dataset: Arc<Dataset>) -> Result<(), StoreError>;
    /// Fetch by opaque dataset id.
    fn get(&self, dataset_id: &str) -> Result<Option<Arc<Dataset>>, StoreError>;
    /// Drop by opaque dataset id.
    fn remove(&self, dataset_id: &str) -> Result<(), StoreError>;
    /// All live datasets (for listing and sweeping).
    fn snapshot(&self) -> Result<Vec<Arc<Dataset>>, StoreError>;
}

/// Canonical storage key: `tenant|user|dataset_id`.
fn canonical_key(dataset: &Dataset) -> String {
    format!(
        "{}|{}|{}",
        dataset.tenant_id, dataset.user_id, dataset.dataset_id
    )
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local backend: canonical map plus id index.
#[derive(Default)]
pub struct InMemoryDatasetBackend {
    inner: RwLock<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    by_key: HashMap<String, Arc<Dataset>>,
    id_index: HashMap<String, String>,
}

impl InMemoryDatasetBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatasetBackend for InMemoryDatasetBackend {
    fn put(&self, dataset: Arc<Dataset>) -> Result<(), StoreError> {
        let key = canonical_key(&dataset);
        let mut state = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("dataset store lock poisoned".to_owned()))?;
        state.id_index.insert(dataset.dataset_id.clone(), key.clone());
        state.by_key.insert(key, dataset);
        Ok(())
    }

    fn get(&self, dataset_id: &str) -> Result<Option<Arc<Dataset>>, StoreError> {
        let state = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("dataset store lock poisoned".to_owned()))?;
        Ok(state
            .id_index
            .get(dataset_id)
            .and_then(|key| state.by_key.get(key))
            .cloned())
    }

    fn remove(&self, dataset_id: &str) -> Result<(), StoreError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("dataset store lock poisoned".to_owned()))?;
        if let Some(key) = state.id_index.remove(dataset_id) {
            state.by_key.remove(&key);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<Arc<Dataset>>, StoreError> {
        let state = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("dataset store lock poisoned".to_owned()))?;
        Ok(state.by_key.values().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Public store
// ---------------------------------------------------------------------------

/// Tenant-scoped dataset store with backend fallback.
pub struct DatasetStore {
    primary: Arc<dyn DatasetBackend>,
    fallback: Arc<InMemoryDatasetBackend>,
    default_ttl_secs: u64,
}

impl DatasetStore {
    /// Purely in-process store (primary == fallback).
    pub fn in_memory(default_ttl_secs: u64) -> Self {
        let fallback = Arc::new(InMemoryDatasetBackend::new());
        Self {
            primary: fallback.clone(),
            fallback,
            default_ttl_secs: clamp_ttl(default_ttl_secs),
        }
    }

    /// Store backed by a (possibly remote) primary with in-process fallback.
    pub fn with_backend(primary: Arc<dyn DatasetBackend>, default_ttl_secs: u64) -> Self {
        Self {
            primary,
            fallback: Arc::new(InMemoryDatasetBackend::new()),
            default_ttl_secs: clamp_ttl(default_ttl_secs),
        }
    }

    /// The clamped default TTL applied when a dataset carries none.
    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    /// Insert a dataset, clamping its TTL into the permitted range.
    ///
    /// A primary backend failure degrades to the fallback with a warning;
    /// the insert itself cannot fail.
    pub fn insert(&self, mut dataset: Dataset) -> Arc<Dataset> {
        dataset.ttl_secs = clamp_ttl(dataset.ttl_secs);
        let dataset = Arc::new(dataset);
        if let Err(e) = self.primary.put(dataset.clone()) {
            warn!(error = %e, dataset_id = %dataset.dataset_id, "primary dataset backend put failed; using fallback");
            // In-memory fallback put is infallible in practice.
            let _ = self.fallback.put(dataset.clone());
        }
        debug!(dataset_id = %dataset.dataset_id, rows = dataset.row_count(), "dataset stored");
        dataset
    }

    /// Ownership-checked, expiry-checked lookup.
    ///
    /// Disagreeing tenant/user, expired TTL, and backend errors all resolve
    /// to `None` from the caller's perspective.
    pub fn lookup(
        &self,
        dataset_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Option<Arc<Dataset>> {
        let found = match self.primary.get(dataset_id) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, dataset_id, "primary dataset backend get failed; using fallback");
                self.fallback.get(dataset_id).ok().flatten()
            }
        };
        let dataset = found?;
        if !dataset.owned_by(tenant_id, user_id) {
            debug!(dataset_id, "dataset ownership mismatch; treating as not found");
            return None;
        }
        if dataset.expired_at(Utc::now()) {
            let _ = self.primary.remove(dataset_id);
            let _ = self.fallback.remove(dataset_id);
            return None;
        }
        Some(dataset)
    }

    /// Live datasets owned by `(tenant, user)`, newest first.
    pub fn list_for(&self, tenant_id: &str, user_id: &str) -> Vec<Arc<Dataset>> {
        let now = Utc::now();
        let mut datasets: Vec<Arc<Dataset>> = self
            .primary
            .snapshot()
            .or_else(|e| {
                warn!(error = %e, "primary dataset backend snapshot failed; using fallback");
                self.fallback.snapshot()
            })
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.owned_by(tenant_id, user_id) && !d.expired_at(now))
            .collect();
        datasets.sort_by(|a, b| b.created_at_utc.cmp(&a.created_at_utc));
        datasets
    }

    /// Drop every expired dataset; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .primary
            .snapshot()
            .or_else(|_| self.fallback.snapshot())
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.expired_at(now))
            .map(|d| d.dataset_id.clone())
            .collect();
        for id in &expired {
            let _ = self.primary.remove(id);
            let _ = self.fallback.remove(id);
        }
        expired.len()
    }
}

/// Clamp a TTL into `[1 min, 1 h]`; zero selects the default.
pub fn clamp_ttl(ttl_secs: u64) -> u64 {
    if ttl_secs == 0 {
        return DEFAULT_TTL_SECS;
    }
    ttl_secs.clamp(TTL_MIN_SECS, TTL_MAX_SECS)
}
