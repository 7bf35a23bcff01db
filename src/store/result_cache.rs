//! Result cache: memoizes `analytics.run` executions.
//!
//! The key hashes the dataset id, every effective engine bound, and the
//! canonical pipeline JSON — any change to any of them is a different
//! entry. TTL is clamped to [5, 10] minutes. Callers bypass the cache
//! entirely when the result is being persisted as a new dataset.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::engine::dataset::Frame;
use crate::engine::EngineBounds;

/// TTL clamp range, in seconds.
const TTL_MIN_SECS: u64 = 300;
const TTL_MAX_SECS: u64 = 600;

/// A memoized engine execution.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub frame: Frame,
    pub warnings: Vec<String>,
}

/// Shared, TTL-scoped result memo.
pub struct ResultCache {
    entries: RwLock<HashMap<String, (DateTime<Utc>, Arc<CachedResult>)>>,
    ttl_secs: u64,
}

impl ResultCache {
    /// Cache with the given TTL, clamped to [5, 10] minutes.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs: ttl_secs.clamp(TTL_MIN_SECS, TTL_MAX_SECS),
        }
    }

    /// The clamped TTL in effect.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Compute the cache key for one execution.
    pub fn key(dataset_id: &str, bounds: &EngineBounds, pipeline_json: &str) -> String {
        let bounds = bounds.clamped();
        let mut hasher = Sha256::new();
        for part in [
            dataset_id,
            &bounds.top_n.to_string(),
            &bounds.max_groups.to_string(),
            &bounds.max_result_rows.to_string(),
            &bounds.max_join_rows.to_string(),
            &bounds.max_join_matches_per_left.to_string(),
            &bounds.max_columns.to_string(),
            pipeline_json,
        ] {
            hasher.update(part.as_bytes());
            hasher.update(b"|");
        }
        hex::encode(hasher.finalize())
    }

    /// Fetch a live entry; expired entries are removed on the way.
    pub fn get(&self, key: &str) -> Option<Arc<CachedResult>> {
        let expired = {
            let entries = self.entries.read().ok()?;
            match entries.get(key) {
                Some((stored_at, result)) => {
                    if self.is_live(*stored_at) {
                        return Some(result.clone());
                    }
                    true
                }
                None => false,
            }
        };
        if expired {
            if let Ok(mut entries) = self.entries.write() {
                entries.remove(key);
            }
        }
        None
    }

    /// Store an entry under `key`.
    pub fn put(&self, key: String, result: CachedResult) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, (Utc::now(), Arc::new(result)));
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl_secs;
        entries.retain(|_, (stored_at, _)| is_live_at(*stored_at, ttl, Utc::now()));
        before.saturating_sub(entries.len())
    }

    fn is_live(&self, stored_at: DateTime<Utc>) -> bool {
        is_live_at(stored_at, self.ttl_secs, Utc::now())
    }
}

fn is_live_at(stored_at: DateTime<Utc>, ttl_secs: u64, now: DateTime<Utc>) -> bool {
    let deadline = stored_at.checked_add_signed(chrono::Duration::seconds(
        i64::try_from(ttl_secs).unwrap_or(i64::MAX),
    ));
    deadline.is_some_and(|d| now <= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dataset::{ColumnDef, ColumnType};

    fn result() -> CachedResult {
        CachedResult {
            frame: Frame::empty(vec![ColumnDef::plain("a", ColumnType::String)]),
            warnings: vec![],
        }
    }

    #[test]
    fn ttl_is_clamped_into_range() {
        assert_eq!(ResultCache::new(1).ttl_secs(), 300);
        assert_eq!(ResultCache::new(10_000).ttl_secs(), 600);
        assert_eq!(ResultCache::new(450).ttl_secs(), 450);
    }

    #[test]
    fn key_changes_with_bounds_and_pipeline() {
        let bounds = EngineBounds::default();
        let k1 = ResultCache::key("d1", &bounds, "[]");
        let k2 = ResultCache::key("d1", &bounds, r#"[{"op":"topN","n":1}]"#);
        let k3 = ResultCache::key(
            "d1",
            &EngineBounds {
                top_n: 10,
                ..bounds
            },
            "[]",
        );
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert_eq!(k1, ResultCache::key("d1", &bounds, "[]"));
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::new(300);
        let key = ResultCache::key("d1", &EngineBounds::default(), "[]");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), result());
        assert!(cache.get(&key).is_some());
    }
}
