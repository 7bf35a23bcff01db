//! Conversation store: per-(tenant, conversation) preferred language and
//! last-query hint.
//!
//! Small, bounded, TTL-expirable. One active turn per conversation is the
//! convention, but concurrent writers are tolerated: last write wins.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Per-conversation state.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Preferred language code ("en", "vi", …).
    pub language: String,
    /// Hint describing the last data query, for prompt seeding.
    pub last_query_hint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Shared conversation-state shelf.
pub struct ConversationStore {
    entries: RwLock<HashMap<(String, String), ConversationState>>,
    ttl_secs: u64,
}

impl ConversationStore {
    /// Store with the given entry TTL.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// Fetch live state for a conversation.
    pub fn get(&self, tenant_id: &str, conversation_id: &str) -> Option<ConversationState> {
        let entries = self.entries.read().ok()?;
        let state = entries.get(&(tenant_id.to_owned(), conversation_id.to_owned()))?;
        if self.is_live(state.updated_at) {
            Some(state.clone())
        } else {
            None
        }
    }

    /// Write state for a conversation (last write wins).
    pub fn put(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        language: String,
        last_query_hint: Option<String>,
    ) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                (tenant_id.to_owned(), conversation_id.to_owned()),
                ConversationState {
                    language,
                    last_query_hint,
                    updated_at: Utc::now(),
                },
            );
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl_secs;
        let now = Utc::now();
        entries.retain(|_, state| live_at(state.updated_at, ttl, now));
        before.saturating_sub(entries.len())
    }

    fn is_live(&self, updated_at: DateTime<Utc>) -> bool {
        live_at(updated_at, self.ttl_secs, Utc::now())
    }
}

fn live_at(updated_at: DateTime<Utc>, ttl_secs: u64, now: DateTime<Utc>) -> bool {
    updated_at
        .checked_add_signed(chrono::Duration::seconds(
            i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        ))
        .is_some_and(|deadline| now <= deadline)
}
