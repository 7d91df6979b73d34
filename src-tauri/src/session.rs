//! Per-user conversation state behind a pluggable store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::BillAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<StoredMessage>,
    pub bill_analysis: Option<BillAnalysis>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored session is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored session has unknown role '{0}'")]
    UnknownRole(String),
    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Limits applied by every store.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    /// Idle time after which a conversation is dropped.
    pub ttl: Duration,
    /// Live conversations kept; the least recently used goes first.
    pub max_entries: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 1000,
        }
    }
}

pub trait SessionStore: Send + Sync {
    /// Append a message, creating the conversation if needed, and return the
    /// updated state.
    fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ConversationState, StoreError>;

    fn set_bill_analysis(&self, user_id: &str, analysis: BillAnalysis) -> Result<(), StoreError>;

    fn get(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError>;

    /// Forget messages and analysis for `user_id` only.
    fn reset(&self, user_id: &str) -> Result<(), StoreError>;

    /// Drop idle conversations; returns how many were removed.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

struct Entry {
    state: ConversationState,
    last_access: Instant,
}

#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
    policy: EvictionPolicy,
}

impl MemorySessionStore {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.last_access) > self.policy.ttl
    }

    /// Live entry for `user_id`, created when absent or expired.
    fn entry<'a>(&self, entries: &'a mut HashMap<String, Entry>, user_id: &str) -> &'a mut Entry {
        let now = Instant::now();
        let expired = entries
            .get(user_id)
            .map(|e| self.is_expired(e, now))
            .unwrap_or(false);
        if expired {
            entries.remove(user_id);
        }

        if !entries.contains_key(user_id) {
            evict_lru(entries, self.policy.max_entries.saturating_sub(1));
        }

        let entry = entries.entry(user_id.to_string()).or_insert_with(|| Entry {
            state: ConversationState::default(),
            last_access: now,
        });
        entry.last_access = now;
        entry
    }
}

fn evict_lru(entries: &mut HashMap<String, Entry>, keep: usize) {
    while entries.len() > keep {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        match oldest {
            Some(key) => {
                debug!(user_id = %key, "evicting least recently used conversation");
                entries.remove(&key);
            }
            None => break,
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ConversationState, StoreError> {
        let mut entries = self.lock();
        let entry = self.entry(&mut entries, user_id);
        entry.state.messages.push(StoredMessage {
            role,
            content: content.to_string(),
        });
        Ok(entry.state.clone())
    }

    fn set_bill_analysis(&self, user_id: &str, analysis: BillAnalysis) -> Result<(), StoreError> {
        let mut entries = self.lock();
        self.entry(&mut entries, user_id).state.bill_analysis = Some(analysis);
        Ok(())
    }

    fn get(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let mut entries = self.lock();
        let now = Instant::now();
        let expired = match entries.get(user_id) {
            Some(e) => self.is_expired(e, now),
            None => return Ok(None),
        };
        if expired {
            entries.remove(user_id);
            return Ok(None);
        }
        Ok(entries.get_mut(user_id).map(|e| {
            e.last_access = now;
            e.state.clone()
        }))
    }

    fn reset(&self, user_id: &str) -> Result<(), StoreError> {
        self.lock().remove(user_id);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !self.is_expired(e, now));
        Ok(before - entries.len())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration, max_entries: usize) -> MemorySessionStore {
        MemorySessionStore::new(EvictionPolicy { ttl, max_entries })
    }

    #[test]
    fn test_append_keeps_order() {
        contract::append_keeps_order(&MemorySessionStore::default());
    }

    #[test]
    fn test_reset_isolates_identifier() {
        contract::reset_isolates_identifier(&MemorySessionStore::default());
    }

    #[test]
    fn test_ttl_expires() {
        contract::ttl_expires(&store(Duration::from_millis(50), 10));
    }

    #[test]
    fn test_max_entries_evicts_lru() {
        let s = store(Duration::from_secs(60), 2);
        contract::max_entries_evicts_lru(&s);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_analysis_creates_conversation() {
        let s = MemorySessionStore::default();
        s.set_bill_analysis("u", contract::analysis("x")).unwrap();
        let state = s.get("u").unwrap().unwrap();
        assert!(state.messages.is_empty());
        assert!(state.bill_analysis.is_some());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::parse(Role::Assistant.as_str()), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }
}
