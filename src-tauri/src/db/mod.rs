use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::info;

use crate::analysis::BillAnalysis;
use crate::session::{
    ConversationState, EvictionPolicy, Role, SessionStore, StoreError, StoredMessage,
};

/// Conversation store persisted in SQLite.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    policy: EvictionPolicy,
}

impl SqliteSessionStore {
    pub fn open(path: &Path, policy: EvictionPolicy) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let store = Self::with_connection(conn, policy)?;
        info!(path = %path.display(), "session database opened");
        Ok(store)
    }

    pub fn open_in_memory(policy: EvictionPolicy) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, policy)
    }

    fn with_connection(conn: Connection, policy: EvictionPolicy) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.policy.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Make sure a live conversation row exists and mark it used.
    fn touch(&self, tx: &Transaction<'_>, user_id: &str, now: i64) -> Result<(), StoreError> {
        let updated_at: Option<i64> = tx
            .query_row(
                "SELECT updated_at FROM conversations WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let exists = match updated_at {
            Some(at) if now.saturating_sub(at) > self.ttl_millis() => {
                tx.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])?;
                false
            }
            Some(_) => true,
            None => false,
        };

        if exists {
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE user_id = ?2",
                params![now, user_id],
            )?;
            return Ok(());
        }

        let keep = i64::try_from(self.policy.max_entries.saturating_sub(1)).unwrap_or(i64::MAX);
        tx.execute(
            "DELETE FROM conversations WHERE user_id IN (
                SELECT user_id FROM conversations ORDER BY updated_at DESC LIMIT -1 OFFSET ?1
            )",
            params![keep],
        )?;
        tx.execute(
            "INSERT INTO conversations (user_id, updated_at) VALUES (?1, ?2)",
            params![user_id, now],
        )?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            user_id TEXT PRIMARY KEY,
            bill_analysis TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES conversations(user_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, id);
        ",
    )
}

fn load_state(conn: &Connection, user_id: &str) -> Result<Option<ConversationState>, StoreError> {
    let analysis: Option<Option<String>> = conn
        .query_row(
            "SELECT bill_analysis FROM conversations WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(analysis) = analysis else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT role, content FROM messages WHERE user_id = ?1 ORDER BY id ASC")?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (role, content) = row?;
        let role = Role::parse(&role).ok_or(StoreError::UnknownRole(role))?;
        messages.push(StoredMessage { role, content });
    }

    let bill_analysis = analysis
        .map(|text| serde_json::from_str::<BillAnalysis>(&text))
        .transpose()?;

    Ok(Some(ConversationState {
        messages,
        bill_analysis,
    }))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SessionStore for SqliteSessionStore {
    fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ConversationState, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = now_millis();
        self.touch(&tx, user_id, now)?;
        tx.execute(
            "INSERT INTO messages (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), content, now],
        )?;
        let state = load_state(&tx, user_id)?.unwrap_or_default();
        tx.commit()?;
        Ok(state)
    }

    fn set_bill_analysis(&self, user_id: &str, analysis: BillAnalysis) -> Result<(), StoreError> {
        let text = serde_json::to_string(&analysis)?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        self.touch(&tx, user_id, now_millis())?;
        tx.execute(
            "UPDATE conversations SET bill_analysis = ?1 WHERE user_id = ?2",
            params![text, user_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, user_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let conn = self.lock();
        let now = now_millis();
        let updated_at: Option<i64> = conn
            .query_row(
                "SELECT updated_at FROM conversations WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match updated_at {
            None => Ok(None),
            Some(at) if now.saturating_sub(at) > self.ttl_millis() => {
                conn.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])?;
                Ok(None)
            }
            Some(_) => {
                conn.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE user_id = ?2",
                    params![now, user_id],
                )?;
                load_state(&conn, user_id)
            }
        }
    }

    fn reset(&self, user_id: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let cutoff = now_millis().saturating_sub(self.ttl_millis());
        let removed = conn.execute(
            "DELETE FROM conversations WHERE updated_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::contract;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(ttl: Duration, max_entries: usize) -> SqliteSessionStore {
        SqliteSessionStore::open_in_memory(EvictionPolicy { ttl, max_entries }).unwrap()
    }

    #[test]
    fn test_append_keeps_order() {
        contract::append_keeps_order(&store(Duration::from_secs(60), 10));
    }

    #[test]
    fn test_reset_isolates_identifier() {
        contract::reset_isolates_identifier(&store(Duration::from_secs(60), 10));
    }

    #[test]
    fn test_ttl_expires() {
        contract::ttl_expires(&store(Duration::from_millis(50), 10));
    }

    #[test]
    fn test_max_entries_evicts_lru() {
        contract::max_entries_evicts_lru(&store(Duration::from_secs(60), 2));
    }

    #[test]
    fn test_reset_removes_messages() {
        let s = store(Duration::from_secs(60), 10);
        s.append_message("u", Role::User, "Ciao").unwrap();
        s.reset("u").unwrap();
        let count: i64 = s
            .lock()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let s = SqliteSessionStore::open(&path, EvictionPolicy::default()).unwrap();
            s.append_message("u", Role::User, "Quanto pago?").unwrap();
            s.set_bill_analysis("u", contract::analysis("Marzo 84 €")).unwrap();
        }
        let s = SqliteSessionStore::open(&path, EvictionPolicy::default()).unwrap();
        let state = s.get("u").unwrap().unwrap();
        assert_eq!(state.messages[0].content, "Quanto pago?");
        assert_eq!(
            state.bill_analysis.unwrap().summary_text().as_deref(),
            Some("Marzo 84 €")
        );
    }
}
