use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use agora_core::{AgentUrl, AgoraError, StateFactory, StateStore};

fn db_err(e: rusqlite::Error) -> AgoraError {
    AgoraError::State(e.to_string())
}

/// Durable agent state backed by a single SQLite database.
///
/// Every agent scope shares the connection; the mutex around it also makes
/// each conditional update atomic with respect to other writers in this process.
#[derive(Clone)]
pub struct SqliteStateFactory {
    db: Arc<Mutex<Connection>>,
    base_url: Option<String>,
}

impl SqliteStateFactory {
    /// Open or create the state database at the given path.
    pub fn open(path: &Path, base_url: Option<String>) -> agora_core::Result<Self> {
        info!(?path, "opening state store");

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                agent_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_state (
                agent_id TEXT NOT NULL REFERENCES agents(id),
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (agent_id, key)
            );
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            base_url,
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory(base_url: Option<String>) -> agora_core::Result<Self> {
        Self::open(Path::new(":memory:"), base_url)
    }

    fn scope(&self, agent_type: String, agent_id: &str) -> Arc<dyn StateStore> {
        Arc::new(SqliteState {
            db: Arc::clone(&self.db),
            agent_id: agent_id.to_string(),
            agent_type,
            base_url: self.base_url.clone(),
        })
    }
}

impl StateFactory for SqliteStateFactory {
    fn create(&self, agent_type: &str, agent_id: &str) -> agora_core::Result<Arc<dyn StateStore>> {
        let db = self.db.lock();
        let now = chrono::Utc::now().to_rfc3339();
        let inserted = db
            .execute(
                "INSERT OR IGNORE INTO agents (id, agent_type, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![agent_id, agent_type, now],
            )
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(AgoraError::State(format!(
                "agent '{}' already exists",
                agent_id
            )));
        }
        drop(db);
        Ok(self.scope(agent_type.to_string(), agent_id))
    }

    fn open(&self, agent_id: &str) -> agora_core::Result<Option<Arc<dyn StateStore>>> {
        let agent_type: Option<String> = self
            .db
            .lock()
            .query_row(
                "SELECT agent_type FROM agents WHERE id = ?1",
                rusqlite::params![agent_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(agent_type.map(|t| self.scope(t, agent_id)))
    }

    fn delete(&self, agent_id: &str) -> agora_core::Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM agent_state WHERE agent_id = ?1",
            rusqlite::params![agent_id],
        )
        .map_err(db_err)?;
        tx.execute("DELETE FROM agents WHERE id = ?1", rusqlite::params![agent_id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }
}

/// One agent's view of the shared database.
pub struct SqliteState {
    db: Arc<Mutex<Connection>>,
    agent_id: String,
    agent_type: String,
    base_url: Option<String>,
}

fn read_value(conn: &Connection, agent_id: &str, key: &str) -> agora_core::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM agent_state WHERE agent_id = ?1 AND key = ?2",
            rusqlite::params![agent_id, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn write_value(conn: &Connection, agent_id: &str, key: &str, value: &Value) -> agora_core::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO agent_state (agent_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(agent_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![agent_id, key, serde_json::to_string(value)?, now],
    )
    .map_err(db_err)?;
    Ok(())
}

impl StateStore for SqliteState {
    fn owner_id(&self) -> &str {
        &self.agent_id
    }

    fn owner_type(&self) -> &str {
        &self.agent_type
    }

    fn owner_url(&self) -> agora_core::Result<String> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            AgoraError::Unbound(format!("agent '{}' has no public URL", self.agent_id))
        })?;
        Ok(AgentUrl::build(base, &self.agent_type, &self.agent_id))
    }

    fn get(&self, key: &str) -> agora_core::Result<Option<Value>> {
        read_value(&self.db.lock(), &self.agent_id, key)
    }

    fn put(&self, key: &str, value: Value) -> agora_core::Result<()> {
        write_value(&self.db.lock(), &self.agent_id, key, &value)
    }

    fn remove(&self, key: &str) -> agora_core::Result<()> {
        self.db
            .lock()
            .execute(
                "DELETE FROM agent_state WHERE agent_id = ?1 AND key = ?2",
                rusqlite::params![self.agent_id, key],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn conditional_update(
        &self,
        key: &str,
        new_value: Value,
        expected: Option<&Value>,
    ) -> agora_core::Result<bool> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(db_err)?;
        // Compare parsed values so that formatting differences never count as a conflict.
        let current = read_value(&tx, &self.agent_id, key)?;
        if current.as_ref() != expected {
            debug!(agent_id = %self.agent_id, key, "conditional update rejected");
            return Ok(false);
        }
        write_value(&tx, &self.agent_id, key, &new_value)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }
}
