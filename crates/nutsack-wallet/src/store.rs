//! Durable storage port for wallet state.
//!
//! State is stored as one JSON document per wallet identity. The session
//! saves after every ledger mutation.

use crate::error::WalletError;
use crate::state::WalletState;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Key-value persistence keyed by wallet identity.
pub trait WalletStore: Send + Sync {
    fn load(&self, identity: &str) -> Result<Option<WalletState>, WalletError>;
    fn save(&self, identity: &str, state: &WalletState) -> Result<(), WalletError>;
}

fn encode(state: &WalletState) -> Result<String, WalletError> {
    serde_json::to_string(state).map_err(|e| WalletError::Storage(e.to_string()))
}

fn decode(json: &str) -> Result<WalletState, WalletError> {
    serde_json::from_str(json).map_err(|e| WalletError::Storage(e.to_string()))
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> WalletError {
    WalletError::Storage(e.to_string())
}

// ─── MemoryStore ────────────────────────────────────────────────────────────

/// In-process store. State is serialized so that loads never alias the
/// session's copy.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletStore for MemoryStore {
    fn load(&self, identity: &str) -> Result<Option<WalletState>, WalletError> {
        let states = self.states.lock().map_err(lock_err)?;
        states.get(identity).map(|json| decode(json)).transpose()
    }

    fn save(&self, identity: &str, state: &WalletState) -> Result<(), WalletError> {
        let json = encode(state)?;
        self.states
            .lock()
            .map_err(lock_err)?
            .insert(identity.to_string(), json);
        Ok(())
    }
}

// ─── SqliteStore ────────────────────────────────────────────────────────────

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS wallet_state (
  identity    TEXT PRIMARY KEY,
  value       TEXT NOT NULL,
  updated_at  INTEGER NOT NULL
);
";

/// SQLite-backed store (WAL mode).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(sql_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, WalletError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, WalletError> {
        conn.execute_batch(SCHEMA_DDL).map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Identities with stored state.
    pub fn identities(&self) -> Result<Vec<String>, WalletError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare("SELECT identity FROM wallet_state ORDER BY identity")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(sql_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }
}

impl WalletStore for SqliteStore {
    fn load(&self, identity: &str) -> Result<Option<WalletState>, WalletError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM wallet_state WHERE identity = ?1",
                params![identity],
                |r| r.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        json.map(|j| decode(&j)).transpose()
    }

    fn save(&self, identity: &str, state: &WalletState) -> Result<(), WalletError> {
        let json = encode(state)?;
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO wallet_state (identity, value, updated_at) VALUES (?1, ?2, ?3)",
            params![identity, json, now_secs()],
        )
        .map_err(sql_err)?;
        Ok(())
    }
}

fn sql_err(e: rusqlite::Error) -> WalletError {
    WalletError::Storage(e.to_string())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutsack_types::Proof;

    const M: &str = "https://mint.example";

    fn sample_state() -> WalletState {
        let mut state = WalletState::new();
        state
            .ledger
            .add_proofs(M, &[Proof::new("00ab", 10, "a", "02")], "ev1");
        state.active_mint = Some(M.into());
        state
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load("alice").unwrap().is_none());
        store.save("alice", &sample_state()).unwrap();
        let loaded = store.load("alice").unwrap().unwrap();
        assert_eq!(loaded.ledger.total_balance(), 10);
        assert!(store.load("bob").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_store_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load("alice").unwrap().is_none());
        store.save("alice", &sample_state()).unwrap();
        assert_eq!(store.load("alice").unwrap().unwrap(), sample_state());
    }

    #[test]
    fn test_sqlite_store_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save("alice", &sample_state()).unwrap();
        store.save("alice", &WalletState::new()).unwrap();
        let loaded = store.load("alice").unwrap().unwrap();
        assert!(loaded.ledger.is_empty());
        assert_eq!(store.identities().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save("alice", &sample_state()).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.load("alice").unwrap().unwrap();
        assert_eq!(loaded.ledger.balances().get(M), Some(&10));
        assert_eq!(loaded.active_mint.as_deref(), Some(M));
    }

    #[test]
    fn test_sqlite_store_rejects_corrupt_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO wallet_state (identity, value, updated_at) VALUES ('x', 'not json', 0)",
                [],
            )
            .unwrap();
        }
        assert!(matches!(store.load("x"), Err(WalletError::Storage(_))));
    }
}
