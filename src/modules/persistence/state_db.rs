use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::modules::persistence::KeyValueStore;

const STATE_DB_FILE: &str = "moneta_state.db";

/// Persistent key-value store over a single `ItemTable`, shared with the rest
/// of the application (tokens, user record). Connections are opened per
/// operation; sqlite serializes writers.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self, String> {
        let mut path = crate::modules::system::device::get_data_dir()?;
        path.push(STATE_DB_FILE);
        Self::at_path(path)
    }

    pub fn at_path(path: PathBuf) -> Result<Self, String> {
        let store = Self { path };
        store.init()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, String> {
        Connection::open(&self.path).map_err(|e| format!("failed_to_open_state_db: {}", e))
    }

    fn init(&self) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )
        .map_err(|e| format!("failed_to_create_item_table: {}", e))?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, String> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT value FROM ItemTable WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| format!("failed_to_read_item: {}", e))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| format!("failed_to_write_item: {}", e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM ItemTable WHERE key = ?1", params![key])
            .map_err(|e| format!("failed_to_delete_item: {}", e))?;
        Ok(())
    }

    fn compare_and_remove(&self, key: &str, expected: &str) -> Result<bool, String> {
        let conn = self.connect()?;
        let removed = conn
            .execute(
                "DELETE FROM ItemTable WHERE key = ?1 AND value = ?2",
                params![key, expected],
            )
            .map_err(|e| format!("failed_to_delete_item: {}", e))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> SqliteStore {
        let path = std::env::temp_dir().join(format!(
            "moneta-test-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        SqliteStore::at_path(path).expect("state db")
    }

    #[test]
    fn test_sqlite_store_roundtrip() {
        let store = temp_store("roundtrip");
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("k", "v").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_sqlite_compare_and_remove() {
        let store = temp_store("cas");
        store.set("k", "v1").unwrap();
        assert!(!store.compare_and_remove("k", "other").unwrap());
        assert!(store.compare_and_remove("k", "v1").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }
}
