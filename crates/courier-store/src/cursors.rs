//! Key/value region holding the sync cursors.
//!
//! A cursor only ever moves after the page it covers has been applied, and
//! in the same transaction (see `apply_messages` and friends).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::codec::parse_ts;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::SyncCursor;

impl Database {
    pub fn get_cursor(&self, key: &str) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT value FROM sync_cursors WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    pub fn set_cursor(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        write_cursor(self.conn(), key, value, now)
    }

    pub fn delete_cursor(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sync_cursors WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    pub fn list_cursors(&self) -> Result<Vec<SyncCursor>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT key, value, updated_at FROM sync_cursors ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            let updated_str: String = row.get(2)?;
            Ok(SyncCursor {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: parse_ts(2, &updated_str)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

pub(crate) fn write_cursor(conn: &Connection, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_cursors (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, crate::codec::ts(&now)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_upsert() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_cursor("users").unwrap(), None);

        db.set_cursor("users", "1", Utc::now()).unwrap();
        db.set_cursor("users", "2", Utc::now()).unwrap();
        db.set_cursor("conversation:c1", "a", Utc::now()).unwrap();

        assert_eq!(db.get_cursor("users").unwrap().as_deref(), Some("2"));
        let keys: Vec<_> = db.list_cursors().unwrap().into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["conversation:c1".to_string(), "users".to_string()]);

        assert!(db.delete_cursor("users").unwrap());
        assert_eq!(db.get_cursor("users").unwrap(), None);
    }
}
