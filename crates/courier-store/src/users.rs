//! Cached [`User`] profiles. The server is authoritative; there is no local
//! edit path, only replacement from sync pulls.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use courier_shared::UserId;

use crate::codec::{parse_enum, parse_opt_ts, parse_ts, ts};
use crate::cursors::write_cursor;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

const SELECT_USER: &str =
    "SELECT id, display_name, avatar_url, presence, last_seen_at, updated_at FROM users";

impl Database {
    pub fn put_user(&self, user: &User) -> Result<()> {
        upsert_user(self.conn(), user)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        fetch_user(self.conn(), id)?.ok_or(StoreError::NotFound)
    }

    pub fn delete_user(&self, id: &UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_USER} ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Apply one page of server users plus its cursor atomically.
    pub fn apply_users<F>(
        &mut self,
        incoming: &[User],
        cursor: Option<(&str, &str)>,
        now: DateTime<Utc>,
        resolve: F,
    ) -> Result<usize>
    where
        F: Fn(&User, &User) -> User,
    {
        let tx = self.conn_mut().transaction()?;
        let mut written = 0;

        for server in incoming {
            let local = fetch_user(&tx, &server.id)?;
            let winner = match &local {
                Some(local) => resolve(local, server),
                None => server.clone(),
            };
            if local.as_ref() != Some(&winner) {
                upsert_user(&tx, &winner)?;
                written += 1;
            }
        }

        if let Some((key, value)) = cursor {
            write_cursor(&tx, key, value, now)?;
        }

        tx.commit()?;
        Ok(written)
    }
}

fn upsert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, display_name, avatar_url, presence, last_seen_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             avatar_url   = excluded.avatar_url,
             presence     = excluded.presence,
             last_seen_at = excluded.last_seen_at,
             updated_at   = excluded.updated_at",
        params![
            user.id.as_str(),
            user.display_name,
            user.avatar_url,
            user.presence.as_str(),
            user.last_seen_at.as_ref().map(ts),
            ts(&user.updated_at),
        ],
    )?;
    Ok(())
}

fn fetch_user(conn: &Connection, id: &UserId) -> Result<Option<User>> {
    conn.query_row(
        &format!("{SELECT_USER} WHERE id = ?1"),
        params![id.as_str()],
        row_to_user,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let presence_str: String = row.get(3)?;
    let last_seen: Option<String> = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(User {
        id: UserId(id),
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
        presence: parse_enum(3, &presence_str)?,
        last_seen_at: parse_opt_ts(4, last_seen)?,
        updated_at: parse_ts(5, &updated_str)?,
    })
}
