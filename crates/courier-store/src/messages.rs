//! CRUD and status operations for [`Message`] records.
//!
//! Every message write refreshes the parent conversation's summary inside the
//! same transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use courier_shared::{ConversationId, MessageId, MessageStatus, UserId};

use crate::codec::{parse_enum, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::conversations::refresh_summary;
use crate::cursors::write_cursor;
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::Message;

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, sender_id, content, created_at,
        server_updated_at, status, local_only
 FROM messages";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace a message and refresh its conversation summary.
    pub fn put_message(&mut self, message: &Message) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        upsert_message(&tx, message)?;
        tx.commit()?;
        Ok(())
    }

    /// Move a message to `status`, refusing backward moves outside the
    /// give-up and retry paths.
    pub fn set_message_status(&mut self, id: MessageId, status: MessageStatus) -> Result<Message> {
        let tx = self.conn_mut().transaction()?;
        let message = transition_status(&tx, id, status)?;
        tx.commit()?;
        Ok(message)
    }

    /// Delete a message (explicit user action). A pending send for the same
    /// id goes with it.
    pub fn delete_message(&mut self, id: MessageId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        let affected = tx.execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        tx.execute("DELETE FROM outbox WHERE id = ?1", params![id.0.to_string()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    /// Apply one page of server messages and, when given, advance the
    /// page's cursor in the same transaction.
    ///
    /// `resolve(local, server)` picks the version to keep when the message
    /// already exists locally; unknown messages are stored as server-known
    /// (never `local_only`). Messages
    /// seen for the first time that were not sent by `local_user` bump their
    /// conversation's unread counter. Returns the number of rows that
    /// actually changed, so re-applying a page is a no-op.
    pub fn apply_messages<F>(
        &mut self,
        incoming: &[Message],
        cursor: Option<(&str, &str)>,
        now: DateTime<Utc>,
        local_user: Option<&UserId>,
        resolve: F,
    ) -> Result<usize>
    where
        F: Fn(&Message, &Message) -> Message,
    {
        let tx = self.conn_mut().transaction()?;
        let mut written = 0;

        for server in incoming {
            let local = fetch_message(&tx, server.id)?;
            let winner = match &local {
                Some(local) => resolve(local, server),
                None => Message {
                    local_only: false,
                    ..server.clone()
                },
            };
            if local.as_ref() != Some(&winner) {
                upsert_message(&tx, &winner)?;
                written += 1;
            }
            if local.is_none() && local_user.is_some_and(|me| *me != winner.sender_id) {
                tx.execute(
                    "UPDATE conversations SET unread_count = unread_count + 1 WHERE id = ?1",
                    params![winner.conversation_id.as_str()],
                )?;
            }
        }

        if let Some((key, value)) = cursor {
            write_cursor(&tx, key, value, now)?;
        }

        tx.commit()?;
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        fetch_message(self.conn(), id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_message(&self, id: MessageId) -> Result<Option<Message>> {
        fetch_message(self.conn(), id)
    }

    /// All messages of a conversation, oldest first by ordering timestamp
    /// (server timestamp when present, creation time otherwise).
    pub fn list_by_conversation(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY order_ts ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![conversation_id.as_str()], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// One page of a conversation, newest first.
    pub fn list_messages_page(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE} WHERE conversation_id = ?1
             ORDER BY order_ts DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.as_str(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages the server has never acknowledged.
    pub fn list_local_only_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE} WHERE local_only = 1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside a transaction)
// ---------------------------------------------------------------------------

pub(crate) fn upsert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at,
                               server_updated_at, order_ts, status, local_only)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             conversation_id   = excluded.conversation_id,
             sender_id         = excluded.sender_id,
             content           = excluded.content,
             created_at        = excluded.created_at,
             server_updated_at = excluded.server_updated_at,
             order_ts          = excluded.order_ts,
             status            = excluded.status,
             local_only        = excluded.local_only",
        params![
            message.id.0.to_string(),
            message.conversation_id.as_str(),
            message.sender_id.as_str(),
            message.content,
            ts(&message.created_at),
            message.server_updated_at.as_ref().map(ts),
            ts(&message.ordering_timestamp()),
            message.status.as_str(),
            message.local_only,
        ],
    )?;
    refresh_summary(conn, &message.conversation_id)
}

pub(crate) fn fetch_message(conn: &Connection, id: MessageId) -> Result<Option<Message>> {
    conn.query_row(
        &format!("{SELECT_MESSAGE} WHERE id = ?1"),
        params![id.0.to_string()],
        row_to_message,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

pub(crate) fn transition_status(
    conn: &Connection,
    id: MessageId,
    status: MessageStatus,
) -> Result<Message> {
    let mut message = fetch_message(conn, id)?.ok_or(StoreError::NotFound)?;
    if !message.status.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            from: message.status,
            to: status,
        });
    }
    if message.status != status {
        conn.execute(
            "UPDATE messages SET status = ?2 WHERE id = ?1",
            params![id.0.to_string(), status.as_str()],
        )
        .map_err(not_found)?;
        message.status = status;
    }
    Ok(message)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let content: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let server_str: Option<String> = row.get(5)?;
    let status_str: String = row.get(6)?;
    let local_only: bool = row.get(7)?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        conversation_id: ConversationId(conversation_id),
        sender_id: UserId(sender_id),
        content,
        created_at: parse_ts(4, &created_str)?,
        server_updated_at: parse_opt_ts(5, server_str)?,
        status: parse_enum(6, &status_str)?,
        local_only,
    })
}
