//! Durable outbox of locally-originated writes.
//!
//! The composite operations here keep the message/outbox invariant inside a
//! single transaction: a `local_only` message has exactly one entry until it
//! is acknowledged or given up.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use courier_shared::{Ack, MessageId, MessageStatus, OutboxEntryId, OutboxPayload};

use crate::codec::{conversion_err, parse_enum, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{fetch_message, transition_status, upsert_message};
use crate::models::{Message, OutboxEntry};

const SELECT_ENTRY: &str = "SELECT id, kind, payload, enqueued_at, attempt_count,
        last_attempt_at, last_error
 FROM outbox";

impl Database {
    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Add an entry. Fails with [`StoreError::Duplicate`] if the id is
    /// already queued.
    pub fn enqueue(&self, entry: &OutboxEntry) -> Result<()> {
        insert_entry(self.conn(), entry)
    }

    /// Store a freshly composed message together with its send entry.
    pub fn enqueue_message_send(&mut self, message: &Message, entry: &OutboxEntry) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        upsert_message(&tx, message)?;
        insert_entry(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    /// User retry of a `failed` message: back to `sending` with a fresh
    /// entry whose attempt count starts at zero.
    pub fn requeue_failed_message(
        &mut self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry> {
        let tx = self.conn_mut().transaction()?;
        let message = fetch_message(&tx, message_id)?.ok_or(StoreError::NotFound)?;
        if message.status != MessageStatus::Failed {
            return Err(StoreError::InvalidTransition {
                from: message.status,
                to: MessageStatus::Sending,
            });
        }

        let message = transition_status(&tx, message_id, MessageStatus::Sending)?;
        let entry = OutboxEntry::new(message.send_payload(), now);
        insert_entry(&tx, &entry)?;
        tx.commit()?;
        Ok(entry)
    }

    // ------------------------------------------------------------------
    // Outcomes
    // ------------------------------------------------------------------

    /// Record a confirmed delivery: remove the entry and apply its effect.
    ///
    /// For message sends the message becomes `sent` (never lower than its
    /// current status), takes the server timestamp and leaves `local_only`.
    /// The effect is applied even if the entry was cancelled while the
    /// request was in flight.
    pub fn complete_outbox_entry(
        &mut self,
        entry: &OutboxEntry,
        ack: &Ack,
    ) -> Result<Option<Message>> {
        let tx = self.conn_mut().transaction()?;
        delete_entry(&tx, entry.id)?;

        let mut updated = None;
        if let Some(message_id) = entry.message_id() {
            if let Some(mut message) = fetch_message(&tx, message_id)? {
                if message.status.rank() < MessageStatus::Sent.rank() {
                    message.status = MessageStatus::Sent;
                }
                message.local_only = false;
                message.server_updated_at = ack.server_updated_at.or(message.server_updated_at);
                upsert_message(&tx, &message)?;
                updated = Some(message);
            }
        }

        tx.commit()?;
        Ok(updated)
    }

    /// Count a failed delivery attempt. Returns `false` if the entry is gone.
    pub fn record_outbox_failure(
        &self,
        id: OutboxEntryId,
        attempt_count: u32,
        attempted_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE outbox SET attempt_count = ?2, last_attempt_at = ?3, last_error = ?4
             WHERE id = ?1",
            params![id.0.to_string(), attempt_count, ts(&attempted_at), error],
        )?;
        Ok(affected > 0)
    }

    /// Terminal failure: remove the entry and mark its message `failed`.
    /// `local_only` stays set; only a user retry brings the message back.
    pub fn give_up_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<Option<Message>> {
        let tx = self.conn_mut().transaction()?;
        delete_entry(&tx, entry.id)?;
        let failed = fail_pending_message(&tx, entry)?;
        tx.commit()?;
        Ok(failed)
    }

    /// Remove a queued entry that has not been delivered. A cancelled
    /// message send leaves its message `failed`. Returns the removed entry.
    pub fn cancel_outbox_entry(&mut self, id: OutboxEntryId) -> Result<Option<OutboxEntry>> {
        let tx = self.conn_mut().transaction()?;
        let Some(entry) = fetch_entry(&tx, id)? else {
            return Ok(None);
        };
        delete_entry(&tx, id)?;
        fail_pending_message(&tx, &entry)?;
        tx.commit()?;
        Ok(Some(entry))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_outbox_entry(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>> {
        fetch_entry(self.conn(), id)
    }

    /// All queued entries, oldest first.
    pub fn list_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_ENTRY} ORDER BY enqueued_at ASC, rowid ASC"))?;
        let rows = stmt.query_map([], row_to_entry)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn count_outbox(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn delete_outbox_entry(&self, id: OutboxEntryId) -> Result<bool> {
        delete_entry(self.conn(), id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_entry(conn: &Connection, entry: &OutboxEntry) -> Result<()> {
    let payload = entry.payload.to_json()?;
    conn.execute(
        "INSERT INTO outbox (id, kind, payload, enqueued_at, attempt_count, last_attempt_at, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id.0.to_string(),
            entry.kind.as_str(),
            payload,
            ts(&entry.enqueued_at),
            entry.attempt_count,
            entry.last_attempt_at.as_ref().map(ts),
            entry.last_error,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(entry.id.to_string())
        }
        other => StoreError::Sqlite(other),
    })?;
    Ok(())
}

fn delete_entry(conn: &Connection, id: OutboxEntryId) -> Result<bool> {
    let affected = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id.0.to_string()])?;
    Ok(affected > 0)
}

fn fetch_entry(conn: &Connection, id: OutboxEntryId) -> Result<Option<OutboxEntry>> {
    conn.query_row(
        &format!("{SELECT_ENTRY} WHERE id = ?1"),
        params![id.0.to_string()],
        row_to_entry,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

// Only a message still waiting on the server is failed; an acknowledged one
// keeps its status.
fn fail_pending_message(conn: &Connection, entry: &OutboxEntry) -> Result<Option<Message>> {
    let Some(message_id) = entry.message_id() else {
        return Ok(None);
    };
    match fetch_message(conn, message_id)? {
        Some(message) if message.local_only && message.status == MessageStatus::Sending => {
            transition_status(conn, message_id, MessageStatus::Failed).map(Some)
        }
        _ => Ok(None),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let payload_json: String = row.get(2)?;
    let enqueued_str: String = row.get(3)?;
    let attempt_count: u32 = row.get(4)?;
    let last_attempt: Option<String> = row.get(5)?;
    let last_error: Option<String> = row.get(6)?;

    let payload = OutboxPayload::from_json(&payload_json).map_err(|e| conversion_err(2, e))?;

    Ok(OutboxEntry {
        id: OutboxEntryId(parse_uuid(0, &id_str)?),
        kind: parse_enum(1, &kind_str)?,
        payload,
        enqueued_at: parse_ts(3, &enqueued_str)?,
        attempt_count,
        last_attempt_at: parse_opt_ts(5, last_attempt)?,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use courier_shared::{ConversationId, OutboxKind, UserId};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn queued_send(db: &mut Database, at: i64) -> (Message, OutboxEntry) {
        let message = Message::outgoing(
            ConversationId::new("c1"),
            UserId::new("alice"),
            "hi",
            t(at),
        );
        let entry = OutboxEntry::new(message.send_payload(), t(at));
        db.enqueue_message_send(&message, &entry).unwrap();
        (message, entry)
    }

    #[test]
    fn test_enqueue_message_send_links_entry() {
        let mut db = Database::open_in_memory().unwrap();
        let (message, entry) = queued_send(&mut db, 0);

        assert_eq!(entry.id, OutboxEntryId::from(message.id));
        assert_eq!(entry.kind, OutboxKind::MessageSend);
        assert_eq!(db.get_outbox_entry(entry.id).unwrap(), Some(entry.clone()));
        assert_eq!(db.get_message(message.id).unwrap(), message);

        let again = db.enqueue(&entry).unwrap_err();
        assert!(matches!(again, StoreError::Duplicate(_)));
        assert_eq!(db.count_outbox().unwrap(), 1);
    }

    #[test]
    fn test_list_is_oldest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let (_, late) = queued_send(&mut db, 10);
        let (_, early) = queued_send(&mut db, 1);

        let ids: Vec<_> = db.list_outbox().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[test]
    fn test_complete_marks_sent() {
        let mut db = Database::open_in_memory().unwrap();
        let (message, entry) = queued_send(&mut db, 0);
        let ack = Ack {
            server_updated_at: Some(t(5)),
        };

        let sent = db.complete_outbox_entry(&entry, &ack).unwrap().unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(!sent.local_only);
        assert_eq!(sent.server_updated_at, Some(t(5)));
        assert_eq!(db.get_message(message.id).unwrap(), sent);
        assert_eq!(db.count_outbox().unwrap(), 0);
    }

    #[test]
    fn test_failure_bookkeeping_and_give_up() {
        let mut db = Database::open_in_memory().unwrap();
        let (message, entry) = queued_send(&mut db, 0);

        assert!(db
            .record_outbox_failure(entry.id, 1, t(1), "timeout")
            .unwrap());
        let stored = db.get_outbox_entry(entry.id).unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_attempt_at, Some(t(1)));
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));

        let failed = db.give_up_outbox_entry(&stored).unwrap().unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert!(failed.local_only);
        assert!(db.get_outbox_entry(entry.id).unwrap().is_none());
        assert_eq!(db.get_message(message.id).unwrap().status, MessageStatus::Failed);
    }

    #[test]
    fn test_requeue_only_from_failed() {
        let mut db = Database::open_in_memory().unwrap();
        let (message, entry) = queued_send(&mut db, 0);

        let err = db.requeue_failed_message(message.id, t(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        db.give_up_outbox_entry(&entry).unwrap();
        let requeued = db
            .requeue_failed_message(message.id, t(2) + Duration::seconds(1))
            .unwrap();
        assert_eq!(requeued.attempt_count, 0);
        assert_eq!(requeued.id, entry.id);
        assert_eq!(db.get_message(message.id).unwrap().status, MessageStatus::Sending);
    }

    #[test]
    fn test_cancel_fails_message_and_ack_still_lands() {
        let mut db = Database::open_in_memory().unwrap();
        let (message, entry) = queued_send(&mut db, 0);

        let removed = db.cancel_outbox_entry(entry.id).unwrap();
        assert_eq!(removed.map(|e| e.id), Some(entry.id));
        assert_eq!(db.get_message(message.id).unwrap().status, MessageStatus::Failed);
        assert!(db.cancel_outbox_entry(entry.id).unwrap().is_none());

        // The request was already in flight and the server accepted it.
        let landed = db
            .complete_outbox_entry(&entry, &Ack { server_updated_at: Some(t(3)) })
            .unwrap()
            .unwrap();
        assert_eq!(landed.status, MessageStatus::Sent);
        assert!(!landed.local_only);
    }

    #[test]
    fn test_delete_message_drops_its_entry() {
        let mut db = Database::open_in_memory().unwrap();
        let (message, entry) = queued_send(&mut db, 0);

        assert!(db.delete_message(message.id).unwrap());
        assert!(db.get_outbox_entry(entry.id).unwrap().is_none());
    }
}
