//! CRUD operations for [`Conversation`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use courier_shared::constants::SUMMARY_PREVIEW_CHARS;
use courier_shared::{ConversationId, MessageId, UserId};

use crate::codec::{conversion_err, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::cursors::write_cursor;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Conversation, MessageSummary};

const SELECT_CONVERSATION: &str = "SELECT id, participants, last_message_id, last_message_sender,
        last_message_preview, last_message_at, updated_at, unread_count
 FROM conversations";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace a conversation.
    ///
    /// If a stored message of this conversation is newer than the written
    /// summary, the summary is moved forward before the transaction commits.
    pub fn put_conversation(&mut self, conversation: &Conversation) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        upsert_conversation(&tx, conversation)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a conversation by id.  Returns `true` if a row was deleted.
    /// Messages are left in place; no cascade.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM conversations WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    /// Reset the local unread counter (the user has read the conversation).
    pub fn mark_conversation_read(&mut self, id: &ConversationId) -> Result<Conversation> {
        let affected = self.conn().execute(
            "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
            params![id.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_conversation(id)
    }

    /// Apply one page of server conversations plus its cursor atomically.
    ///
    /// See [`Database::apply_messages`] for the contract of `resolve`.
    pub fn apply_conversations<F>(
        &mut self,
        incoming: &[Conversation],
        cursor: Option<(&str, &str)>,
        now: DateTime<Utc>,
        resolve: F,
    ) -> Result<usize>
    where
        F: Fn(&Conversation, &Conversation) -> Conversation,
    {
        let tx = self.conn_mut().transaction()?;
        let mut written = 0;

        for server in incoming {
            let local = fetch_conversation(&tx, &server.id)?;
            let winner = match &local {
                Some(local) => resolve(local, server),
                None => server.clone(),
            };
            if local.as_ref() != Some(&winner) {
                upsert_conversation(&tx, &winner)?;
                written += 1;
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

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        fetch_conversation(self.conn(), id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        fetch_conversation(self.conn(), id)
    }

    /// List all conversations, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_CONVERSATION} ORDER BY updated_at DESC, id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Ids of every locally known conversation.
    pub fn list_conversation_ids(&self) -> Result<Vec<ConversationId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM conversations ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0).map(ConversationId))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn upsert_conversation(conn: &Connection, conversation: &Conversation) -> Result<()> {
    let participants = serde_json::to_string(&conversation.participants)?;
    let summary = conversation.last_message.as_ref();

    conn.execute(
        "INSERT INTO conversations (id, participants, last_message_id, last_message_sender,
                                    last_message_preview, last_message_at, updated_at, unread_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             participants         = excluded.participants,
             last_message_id      = excluded.last_message_id,
             last_message_sender  = excluded.last_message_sender,
             last_message_preview = excluded.last_message_preview,
             last_message_at      = excluded.last_message_at,
             updated_at           = excluded.updated_at,
             unread_count         = excluded.unread_count",
        params![
            conversation.id.as_str(),
            participants,
            summary.map(|s| s.message_id.0.to_string()),
            summary.map(|s| s.sender_id.as_str()),
            summary.map(|s| s.preview.as_str()),
            summary.map(|s| ts(&s.at)),
            ts(&conversation.updated_at),
            conversation.unread_count,
        ],
    )?;

    refresh_summary(conn, &conversation.id)
}

/// Point the conversation summary at the newest stored message.
///
/// A summary that refers to a stored message of this conversation is always
/// recomputed, since an ack can move that message's ordering timestamp
/// backwards. A summary for a message only the server has is replaced only
/// by a stored message at least as new.
pub(crate) fn refresh_summary(conn: &Connection, conversation_id: &ConversationId) -> Result<()> {
    let newest = conn
        .query_row(
            "SELECT id, sender_id, content, order_ts
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY order_ts DESC, id DESC
             LIMIT 1",
            params![conversation_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((message_id, sender_id, content, order_ts)) = newest else {
        return Ok(());
    };
    let preview: String = content.chars().take(SUMMARY_PREVIEW_CHARS).collect();

    conn.execute(
        "UPDATE conversations SET
             last_message_id      = ?2,
             last_message_sender  = ?3,
             last_message_preview = ?4,
             last_message_at      = ?5,
             updated_at           = MAX(updated_at, ?5)
         WHERE id = ?1
           AND (last_message_at IS NULL
                OR last_message_at <= ?5
                OR EXISTS (SELECT 1 FROM messages m
                           WHERE m.id = conversations.last_message_id
                             AND m.conversation_id = ?1))",
        params![conversation_id.as_str(), message_id, sender_id, preview, order_ts],
    )?;
    Ok(())
}

pub(crate) fn fetch_conversation(
    conn: &Connection,
    id: &ConversationId,
) -> Result<Option<Conversation>> {
    conn.query_row(
        &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
        params![id.as_str()],
        row_to_conversation,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let participants_json: String = row.get(1)?;
    let last_id: Option<String> = row.get(2)?;
    let last_sender: Option<String> = row.get(3)?;
    let last_preview: Option<String> = row.get(4)?;
    let last_at: Option<String> = row.get(5)?;
    let updated_str: String = row.get(6)?;
    let unread_count: u32 = row.get(7)?;

    let participants: Vec<UserId> =
        serde_json::from_str(&participants_json).map_err(|e| conversion_err(1, e))?;

    let last_message = match (last_id, parse_opt_ts(5, last_at)?) {
        (Some(id), Some(at)) => Some(MessageSummary {
            message_id: MessageId(parse_uuid(2, &id)?),
            sender_id: UserId(last_sender.unwrap_or_default()),
            preview: last_preview.unwrap_or_default(),
            at,
        }),
        _ => None,
    };

    Ok(Conversation {
        id: ConversationId(id),
        participants,
        last_message,
        updated_at: parse_ts(6, &updated_str)?,
        unread_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use chrono::TimeZone;
    use courier_shared::MessageStatus;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn conversation(id: &str, updated: i64) -> Conversation {
        Conversation {
            id: ConversationId::new(id),
            participants: vec![UserId::new("alice"), UserId::new("bob")],
            last_message: None,
            updated_at: t(updated),
            unread_count: 0,
        }
    }

    fn acked_message(conversation: &str, at: i64, content: &str) -> Message {
        let mut m = Message::outgoing(
            ConversationId::new(conversation),
            UserId::new("bob"),
            content,
            t(at),
        );
        m.server_updated_at = Some(t(at));
        m.status = MessageStatus::Sent;
        m.local_only = false;
        m
    }

    #[test]
    fn test_put_get_list() {
        let mut db = Database::open_in_memory().unwrap();
        db.put_conversation(&conversation("old", 1)).unwrap();
        db.put_conversation(&conversation("new", 5)).unwrap();

        let got = db.get_conversation(&ConversationId::new("old")).unwrap();
        assert_eq!(got, conversation("old", 1));

        let order: Vec<_> = db
            .list_conversations()
            .unwrap()
            .into_iter()
            .map(|c| c.id.0)
            .collect();
        assert_eq!(order, vec!["new".to_string(), "old".to_string()]);
        assert_eq!(db.list_conversation_ids().unwrap().len(), 2);

        assert!(db.delete_conversation(&ConversationId::new("old")).unwrap());
        assert!(matches!(
            db.get_conversation(&ConversationId::new("old")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_message_write_moves_summary_forward() {
        let mut db = Database::open_in_memory().unwrap();
        db.put_conversation(&conversation("c1", 0)).unwrap();

        let first = acked_message("c1", 10, "first");
        let second = acked_message("c1", 20, "second");
        db.put_message(&second).unwrap();
        db.put_message(&first).unwrap();

        let c = db.get_conversation(&ConversationId::new("c1")).unwrap();
        let summary = c.last_message.unwrap();
        assert_eq!(summary.message_id, second.id);
        assert_eq!(summary.preview, "second");
        assert_eq!(c.updated_at, t(20));
    }

    #[test]
    fn test_stale_conversation_write_keeps_newest_summary() {
        let mut db = Database::open_in_memory().unwrap();
        let newest = acked_message("c1", 30, "newest");
        db.put_conversation(&conversation("c1", 0)).unwrap();
        db.put_message(&newest).unwrap();

        // Server copy knows only an older message.
        let mut stale = conversation("c1", 25);
        stale.last_message = Some(MessageSummary {
            message_id: MessageId::new(),
            sender_id: UserId::new("bob"),
            preview: "older".into(),
            at: t(15),
        });
        db.put_conversation(&stale).unwrap();

        let c = db.get_conversation(&ConversationId::new("c1")).unwrap();
        assert_eq!(c.last_message.unwrap().message_id, newest.id);
        assert_eq!(c.updated_at, t(30));
    }

    #[test]
    fn test_summary_follows_newest_after_ack_moves_message_back() {
        let mut db = Database::open_in_memory().unwrap();
        db.put_conversation(&conversation("c1", 0)).unwrap();

        // Client clock ahead of the server: created at t100, acked at t50.
        let mut mine = Message::outgoing(
            ConversationId::new("c1"),
            UserId::new("alice"),
            "mine",
            t(100),
        );
        db.put_message(&mine).unwrap();
        mine.server_updated_at = Some(t(50));
        mine.status = MessageStatus::Sent;
        mine.local_only = false;
        db.put_message(&mine).unwrap();

        let c = db.get_conversation(&ConversationId::new("c1")).unwrap();
        assert_eq!(c.last_message.unwrap().at, t(50));

        let theirs = acked_message("c1", 80, "theirs");
        db.apply_messages(&[theirs.clone()], None, t(80), None, |_, s| s.clone())
            .unwrap();

        let newest = db
            .list_by_conversation(&ConversationId::new("c1"))
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(newest.id, theirs.id);
        let summary = db
            .get_conversation(&ConversationId::new("c1"))
            .unwrap()
            .last_message
            .unwrap();
        assert_eq!(summary.message_id, theirs.id);
        assert_eq!(summary.at, t(80));
    }

    #[test]
    fn test_mark_read() {
        let mut db = Database::open_in_memory().unwrap();
        let mut c = conversation("c1", 0);
        c.unread_count = 4;
        db.put_conversation(&c).unwrap();

        let read = db.mark_conversation_read(&c.id).unwrap();
        assert_eq!(read.unread_count, 0);
        assert!(matches!(
            db.mark_conversation_read(&ConversationId::new("missing")),
            Err(StoreError::NotFound)
        ));
    }
}
