//! Conflict resolution between a locally stored entity and the server's copy.
//!
//! Pure functions: deterministic, no I/O, and `resolve(x, x) == x`.

use std::cmp::Ordering;

use courier_store::{Conversation, Message, User};

/// Pick the version to keep when `local` and `server` describe the same id.
pub trait Resolve: Sized {
    fn resolve(local: &Self, server: &Self) -> Self;
}

impl Resolve for Message {
    fn resolve(local: &Self, server: &Self) -> Self {
        resolve_message(local, server)
    }
}

impl Resolve for Conversation {
    fn resolve(local: &Self, server: &Self) -> Self {
        resolve_conversation(local, server)
    }
}

impl Resolve for User {
    fn resolve(local: &Self, server: &Self) -> Self {
        resolve_user(local, server)
    }
}

/// Messages still waiting on the server keep their local state. Otherwise
/// the newer `server_updated_at` wins (absent is older than any timestamp)
/// and the status never moves down the lattice.
pub fn resolve_message(local: &Message, server: &Message) -> Message {
    if local.local_only {
        return local.clone();
    }

    // Option orders None below Some.
    match local.server_updated_at.cmp(&server.server_updated_at) {
        Ordering::Greater => local.clone(),
        Ordering::Less | Ordering::Equal => Message {
            status: local.status.max(server.status),
            local_only: false,
            ..server.clone()
        },
    }
}

/// Newer `updated_at` wins, ties go to the server. The unread counter is
/// always local and a newer local summary survives an older winner.
pub fn resolve_conversation(local: &Conversation, server: &Conversation) -> Conversation {
    let mut merged = if local.updated_at > server.updated_at {
        local.clone()
    } else {
        server.clone()
    };

    merged.unread_count = local.unread_count;

    if let Some(local_summary) = &local.last_message {
        let newer = merged
            .last_message
            .as_ref()
            .map_or(true, |winner| local_summary.at > winner.at);
        if newer {
            merged.updated_at = merged.updated_at.max(local_summary.at);
            merged.last_message = Some(local_summary.clone());
        }
    }

    merged
}

pub fn resolve_user(_local: &User, server: &User) -> User {
    server.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use courier_shared::{ConversationId, MessageId, MessageStatus, Presence, UserId};
    use courier_store::MessageSummary;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn synced(at: Option<i64>, status: MessageStatus, content: &str) -> Message {
        Message {
            id: MessageId(uuid_for(1)),
            conversation_id: ConversationId::new("c1"),
            sender_id: UserId::new("bob"),
            content: content.into(),
            created_at: t(0),
            server_updated_at: at.map(t),
            status,
            local_only: false,
        }
    }

    fn uuid_for(n: u128) -> uuid::Uuid {
        uuid::Uuid::from_u128(n)
    }

    fn conversation(updated: i64, unread: u32, summary_at: Option<i64>) -> Conversation {
        Conversation {
            id: ConversationId::new("c1"),
            participants: vec![UserId::new("alice"), UserId::new("bob")],
            last_message: summary_at.map(|at| MessageSummary {
                message_id: MessageId(uuid_for(at as u128)),
                sender_id: UserId::new("bob"),
                preview: format!("at {at}"),
                at: t(at),
            }),
            updated_at: t(updated),
            unread_count: unread,
        }
    }

    #[test]
    fn test_equal_timestamps_take_higher_status() {
        let local = synced(Some(100), MessageStatus::Delivered, "hi");
        let server = synced(Some(100), MessageStatus::Sent, "hi");

        let merged = resolve_message(&local, &server);
        assert_eq!(merged.status, MessageStatus::Delivered);
        assert_eq!(merged, resolve_message(&local, &server));
    }

    #[test]
    fn test_equal_timestamps_server_ahead_in_lattice() {
        let local = synced(Some(100), MessageStatus::Sent, "hi");
        let server = synced(Some(100), MessageStatus::Delivered, "hi");

        let merged = resolve_message(&local, &server);
        assert_eq!(merged.status, MessageStatus::Delivered);
        assert_eq!(merged.server_updated_at, Some(t(100)));
    }

    #[test]
    fn test_message_newer_side_wins() {
        let local = synced(Some(50), MessageStatus::Sent, "old");
        let server = synced(Some(60), MessageStatus::Delivered, "edited");
        assert_eq!(resolve_message(&local, &server).content, "edited");

        let local = synced(Some(70), MessageStatus::Sent, "local");
        assert_eq!(resolve_message(&local, &server), local);

        let unsynced = synced(None, MessageStatus::Sent, "no ts");
        assert_eq!(resolve_message(&unsynced, &server).content, "edited");
    }

    #[test]
    fn test_newer_server_never_lowers_status() {
        let local = synced(Some(50), MessageStatus::Read, "hi");
        let server = synced(Some(60), MessageStatus::Sent, "hi");
        assert_eq!(resolve_message(&local, &server).status, MessageStatus::Read);
    }

    #[test]
    fn test_local_only_message_is_untouched() {
        let mut local = synced(None, MessageStatus::Sending, "draft");
        local.local_only = true;
        let server = synced(Some(10), MessageStatus::Sent, "draft");
        assert_eq!(resolve_message(&local, &server), local);
    }

    #[test]
    fn test_resolve_is_identity_on_equal_inputs() {
        let m = synced(Some(5), MessageStatus::Delivered, "x");
        assert_eq!(resolve_message(&m, &m), m);

        let c = conversation(10, 3, Some(8));
        assert_eq!(resolve_conversation(&c, &c), c);

        let u = User {
            id: UserId::new("bob"),
            display_name: Some("Bob".into()),
            avatar_url: None,
            presence: Presence::Online,
            last_seen_at: None,
            updated_at: t(1),
        };
        assert_eq!(resolve_user(&u, &u), u);
    }

    #[test]
    fn test_unread_count_survives_newer_server_conversation() {
        let local = conversation(50, 3, Some(50));
        let server = conversation(60, 0, Some(60));

        let merged = resolve_conversation(&local, &server);
        assert_eq!(merged.unread_count, 3);
        assert_eq!(merged.updated_at, t(60));
        assert_eq!(merged.last_message, server.last_message);
    }

    #[test]
    fn test_newer_local_summary_is_spliced_in() {
        let local = conversation(40, 1, Some(90));
        let server = conversation(80, 0, Some(70));

        let merged = resolve_conversation(&local, &server);
        assert_eq!(merged.participants, server.participants);
        assert_eq!(merged.last_message, local.last_message);
        assert_eq!(merged.updated_at, t(90));
        assert_eq!(merged.unread_count, 1);
    }

    #[test]
    fn test_conversation_tie_goes_to_server() {
        let mut local = conversation(50, 2, None);
        local.participants.push(UserId::new("carol"));
        let server = conversation(50, 0, None);

        let merged = resolve_conversation(&local, &server);
        assert_eq!(merged.participants, server.participants);
        assert_eq!(merged.unread_count, 2);
    }

    #[test]
    fn test_user_server_always_wins() {
        let local = User {
            id: UserId::new("bob"),
            display_name: Some("Local".into()),
            avatar_url: None,
            presence: Presence::Away,
            last_seen_at: None,
            updated_at: t(100),
        };
        let server = User {
            display_name: Some("Server".into()),
            updated_at: t(1),
            ..local.clone()
        };
        assert_eq!(resolve_user(&local, &server), server);
    }
}
