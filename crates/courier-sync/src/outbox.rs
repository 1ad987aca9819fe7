//! Delivery of queued local writes.
//!
//! Every user action that must reach the server becomes an [`OutboxEntry`]
//! in the local store first. [`OutboxManager::flush`] then delivers entries
//! oldest-first, retrying transient failures with exponential backoff until
//! the retry ceiling, at which point the entry is given up and its message
//! marked `failed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use courier_shared::{
    ConversationId, MessageId, MessageStatus, OutboxEntryId, OutboxPayload, UserId,
};
use courier_store::{Conversation, LocalStore, Message, OutboxEntry};

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::{Result, TransportError};
use crate::events::{EngineEvent, EventBus};
use crate::flight::FlightGuard;
use crate::network::NetworkMonitor;
use crate::transport::Transport;

/// Counts from one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    /// Transient failures still below the retry ceiling.
    pub retried: usize,
    /// Entries given up (ceiling reached or rejected).
    pub failed: usize,
    /// Entries still waiting out their backoff.
    pub deferred: usize,
    /// Connectivity dropped before the snapshot was exhausted.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Offline,
    /// Another flush is in flight; this call did nothing.
    AlreadyRunning,
    Completed(FlushReport),
}

impl FlushOutcome {
    pub fn report(&self) -> Option<&FlushReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

enum Attempt {
    Delivered,
    Retry,
    GaveUp,
}

pub struct OutboxManager {
    store: LocalStore,
    transport: Arc<dyn Transport>,
    network: NetworkMonitor,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    events: EventBus,
    flushing: AtomicBool,
}

impl OutboxManager {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn Transport>,
        network: NetworkMonitor,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            transport,
            network,
            policy,
            clock,
            events,
            flushing: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Queue operations
    // ------------------------------------------------------------------

    /// Queue an entry. A message send also stores its message, in the same
    /// transaction, so a `local_only` message never exists without its
    /// entry.
    pub fn enqueue(&self, entry: OutboxEntry) -> Result<()> {
        match &entry.payload {
            OutboxPayload::SendMessage {
                message_id,
                conversation_id,
                sender_id,
                content,
                created_at,
            } => {
                let message = Message {
                    id: *message_id,
                    conversation_id: conversation_id.clone(),
                    sender_id: sender_id.clone(),
                    content: content.clone(),
                    created_at: *created_at,
                    server_updated_at: None,
                    status: MessageStatus::Sending,
                    local_only: true,
                };
                self.store
                    .with(|db| db.enqueue_message_send(&message, &entry))?;
            }
            _ => self.store.with(|db| db.enqueue(&entry))?,
        }

        tracing::debug!(entry_id = %entry.id, kind = %entry.kind, "Outbox entry queued");
        Ok(())
    }

    /// Compose a message, queue it and try to deliver it right away.
    /// Returns the message as stored after the attempt.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> Result<Message> {
        let message = Message::outgoing(conversation_id, sender_id, content, self.clock.now());
        let entry = OutboxEntry::new(message.send_payload(), message.created_at);
        self.store
            .with(|db| db.enqueue_message_send(&message, &entry))?;
        tracing::debug!(message_id = %message.id, "Message queued");

        if self.network.is_online() {
            self.flush().await?;
        }

        Ok(self.store.with(|db| db.get_message(message.id))?)
    }

    /// Zero the local unread counter and queue a read receipt for the server.
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        up_to: Option<MessageId>,
    ) -> Result<Conversation> {
        let now = self.clock.now();
        let entry = OutboxEntry::new(
            OutboxPayload::ReadReceipt {
                conversation_id: conversation_id.clone(),
                up_to,
                read_at: now,
            },
            now,
        );

        let conversation = self.store.with(|db| {
            let conversation = db.mark_conversation_read(conversation_id)?;
            db.enqueue(&entry)?;
            Ok(conversation)
        })?;
        Ok(conversation)
    }

    /// User retry of a `failed` message.
    pub fn retry(&self, message_id: MessageId) -> Result<OutboxEntry> {
        let now = self.clock.now();
        let entry = self
            .store
            .with(|db| db.requeue_failed_message(message_id, now))?;

        tracing::info!(message_id = %message_id, "Message re-queued by user");
        self.emit_status(message_id)?;
        Ok(entry)
    }

    /// Remove an entry that has not been delivered. A request already in
    /// flight is not retracted. Returns `false` if nothing was queued.
    pub fn cancel(&self, id: OutboxEntryId) -> Result<bool> {
        let removed = self.store.with(|db| db.cancel_outbox_entry(id))?;
        let Some(entry) = removed else {
            return Ok(false);
        };

        tracing::info!(entry_id = %id, kind = %entry.kind, "Outbox entry cancelled");
        if let Some(message_id) = entry.message_id() {
            self.emit_status(message_id)?;
        }
        Ok(true)
    }

    /// Queued entries, oldest first.
    pub fn pending(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self.store.with(|db| db.list_outbox())?)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Deliver every eligible entry queued when the pass starts.
    ///
    /// Each outcome is committed on its own, so an interrupted pass keeps
    /// the progress it made. Local storage failures abort the pass and are
    /// returned; transport failures never are.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        if !self.network.is_online() {
            tracing::debug!("Offline, flush skipped");
            return Ok(FlushOutcome::Offline);
        }
        let Some(_guard) = FlightGuard::acquire(&self.flushing) else {
            tracing::debug!("Flush already running");
            return Ok(FlushOutcome::AlreadyRunning);
        };

        let snapshot = self.store.with(|db| db.list_outbox())?;
        let mut report = FlushReport::default();
        tracing::debug!(queued = snapshot.len(), "Flushing outbox");

        for queued in snapshot {
            if !self.network.is_online() {
                tracing::info!("Connectivity lost, flush interrupted");
                report.interrupted = true;
                break;
            }

            // Cancelled or replaced since the snapshot was taken.
            let current = self.store.with(|db| db.get_outbox_entry(queued.id))?;
            let Some(entry) = current.filter(|e| e.enqueued_at == queued.enqueued_at) else {
                continue;
            };

            if !self.policy.is_eligible(&entry, self.clock.now()) {
                report.deferred += 1;
                continue;
            }

            match self.attempt(&entry).await? {
                Attempt::Delivered => report.delivered += 1,
                Attempt::Retry => report.retried += 1,
                Attempt::GaveUp => report.failed += 1,
            }
        }

        tracing::debug!(
            delivered = report.delivered,
            retried = report.retried,
            failed = report.failed,
            deferred = report.deferred,
            "Flush finished"
        );
        Ok(FlushOutcome::Completed(report))
    }

    async fn attempt(&self, entry: &OutboxEntry) -> Result<Attempt> {
        let result = self.transport.send_message(&entry.payload).await;

        match result {
            Ok(ack) => {
                let updated = self
                    .store
                    .with(|db| db.complete_outbox_entry(entry, &ack))?;
                tracing::debug!(entry_id = %entry.id, "Outbox entry delivered");
                self.events.emit(EngineEvent::OutboxEntryDelivered {
                    entry_id: entry.id,
                    kind: entry.kind,
                });
                if let Some(message) = updated {
                    self.emit_message(&message);
                }
                Ok(Attempt::Delivered)
            }
            Err(TransportError::Transient(reason)) => {
                let attempts = entry.attempt_count + 1;
                if attempts >= self.policy.max_attempts {
                    tracing::warn!(
                        entry_id = %entry.id,
                        attempts,
                        error = %reason,
                        "Retry ceiling reached, giving up"
                    );
                    self.give_up(entry, reason)?;
                    return Ok(Attempt::GaveUp);
                }

                let now = self.clock.now();
                self.store.with(|db| {
                    db.record_outbox_failure(entry.id, attempts, now, &reason)
                })?;
                tracing::debug!(
                    entry_id = %entry.id,
                    attempts,
                    retry_in_ms = self.policy.delay_for(attempts).as_millis() as u64,
                    error = %reason,
                    "Transient delivery failure"
                );
                Ok(Attempt::Retry)
            }
            Err(TransportError::Rejected(reason)) => {
                tracing::warn!(entry_id = %entry.id, error = %reason, "Outbox entry rejected");
                self.give_up(entry, reason)?;
                Ok(Attempt::GaveUp)
            }
        }
    }

    fn give_up(&self, entry: &OutboxEntry, reason: String) -> Result<()> {
        let failed = self.store.with(|db| db.give_up_outbox_entry(entry))?;
        self.events.emit(EngineEvent::OutboxEntryFailed {
            entry_id: entry.id,
            kind: entry.kind,
            reason,
        });
        if let Some(message) = failed {
            self.emit_message(&message);
        }
        Ok(())
    }

    fn emit_status(&self, message_id: MessageId) -> Result<()> {
        if let Some(message) = self.store.with(|db| db.find_message(message_id))? {
            self.emit_message(&message);
        }
        Ok(())
    }

    fn emit_message(&self, message: &Message) {
        self.events.emit(EngineEvent::MessageStatusChanged {
            message_id: message.id,
            conversation_id: message.conversation_id.clone(),
            status: message.status,
        });
    }
}

impl std::fmt::Debug for OutboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxManager")
            .field("policy", &self.policy)
            .field("flushing", &self.is_flushing())
            .finish_non_exhaustive()
    }
}
