//! Sync passes: push the outbox, then pull server deltas.
//!
//! A pass is single-flight. Timer ticks and reconnects both go through
//! [`SyncScheduler::sync_now`], and a trigger that arrives while a pass is
//! running is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use courier_shared::constants::{CURSOR_CONVERSATIONS, CURSOR_USERS};
use courier_shared::ConversationId;
use courier_store::{Conversation, Database, LocalStore, Message, User};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{EngineEvent, EventBus};
use crate::flight::FlightGuard;
use crate::network::NetworkMonitor;
use crate::outbox::{FlushOutcome, OutboxManager};
use crate::resolver::Resolve;
use crate::transport::{Page, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// What one pass did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub flush: Option<FlushOutcome>,
    pub messages_applied: usize,
    pub conversations_synced: usize,
    /// Conversations whose pull failed; their cursors did not move.
    pub conversations_failed: Vec<(ConversationId, String)>,
    pub conversations_applied: usize,
    pub users_applied: usize,
    /// Failures outside per-conversation pulls (outbox, conversation list,
    /// users).
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.conversations_failed.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum PassOutcome {
    AlreadyRunning,
    Offline,
    Completed(SyncReport),
}

pub struct SyncScheduler {
    store: LocalStore,
    transport: Arc<dyn Transport>,
    outbox: Arc<OutboxManager>,
    network: NetworkMonitor,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    syncing: AtomicBool,
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn Transport>,
        outbox: Arc<OutboxManager>,
        network: NetworkMonitor,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            transport,
            outbox,
            network,
            config,
            clock,
            events,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Run one pass unless one is already running.
    ///
    /// Pull failures are collected in the report and never fail the pass,
    /// including storage errors inside one conversation's pull. Storage
    /// errors elsewhere are returned; the scheduler is idle again either
    /// way.
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        let Some(_guard) = FlightGuard::acquire(&self.syncing) else {
            tracing::debug!("Sync pass already running");
            return Ok(PassOutcome::AlreadyRunning);
        };
        if !self.network.is_online() {
            tracing::debug!("Offline, sync pass skipped");
            return Ok(PassOutcome::Offline);
        }

        tracing::debug!("Sync pass started");
        let mut report = SyncReport::default();

        // 1. Push.
        match self.outbox.flush().await {
            Ok(outcome) => report.flush = Some(outcome),
            Err(SyncError::Store(e)) => return Err(e.into()),
            Err(e) => report.errors.push(e.to_string()),
        }

        // 2. Messages of every known conversation.
        let conversations = self.store.with(|db| db.list_conversation_ids())?;
        for conversation_id in conversations {
            match self.pull_conversation(&conversation_id).await {
                Ok(applied) => {
                    report.messages_applied += applied;
                    report.conversations_synced += 1;
                }
                // Any failure, transport or a bad local row, stays with
                // this conversation.
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id.as_str(),
                        error = %e,
                        "Conversation pull failed"
                    );
                    report
                        .conversations_failed
                        .push((conversation_id, e.to_string()));
                }
            }
        }

        // 3. Conversation list and users.
        match self.pull_conversation_list().await {
            Ok(applied) => report.conversations_applied = applied,
            Err(SyncError::Transport(e)) => {
                tracing::warn!(error = %e, "Conversation list pull failed");
                report.errors.push(format!("conversations: {e}"));
            }
            Err(e) => return Err(e),
        }
        match self.pull_users().await {
            Ok(applied) => report.users_applied = applied,
            Err(SyncError::Transport(e)) => {
                tracing::warn!(error = %e, "User pull failed");
                report.errors.push(format!("users: {e}"));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            messages = report.messages_applied,
            conversations = report.conversations_applied,
            users = report.users_applied,
            failed = report.conversations_failed.len(),
            "Sync pass finished"
        );
        self.events.emit(EngineEvent::SyncCompleted {
            messages_applied: report.messages_applied,
            conversations_applied: report.conversations_applied,
            users_applied: report.users_applied,
            failed_conversations: report.conversations_failed.len(),
        });

        Ok(PassOutcome::Completed(report))
    }

    /// Drive passes until `shutdown` receives a value or its sender is
    /// dropped: one per `sync_interval` tick and one per offline→online
    /// transition.
    pub async fn run(self: Arc<Self>, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity = self.network.watch();
        let mut watching = true;

        tracing::info!(
            interval_secs = self.config.sync_interval.as_secs(),
            "Sync scheduler running"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass("timer").await;
                }
                changed = connectivity.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    self.events.emit(EngineEvent::ConnectivityChanged { online });
                    if online {
                        self.run_pass("reconnect").await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sync scheduler stopping");
                    break;
                }
            }
        }
    }

    async fn run_pass(&self, trigger: &'static str) {
        match self.sync_now().await {
            Ok(PassOutcome::Completed(report)) if !report.is_clean() => {
                tracing::debug!(trigger, "Sync pass finished with failures");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(trigger, error = %e, "Sync pass failed"),
        }
    }

    // ------------------------------------------------------------------
    // Pulls
    // ------------------------------------------------------------------

    async fn pull_conversation(&self, conversation_id: &ConversationId) -> Result<usize> {
        let key = conversation_id.to_cursor_key();
        let local_user = self.config.local_user.clone();
        self.pull_stream(
            &key,
            |since| self.transport.fetch_conversation_delta(conversation_id, since),
            |db, items, cursor, now| {
                db.apply_messages(items, cursor, now, local_user.as_ref(), Message::resolve)
            },
        )
        .await
    }

    async fn pull_conversation_list(&self) -> Result<usize> {
        self.pull_stream(
            CURSOR_CONVERSATIONS,
            |since| self.transport.fetch_conversations_delta(since),
            |db, items, cursor, now| db.apply_conversations(items, cursor, now, Conversation::resolve),
        )
        .await
    }

    async fn pull_users(&self) -> Result<usize> {
        self.pull_stream(
            CURSOR_USERS,
            |since| self.transport.fetch_users_delta(since),
            |db, items, cursor, now| db.apply_users(items, cursor, now, User::resolve),
        )
        .await
    }

    /// Follow one cursor: fetch pages since the stored cursor and commit
    /// each page together with its new cursor. A failed fetch leaves the
    /// cursor at the last committed page.
    async fn pull_stream<T, Fetch, Fut, Apply>(
        &self,
        key: &str,
        fetch: Fetch,
        apply: Apply,
    ) -> Result<usize>
    where
        Fetch: Fn(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, crate::error::TransportError>>,
        Apply: Fn(
            &mut Database,
            &[T],
            Option<(&str, &str)>,
            chrono::DateTime<chrono::Utc>,
        ) -> courier_store::Result<usize>,
    {
        let mut since = self.store.with(|db| db.get_cursor(key))?;
        let mut applied = 0;

        for _ in 0..self.config.max_pages_per_pass {
            let page = fetch(since.clone()).await?;
            let next = page.cursor.clone().or_else(|| since.clone());
            let now = self.clock.now();

            applied += self.store.with(|db| {
                apply(
                    db,
                    &page.items,
                    next.as_deref().map(|value| (key, value)),
                    now,
                )
            })?;

            tracing::trace!(cursor = key, items = page.items.len(), "Delta page applied");
            since = next;
            if !page.has_more {
                break;
            }
        }

        Ok(applied)
    }
}
