//! The [`Client`] facade: one explicitly constructed engine per signed-in
//! user, and the only write path for the UI layer.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use courier_shared::{ConversationId, MessageId, OutboxEntryId};
use courier_store::{Conversation, Database, LocalStore, Message, OutboxEntry, User};
use courier_sync::{
    Clock, EngineEvent, EventBus, NetworkMonitor, OutboxManager, PassOutcome, SyncScheduler,
    SystemClock, Transport,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::http::HttpTransport;
use crate::probe::{self, HealthCheck};

struct Task {
    name: &'static str,
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Client {
    config: ClientConfig,
    store: LocalStore,
    network: NetworkMonitor,
    events: EventBus,
    outbox: Arc<OutboxManager>,
    scheduler: Arc<SyncScheduler>,
    probe: Arc<dyn HealthCheck>,
    tasks: Mutex<Vec<Task>>,
}

impl Client {
    /// Open the configured database and connect to the configured server.
    pub fn open(config: ClientConfig) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        let transport = Arc::new(HttpTransport::new(&config)?);
        tracing::info!(server = %transport.base_url(), "Client configured");
        Ok(Self::with_parts(config, LocalStore::new(db), transport))
    }

    /// Wire the engine around an existing store and transport.
    pub fn with_parts(config: ClientConfig, store: LocalStore, transport: Arc<HttpTransport>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let network = NetworkMonitor::new(false);
        let events = EventBus::default();
        let dyn_transport: Arc<dyn Transport> = transport.clone();

        let outbox = Arc::new(OutboxManager::new(
            store.clone(),
            dyn_transport.clone(),
            network.clone(),
            config.sync.retry.clone(),
            clock.clone(),
            events.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            store.clone(),
            dyn_transport,
            outbox.clone(),
            network.clone(),
            config.sync.clone(),
            clock,
            events.clone(),
        ));

        Self {
            config,
            store,
            network,
            events,
            outbox,
            scheduler,
            probe: transport,
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the sync scheduler and the heartbeat. Calling it again while
    /// running does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let (stop, rx) = mpsc::channel(1);
        let handle = tokio::spawn(Arc::clone(&self.scheduler).run(rx));
        tasks.push(Task {
            name: "scheduler",
            stop,
            handle,
        });

        let (stop, rx) = mpsc::channel(1);
        let handle = tokio::spawn(probe::run_heartbeat(
            Arc::clone(&self.probe),
            self.network.clone(),
            self.config.heartbeat_interval,
            rx,
        ));
        tasks.push(Task {
            name: "heartbeat",
            stop,
            handle,
        });

        tracing::info!("Client started");
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<Task> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        for task in tasks {
            let _ = task.stop.send(()).await;
            if let Err(e) = task.handle.await {
                tracing::error!(task = task.name, error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Client stopped");
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Send as the configured local user.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<Message> {
        let sender = self
            .config
            .sync
            .local_user
            .clone()
            .ok_or(ClientError::NoLocalUser)?;
        Ok(self
            .outbox
            .send_message(conversation_id, sender, content)
            .await?)
    }

    /// Mark everything in the conversation read, up to its newest message.
    pub fn mark_read(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        let newest = self
            .store
            .with(|db| db.list_messages_page(conversation_id, 1, 0))?
            .into_iter()
            .next()
            .map(|m| m.id);
        Ok(self.outbox.mark_read(conversation_id, newest)?)
    }

    pub fn retry(&self, message_id: MessageId) -> Result<()> {
        self.outbox.retry(message_id)?;
        Ok(())
    }

    /// Cancel a queued send. Returns `false` if it was no longer queued.
    pub fn cancel(&self, message_id: MessageId) -> Result<bool> {
        Ok(self.outbox.cancel(OutboxEntryId::from(message_id))?)
    }

    /// Delete a message locally, dropping its queued send if any.
    pub fn delete_message(&self, message_id: MessageId) -> Result<bool> {
        Ok(self.store.with(|db| db.delete_message(message_id))?)
    }

    pub async fn sync_now(&self) -> Result<PassOutcome> {
        Ok(self.scheduler.sync_now().await?)
    }

    /// Connectivity report from an OS hook.
    pub fn set_online(&self, online: bool) {
        self.network.set_online(online);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.store.with(|db| db.list_conversations())?)
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        Ok(self.store.with(|db| db.list_by_conversation(conversation_id))?)
    }

    /// Newest-first page of a conversation's history.
    pub fn messages_page(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        Ok(self
            .store
            .with(|db| db.list_messages_page(conversation_id, limit, offset))?)
    }

    pub fn users(&self) -> Result<Vec<User>> {
        Ok(self.store.with(|db| db.list_users())?)
    }

    pub fn pending(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self.outbox.pending()?)
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }
}
