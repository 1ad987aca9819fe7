//! Scripted transport and harness for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use courier_shared::{Ack, ConversationId, OutboxPayload};
use courier_store::{Conversation, LocalStore, Message, User};

use crate::clock::{Clock, ManualClock};
use crate::config::SyncConfig;
use crate::error::TransportError;
use crate::events::EventBus;
use crate::network::NetworkMonitor;
use crate::outbox::OutboxManager;
use crate::transport::{Page, Transport};

pub(crate) fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

type Scripted<T> = VecDeque<Result<T, TransportError>>;

#[derive(Default)]
struct Script {
    sends: Scripted<Ack>,
    message_pages: HashMap<String, Scripted<Page<Message>>>,
    conversation_pages: Scripted<Page<Conversation>>,
    user_pages: Scripted<Page<User>>,
    sent: Vec<OutboxPayload>,
    since: Vec<(String, Option<String>)>,
}

/// Transport whose responses are queued up front. Unscripted sends succeed
/// with an ack at the fake server time; unscripted pulls return an empty
/// last page.
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<Script>,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
    server_time: Mutex<Option<DateTime<Utc>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn push_send(&self, result: Result<Ack, TransportError>) {
        self.script().sends.push_back(result);
    }

    pub(crate) fn push_message_page(
        &self,
        conversation: &str,
        result: Result<Page<Message>, TransportError>,
    ) {
        self.script()
            .message_pages
            .entry(conversation.to_string())
            .or_default()
            .push_back(result);
    }

    pub(crate) fn push_conversation_page(&self, result: Result<Page<Conversation>, TransportError>) {
        self.script().conversation_pages.push_back(result);
    }

    pub(crate) fn push_user_page(&self, result: Result<Page<User>, TransportError>) {
        self.script().user_pages.push_back(result);
    }

    pub(crate) fn set_server_time(&self, at: DateTime<Utc>) {
        *self.server_time.lock().unwrap() = Some(at);
    }

    /// Block every send until the returned handle is notified.
    pub(crate) fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Resolves once a send has reached the transport.
    pub(crate) async fn send_started(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn sent(&self) -> Vec<OutboxPayload> {
        self.script().sent.clone()
    }

    /// `(stream, since)` of every pull, in call order.
    pub(crate) fn pulls(&self) -> Vec<(String, Option<String>)> {
        self.script().since.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(&self, payload: &OutboxPayload) -> Result<Ack, TransportError> {
        self.script().sent.push(payload.clone());
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.script().sends.pop_front();
        scripted.unwrap_or_else(|| {
            Ok(Ack {
                server_updated_at: *self.server_time.lock().unwrap(),
            })
        })
    }

    async fn fetch_conversation_delta(
        &self,
        conversation_id: &ConversationId,
        since: Option<String>,
    ) -> Result<Page<Message>, TransportError> {
        let mut script = self.script();
        script
            .since
            .push((format!("conversation:{}", conversation_id.as_str()), since.clone()));
        script
            .message_pages
            .get_mut(conversation_id.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Page::last(Vec::new(), since)))
    }

    async fn fetch_conversations_delta(
        &self,
        since: Option<String>,
    ) -> Result<Page<Conversation>, TransportError> {
        let mut script = self.script();
        script.since.push(("conversations".into(), since.clone()));
        script
            .conversation_pages
            .pop_front()
            .unwrap_or_else(|| Ok(Page::last(Vec::new(), since)))
    }

    async fn fetch_users_delta(&self, since: Option<String>) -> Result<Page<User>, TransportError> {
        let mut script = self.script();
        script.since.push(("users".into(), since.clone()));
        script
            .user_pages
            .pop_front()
            .unwrap_or_else(|| Ok(Page::last(Vec::new(), since)))
    }
}

/// Fully wired engine over an in-memory store.
pub(crate) struct Harness {
    pub store: LocalStore,
    pub transport: Arc<FakeTransport>,
    pub network: NetworkMonitor,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub config: SyncConfig,
}

impl Harness {
    pub(crate) fn new(online: bool) -> Self {
        Self {
            store: LocalStore::open_in_memory().unwrap(),
            transport: FakeTransport::new(),
            network: NetworkMonitor::new(online),
            clock: Arc::new(ManualClock::new(t(0))),
            events: EventBus::default(),
            config: SyncConfig::default(),
        }
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub(crate) fn outbox(&self) -> Arc<OutboxManager> {
        Arc::new(OutboxManager::new(
            self.store.clone(),
            self.transport.clone(),
            self.network.clone(),
            self.config.retry.clone(),
            self.clock(),
            self.events.clone(),
        ))
    }
}
