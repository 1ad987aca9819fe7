//! In-process chat server used by the HTTP and client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;

use courier_shared::Ack;
use courier_store::{Conversation, Message, User};
use courier_sync::Page;

#[derive(Default)]
struct Inner {
    healthy: bool,
    send_status: Option<u16>,
    received: Vec<(String, serde_json::Value)>,
    auth: Vec<Option<String>>,
    messages: HashMap<String, Vec<Message>>,
    conversations: Vec<Conversation>,
    users: Vec<User>,
    queries: Vec<(String, Option<String>)>,
}

type Shared = Arc<Mutex<Inner>>;

#[derive(Deserialize)]
struct SinceQuery {
    since: Option<String>,
}

pub(crate) struct TestServer {
    pub url: String,
    state: Shared,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(Inner {
            healthy: true,
            ..Inner::default()
        }));

        let app = Router::new()
            .route("/health", get(health))
            .route(
                "/v1/conversations/:id/messages",
                get(message_delta).post(post_message),
            )
            .route("/v1/conversations/:id/read", post(post_read))
            .route("/v1/conversations", get(conversation_delta))
            .route("/v1/users", get(user_delta))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state, handle }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.state.lock().unwrap()
    }

    pub(crate) fn ack_time(&self) -> DateTime<Utc> {
        ack_time()
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.inner().healthy = healthy;
    }

    pub(crate) fn fail_sends_with(&self, status: u16) {
        self.inner().send_status = Some(status);
    }

    pub(crate) fn add_message(&self, message: Message) {
        self.inner()
            .messages
            .entry(message.conversation_id.0.clone())
            .or_default()
            .push(message);
    }

    pub(crate) fn add_conversation(&self, conversation: Conversation) {
        self.inner().conversations.push(conversation);
    }

    /// `(conversation id, JSON body)` of every accepted or refused write.
    pub(crate) fn received(&self) -> Vec<(String, serde_json::Value)> {
        self.inner().received.clone()
    }

    pub(crate) fn last_auth(&self) -> Option<String> {
        self.inner().auth.last().cloned().flatten()
    }

    pub(crate) fn queries(&self) -> Vec<(String, Option<String>)> {
        self.inner().queries.clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn ack_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_800_000_000, 0).unwrap()
}

/// Items past the numeric cursor; the new cursor is the total count.
fn page_after<T: Clone>(items: &[T], since: Option<&str>) -> Page<T> {
    let start = since
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(0)
        .min(items.len());
    Page::last(items[start..].to_vec(), Some(items.len().to_string()))
}

async fn health(State(state): State<Shared>) -> StatusCode {
    if state.lock().unwrap().healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn post_message(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Ack>, StatusCode> {
    let mut inner = state.lock().unwrap();
    inner.received.push((id, body));
    inner.auth.push(
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    );
    if let Some(code) = inner.send_status {
        return Err(StatusCode::from_u16(code).unwrap());
    }
    Ok(Json(Ack {
        server_updated_at: Some(ack_time()),
    }))
}

async fn post_read(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.lock().unwrap().received.push((id, body));
    StatusCode::NO_CONTENT
}

async fn message_delta(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Json<Page<Message>> {
    let mut inner = state.lock().unwrap();
    inner.queries.push((id.clone(), query.since.clone()));
    let items = inner.messages.get(&id).cloned().unwrap_or_default();
    Json(page_after(&items, query.since.as_deref()))
}

async fn conversation_delta(
    State(state): State<Shared>,
    Query(query): Query<SinceQuery>,
) -> Json<Page<Conversation>> {
    let mut inner = state.lock().unwrap();
    inner.queries.push(("conversations".into(), query.since.clone()));
    Json(page_after(&inner.conversations, query.since.as_deref()))
}

async fn user_delta(
    State(state): State<Shared>,
    Query(query): Query<SinceQuery>,
) -> Json<Page<User>> {
    let mut inner = state.lock().unwrap();
    inner.queries.push(("users".into(), query.since.clone()));
    Json(page_after(&inner.users, query.since.as_deref()))
}
