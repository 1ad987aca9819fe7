//! [`Transport`] over the server's JSON HTTP API.
//!
//! | Operation          | Request                                   |
//! |--------------------|-------------------------------------------|
//! | message send       | `POST /v1/conversations/{id}/messages`    |
//! | read receipt       | `POST /v1/conversations/{id}/read`        |
//! | custom action      | `POST /v1/actions/{name}`                 |
//! | message delta      | `GET  /v1/conversations/{id}/messages`    |
//! | conversation delta | `GET  /v1/conversations`                  |
//! | user delta         | `GET  /v1/users`                          |
//! | heartbeat          | `GET  /health`                            |
//!
//! Delta requests carry the stored cursor as `?since=`.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use courier_shared::{Ack, ConversationId, OutboxPayload};
use courier_store::{Conversation, Message, User};
use courier_sync::{Page, Transport, TransportError};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::probe::HealthCheck;

/// Longest server error body kept in a [`TransportError`].
const MAX_ERROR_BODY: usize = 200;

pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.server_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", config.server_url)))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(config.server_url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> std::result::Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Rejected(format!("Unusable base URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn outbox_url(&self, payload: &OutboxPayload) -> std::result::Result<Url, TransportError> {
        match payload {
            OutboxPayload::SendMessage {
                conversation_id, ..
            } => self.url(&["v1", "conversations", conversation_id.as_str(), "messages"]),
            OutboxPayload::ReadReceipt {
                conversation_id, ..
            } => self.url(&["v1", "conversations", conversation_id.as_str(), "read"]),
            OutboxPayload::Custom { name, .. } => self.url(&["v1", "actions", name.as_str()]),
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: Url,
        since: Option<String>,
    ) -> std::result::Result<Page<T>, TransportError> {
        let mut request = self.client.get(url);
        if let Some(since) = since.as_deref() {
            request = request.query(&[("since", since)]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        response
            .json::<Page<T>>()
            .await
            .map_err(|e| TransportError::Transient(format!("Invalid delta page: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_message(&self, payload: &OutboxPayload) -> std::result::Result<Ack, TransportError> {
        let url = self.outbox_url(payload)?;
        let response = self
            .authorize(self.client.post(url).json(payload))
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        // The server has accepted the write; a body we cannot read must not
        // turn that into a retry.
        let body = response.bytes().await.unwrap_or_default();
        if body.is_empty() {
            return Ok(Ack::default());
        }
        match serde_json::from_slice::<Ack>(&body) {
            Ok(ack) => Ok(ack),
            Err(e) => {
                tracing::warn!(kind = %payload.kind(), error = %e, "Unreadable ack body");
                Ok(Ack::default())
            }
        }
    }

    async fn fetch_conversation_delta(
        &self,
        conversation_id: &ConversationId,
        since: Option<String>,
    ) -> std::result::Result<Page<Message>, TransportError> {
        let url = self.url(&["v1", "conversations", conversation_id.as_str(), "messages"])?;
        self.get_page(url, since).await
    }

    async fn fetch_conversations_delta(
        &self,
        since: Option<String>,
    ) -> std::result::Result<Page<Conversation>, TransportError> {
        let url = self.url(&["v1", "conversations"])?;
        self.get_page(url, since).await
    }

    async fn fetch_users_delta(
        &self,
        since: Option<String>,
    ) -> std::result::Result<Page<User>, TransportError> {
        let url = self.url(&["v1", "users"])?;
        self.get_page(url, since).await
    }
}

#[async_trait]
impl HealthCheck for HttpTransport {
    async fn is_reachable(&self) -> bool {
        let Ok(url) = self.url(&["health"]) else {
            return false;
        };
        match self.authorize(self.client.get(url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Timeouts, 429 and server errors are worth retrying; any other refusal
/// is final.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let body: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        TransportError::Transient(detail)
    } else {
        TransportError::Rejected(detail)
    }
}

async fn check_status(response: Response) -> std::result::Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::Rejected(e.to_string())
    } else {
        TransportError::Transient(e.to_string())
    }
}
