// crates/tether-client/src/gateway.rs
// One-shot typed calls against the gateway HTTP surface

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tether_types::{
    ChannelHealthReport, HealthSummary, Message, MessageReceipt, MetricsSnapshot, ReloadReceipt,
    SessionInfo, SessionSendReceipt, StatusSummary,
};

use crate::error::{ClientError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Stateless request/response client for the gateway HTTP API.
///
/// Holds no mutable state: clone freely and call concurrently. Input
/// constraints (positive limits, non-empty session keys) are the caller's
/// responsibility. Every failure comes back as a [`ClientError`]; retry
/// policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    auth_token: Option<String>,
    http: Client,
}

impl GatewayClient {
    /// Create a client for the given base URL, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// GET /health: liveness probe.
    pub async fn health(&self) -> Result<HealthSummary> {
        self.get_json("/health").await
    }

    /// GET /api/status: gateway summary.
    pub async fn status(&self) -> Result<StatusSummary> {
        self.get_json("/api/status").await
    }

    /// GET /api/monitor/metrics: runtime counters.
    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        self.get_json("/api/monitor/metrics").await
    }

    /// GET /api/channels/health: per-channel health snapshot.
    pub async fn channel_health(&self) -> Result<ChannelHealthReport> {
        self.get_json("/api/channels/health").await
    }

    /// GET /api/sessions: most recently active sessions.
    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionInfo>> {
        let body: SessionsEnvelope = self.get_json(&format!("/api/sessions?limit={limit}")).await?;
        Ok(body.sessions)
    }

    /// GET /api/sessions/{key}/messages: message history for one session.
    pub async fn session_messages(&self, session_key: &str, limit: u32) -> Result<Vec<Message>> {
        let path = format!(
            "/api/sessions/{}/messages?limit={limit}",
            urlencoding::encode(session_key)
        );
        let body: MessagesEnvelope = self.get_json(&path).await?;
        Ok(body.messages)
    }

    /// POST /api/sessions/send: queue a message into an existing session.
    pub async fn send_session_message(
        &self,
        session_key: &str,
        message: &str,
        channel: &str,
    ) -> Result<SessionSendReceipt> {
        let body = SessionSendBody {
            session_key,
            message,
            channel,
        };
        let request = self.http.post(self.url("/api/sessions/send")).json(&body);
        decode(self.authorize(request).send().await?).await
    }

    /// POST /api/message: generic inbound message. Without a session key
    /// the gateway opens a fresh session.
    pub async fn send_message(
        &self,
        message: &str,
        session_key: Option<&str>,
    ) -> Result<MessageReceipt> {
        let body = MessageBody {
            message,
            session_key,
        };
        let request = self.http.post(self.url("/api/message")).json(&body);
        decode(self.authorize(request).send().await?).await
    }

    /// PUT /api/control/reload: ask the gateway to reload its config.
    pub async fn reload(&self) -> Result<ReloadReceipt> {
        let request = self.http.put(self.url("/api/control/reload"));
        decode(self.authorize(request).send().await?).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.http.get(self.url(path));
        decode(self.authorize(request).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else if status == StatusCode::UNAUTHORIZED {
        Err(ClientError::Auth)
    } else {
        Err(ClientError::HttpStatus(status.as_u16()))
    }
}

#[derive(Deserialize)]
struct SessionsEnvelope {
    sessions: Vec<SessionInfo>,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct SessionSendBody<'a> {
    session_key: &'a str,
    message: &'a str,
    channel: &'a str,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_key: Option<&'a str>,
}
