// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP/JSON client for the coding-agent runtime.
//!
//! Every call passes the job's workspace directory as a `directory` query
//! parameter so the runtime operates against the right sandbox. Basic auth
//! is applied whenever a password is configured.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 20;
const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Errors surfaced by the agent runtime client, typed by HTTP class
/// (transport/connect vs HTTP vs decode).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying HTTP transport failed (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The runtime responded with a non-2xx status.
    #[error("agent runtime returned HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, truncated if very large.
        body: String,
    },
    /// The response body could not be decoded as the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// `true` for the transient transport kinds the worker's outer loop
    /// retries (connect error, connect timeout, read timeout).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Configuration needed to construct an [`AgentClient`].
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// Base URL of the coding-agent runtime, e.g. `http://127.0.0.1:4096`.
    pub base_url: String,
    /// Basic-auth username, if the runtime requires authentication.
    pub username: Option<String>,
    /// Basic-auth password, if the runtime requires authentication.
    pub password: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Thin HTTP/JSON client over the coding-agent runtime's local API.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

/// Model selector paired on a prompt (`providerID`/`modelID` both present or
/// both absent — enforced by the orchestrator, not this client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelector {
    /// Model provider id.
    #[serde(rename = "providerID")]
    pub provider_id: String,
    /// Model id.
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// A single pending permission request surfaced by `GET /permission`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionRequest {
    /// Runtime-assigned request id.
    pub id: String,
    /// Permission kind, e.g. `"edit"`, `"shell.execute"`, `"file.write"`.
    pub permission: String,
    /// Patterns the request applies to — paths, globs, or opaque tokens.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Additional metadata, notably `command` for shell requests.
    #[serde(default)]
    pub metadata: PermissionMetadata,
    /// The session this request belongs to.
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

/// Free-form metadata attached to a permission request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PermissionMetadata {
    /// The shell command string, when `permission` is a shell-execution kind.
    pub command: Option<String>,
}

/// One entry of `GET /session/status`'s `{ <sessionID>: {type, ...} }` map.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionStatusEntry {
    /// Runtime-reported status tag, e.g. `"idle"`, `"retry"`, `"working"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Everything else the runtime attached, kept for logging/payloads.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SessionStatusEntry {
    /// `true` when `kind == "idle"`.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.kind == "idle"
    }

    /// `true` when `kind == "retry"`.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.kind == "retry"
    }
}

/// One message entry from `GET /session/{sid}/message`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentMessage {
    /// Best-effort plain-text content, when the runtime's message shape
    /// carries one directly.
    #[serde(default)]
    pub content: Option<String>,
    /// The full message payload, in case callers need more than `content`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AgentClient {
    /// Builds a client with connection pool limits mirroring a
    /// `max_connections=100, max_keepalive=20` HTTP client configuration.
    pub fn new(config: AgentClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn maybe_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.password {
            Some(password) => builder.basic_auth(self.username.as_deref().unwrap_or(""), Some(password)),
            None => builder,
        }
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.maybe_auth(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn send_ok(&self, builder: reqwest::RequestBuilder) -> Result<(), ClientError> {
        let response = self.maybe_auth(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// `GET /global/health` — checks runtime liveness.
    pub async fn health(&self) -> Result<(), ClientError> {
        self.send_ok(self.http.get(self.url("/global/health"))).await
    }

    /// `POST /session` — creates a new session rooted at `directory`.
    /// Accepts either an `id` or `sessionID` key in the response body;
    /// errors if both are absent.
    pub async fn create_session(&self, directory: &str, title: &str) -> Result<String, ClientError> {
        let value: Value = self
            .send_json(
                self.http
                    .post(self.url("/session"))
                    .query(&[("directory", directory)])
                    .json(&serde_json::json!({ "title": title })),
            )
            .await?;
        value
            .get("id")
            .or_else(|| value.get("sessionID"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("session response missing both id and sessionID".to_string()))
    }

    /// `POST /session/{sid}/prompt_async` — submits a prompt asynchronously
    /// (fire-and-forget; the caller follows the session's event stream and
    /// polls status for progress).
    pub async fn prompt_async(
        &self,
        directory: &str,
        session_id: &str,
        prompt: &str,
        agent: &str,
        model: Option<ModelSelector>,
    ) -> Result<(), ClientError> {
        let mut body = serde_json::json!({
            "agent": agent,
            "parts": [{ "type": "text", "text": prompt }],
        });
        if let Some(model) = model {
            body["model"] = serde_json::to_value(model).expect("ModelSelector always serializes");
        }
        self.send_ok(
            self.http
                .post(self.url(&format!("/session/{session_id}/prompt_async")))
                .query(&[("directory", directory)])
                .json(&body),
        )
        .await
    }

    /// `GET /permission` — lists every permission request currently pending
    /// across all sessions rooted at `directory`. Callers filter by
    /// `sessionID` themselves (the executor only acts on its own session).
    pub async fn list_permissions(&self, directory: &str) -> Result<Vec<PermissionRequest>, ClientError> {
        self.send_json(
            self.http
                .get(self.url("/permission"))
                .query(&[("directory", directory)]),
        )
        .await
    }

    /// `POST /permission/{rid}/reply` — replies to a pending permission
    /// request with `once`, `always`, or `reject`.
    pub async fn reply_permission(
        &self,
        directory: &str,
        request_id: &str,
        reply: &str,
        message: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut body = serde_json::json!({ "reply": reply });
        if let Some(message) = message {
            body["message"] = Value::String(message.to_string());
        }
        self.send_ok(
            self.http
                .post(self.url(&format!("/permission/{request_id}/reply")))
                .query(&[("directory", directory)])
                .json(&body),
        )
        .await
    }

    /// `GET /session/status` — fetches every known session's current
    /// status, keyed by session id.
    pub async fn get_session_status(
        &self,
        directory: &str,
    ) -> Result<BTreeMap<String, SessionStatusEntry>, ClientError> {
        self.send_json(
            self.http
                .get(self.url("/session/status"))
                .query(&[("directory", directory)]),
        )
        .await
    }

    /// `GET /session/{sid}/message?limit=N` — fetches up to `limit` of the
    /// most recent messages from a session.
    pub async fn get_last_message(
        &self,
        directory: &str,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<AgentMessage>, ClientError> {
        self.send_json(
            self.http
                .get(self.url(&format!("/session/{session_id}/message")))
                .query(&[("directory", directory), ("limit", &limit.to_string())]),
        )
        .await
    }

    /// `POST /session/{sid}/abort` — aborts a running session.
    pub async fn abort_session(&self, directory: &str, session_id: &str) -> Result<(), ClientError> {
        self.send_ok(
            self.http
                .post(self.url(&format!("/session/{session_id}/abort")))
                .query(&[("directory", directory)]),
        )
        .await
    }

    /// `GET /file?path=...` — fetches metadata for a file visible to the
    /// runtime under `directory`.
    pub async fn read_file(&self, directory: &str, path: &str) -> Result<Value, ClientError> {
        self.send_json(
            self.http
                .get(self.url("/file"))
                .query(&[("directory", directory), ("path", path)]),
        )
        .await
    }

    /// `GET /file/content?path=...` — reads raw file bytes (not
    /// JSON-wrapped) from the runtime's filesystem view.
    pub async fn read_file_content(&self, directory: &str, path: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .maybe_auth(
                self.http
                    .get(self.url("/file/content"))
                    .query(&[("directory", directory), ("path", path)]),
            )
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        Ok(bytes.to_vec())
    }

    /// `GET /event` — opens the runtime's SSE feed for `directory`,
    /// returning the raw response so the caller can wrap its byte stream
    /// with `forge_event_bridge::decode_lines`. A short `read_timeout` is
    /// applied so a stalled feed surfaces as a retriable
    /// [`ClientError::Transport`] rather than hanging the caller forever.
    pub async fn open_event_stream(
        &self,
        directory: &str,
        read_timeout: Duration,
    ) -> Result<reqwest::Response, ClientError> {
        let response = self
            .maybe_auth(
                self.http
                    .get(self.url("/event"))
                    .query(&[("directory", directory)])
                    .timeout(read_timeout),
            )
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Caps the client never exceeds even under a burst of concurrent jobs.
#[must_use]
pub fn max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: String) -> AgentClient {
        AgentClient::new(AgentClientConfig {
            base_url,
            ..AgentClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn health_ok_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/global/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        client.health().await.unwrap();
    }

    #[tokio::test]
    async fn health_propagates_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/global/health"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn create_session_accepts_id_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(query_param("directory", "/tmp/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "sess-1"})))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let session_id = client.create_session("/tmp/job-1", "job-1").await.unwrap();
        assert_eq!(session_id, "sess-1");
    }

    #[tokio::test]
    async fn create_session_accepts_session_id_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"sessionID": "sess-2"})),
            )
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let session_id = client.create_session("/tmp/job-2", "job-2").await.unwrap();
        assert_eq!(session_id, "sess-2");
    }

    #[tokio::test]
    async fn create_session_errors_when_both_keys_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let err = client.create_session("/tmp/job-3", "job-3").await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn prompt_async_includes_model_only_when_given() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/sess-1/prompt_async"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        client
            .prompt_async("/tmp/job-1", "sess-1", "do the thing", "build", None)
            .await
            .unwrap();
        client
            .prompt_async(
                "/tmp/job-1",
                "sess-1",
                "do the thing",
                "build",
                Some(ModelSelector {
                    provider_id: "anthropic".to_string(),
                    model_id: "claude".to_string(),
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_permissions_decodes_pending_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/permission"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "perm-1", "permission": "shell.execute", "patterns": ["outputs/a.txt"],
                 "metadata": {"command": "rm -rf /"}, "sessionID": "sess-1"}
            ])))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let requests = client.list_permissions("/tmp/job-1").await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].permission, "shell.execute");
        assert_eq!(requests[0].session_id, "sess-1");
        assert_eq!(requests[0].metadata.command.as_deref(), Some("rm -rf /"));
    }

    #[tokio::test]
    async fn get_session_status_decodes_type_tagged_map() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sess-1": {"type": "idle"},
                "sess-2": {"type": "retry", "attempt": 2}
            })))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let status = client.get_session_status("/tmp/job-1").await.unwrap();
        assert!(status["sess-1"].is_idle());
        assert!(status["sess-2"].is_retry());
    }

    #[tokio::test]
    async fn get_last_message_returns_empty_vec_with_no_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/sess-1/message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        let messages = client.get_last_message("/tmp/job-1", "sess-1", 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn reply_permission_sends_reply_and_optional_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/permission/perm-1/reply"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client_for(server.uri());
        client
            .reply_permission("/tmp/job-1", "perm-1", "reject", Some("dangerous command"))
            .await
            .unwrap();
    }

    #[test]
    fn is_transient_is_false_for_http_and_decode_errors() {
        assert!(!ClientError::Http { status: 500, body: String::new() }.is_transient());
        assert!(!ClientError::Decode("x".to_string()).is_transient());
    }
}
