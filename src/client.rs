use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ApiError;
use crate::history::{self, Message, ROLE_ASSISTANT};

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl SessionRef {
    /// Title when the server gave one, otherwise the id.
    pub fn label(&self) -> &str {
        self.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(&self.id)
    }
}

/// Assistant reply extracted from a send response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub role: String,
    pub content: String,
}

impl Reply {
    /// Accepts `{content, role?}` or `{reply}`. A non-empty `content` wins;
    /// otherwise `reply` is used. Either may come back empty; the caller
    /// decides what an empty reply means.
    pub fn from_body(body: &Value) -> Self {
        let content = body.get("content").and_then(Value::as_str).unwrap_or_default();
        if !content.is_empty() {
            let role = body
                .get("role")
                .and_then(Value::as_str)
                .filter(|r| !r.is_empty())
                .unwrap_or(ROLE_ASSISTANT);
            return Self { role: role.to_string(), content: content.to_string() };
        }
        let reply = body.get("reply").and_then(Value::as_str).unwrap_or_default();
        Self { role: ROLE_ASSISTANT.to_string(), content: reply.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Signup,
}

impl AuthMode {
    fn path(self) -> [&'static str; 3] {
        match self {
            AuthMode::Login => ["api", "auth", "login"],
            AuthMode::Signup => ["api", "auth", "signup"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AuthMode::Login => "login",
            AuthMode::Signup => "sign up",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            AuthMode::Login => AuthMode::Signup,
            AuthMode::Signup => AuthMode::Login,
        }
    }
}

// ── API trait ─────────────────────────────────────────────────────────────────

/// The remote chat service, as seen by the controller. `auth` is the bearer
/// credential to attach, if any.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Returns the access token.
    async fn authenticate(&self, mode: AuthMode, email: &str, password: &str) -> Result<String, ApiError>;
    async fn list_sessions(&self, auth: Option<&str>) -> Result<Vec<SessionRef>, ApiError>;
    async fn create_session(&self, auth: Option<&str>, title: &str) -> Result<SessionRef, ApiError>;
    async fn fetch_history(&self, auth: Option<&str>, session_id: &str) -> Result<Vec<Message>, ApiError>;
    async fn send_message(&self, auth: Option<&str>, session_id: &str, text: &str) -> Result<Reply, ApiError>;
}

// ── HTTP client ───────────────────────────────────────────────────────────────

pub struct HttpApi {
    http: reqwest::Client,
    pub endpoint: String,
}

impl HttpApi {
    pub fn new(endpoint: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, endpoint })
    }

    /// Endpoint plus `segments`, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ApiError::Transport(format!("Invalid endpoint {}: {e}", self.endpoint)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("Invalid endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        auth: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = self.url(segments)?;
        debug!(%method, %url, "request");

        let mut req = self
            .http
            .request(method, url)
            .header("Content-Type", "application/json");
        if let Some(token) = auth {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(b) = &body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = resp.text().await?;

        if !status.is_success() {
            debug!(status = status.as_u16(), body = %text, "request failed");
            return Err(ApiError::from_response(
                status.as_u16(),
                status.canonical_reason(),
                &text,
                retry_after,
            ));
        }

        if text.trim().is_empty() || status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ApiError::Malformed(format!("Server sent invalid JSON: {e}")))
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn authenticate(&self, mode: AuthMode, email: &str, password: &str) -> Result<String, ApiError> {
        let body = json!({ "email": email, "password": password });
        let data = self.request(Method::POST, &mode.path(), None, Some(body)).await?;
        data.get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Malformed("Server did not return an access token.".to_string()))
    }

    async fn list_sessions(&self, auth: Option<&str>) -> Result<Vec<SessionRef>, ApiError> {
        let data = self.request(Method::GET, &["api", "chat", "sessions"], auth, None).await?;
        Ok(parse_directory(&data))
    }

    async fn create_session(&self, auth: Option<&str>, title: &str) -> Result<SessionRef, ApiError> {
        let body = json!({ "title": title });
        let data = self.request(Method::POST, &["api", "chat", "sessions"], auth, Some(body)).await?;
        parse_created(&data)
    }

    async fn fetch_history(&self, auth: Option<&str>, session_id: &str) -> Result<Vec<Message>, ApiError> {
        let path = ["api", "sessions", session_id, "messages"];
        let data = self.request(Method::GET, &path, auth, None).await?;
        Ok(history::normalize_history(&data))
    }

    async fn send_message(&self, auth: Option<&str>, session_id: &str, text: &str) -> Result<Reply, ApiError> {
        let path = ["api", "chat", "sessions", session_id, "messages"];
        let body = json!({ "message": text });
        let data = self.request(Method::POST, &path, auth, Some(body)).await?;
        Ok(Reply::from_body(&data))
    }
}

// ── Response parsing ──────────────────────────────────────────────────────────

/// Keep server order; skip records without a string id and repeated ids.
fn parse_directory(data: &Value) -> Vec<SessionRef> {
    let Some(items) = data.as_array() else { return Vec::new() };
    let mut out: Vec<SessionRef> = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            continue;
        };
        if out.iter().any(|s| s.id == id) {
            continue;
        }
        let title = item.get("title").and_then(Value::as_str).map(str::to_string);
        out.push(SessionRef { id: id.to_string(), title });
    }
    out
}

fn parse_created(data: &Value) -> Result<SessionRef, ApiError> {
    let id = data
        .get("id")
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| ApiError::Malformed("Server did not return a session id.".to_string()))?;
    let title = data.get("title").and_then(Value::as_str).map(str::to_string);
    Ok(SessionRef { id, title })
}
