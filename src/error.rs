/// Structured errors returned by the API client.
///
/// Every non-success response is normalized into one of these variants so
/// call sites can branch on the kind (`Unauthorized` always logs out,
/// `NotFound` means the session vanished) without inspecting raw bodies.
/// The `{status, code, message}` triple is available on every variant.
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// 401: the credential is missing, expired or rejected.
    #[error("{message}")]
    Unauthorized { code: String, message: String },

    /// 404: the addressed resource does not exist (or is not ours).
    #[error("{message}")]
    NotFound { code: String, message: String },

    /// The server answered 2xx but the body is not what the contract says.
    #[error("{0}")]
    Malformed(String),

    /// Any other non-success status.
    #[error("{message}")]
    Status { status: u16, code: String, message: String },

    /// The request never produced a response (connect, timeout, decode).
    #[error("{0}")]
    Transport(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Malformed(_) | ApiError::Transport(_) => None,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ApiError::Unauthorized { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Status { code, .. } => code,
            ApiError::Malformed(_) => "MALFORMED_RESPONSE",
            ApiError::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Human-readable text suitable for the view's single error line.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Build an error from a non-success HTTP status and its raw body.
    pub fn from_response(status: u16, reason: Option<&str>, body: &str, retry_after: Option<u64>) -> Self {
        let parsed = parse_error_body(body);
        let fallback = reason.unwrap_or("Request failed").to_string();
        let (code, message) = match parsed {
            Some((code, message)) => (code, message.unwrap_or(fallback)),
            None => (None, fallback),
        };

        match status {
            401 => ApiError::Unauthorized {
                code: code.unwrap_or_else(|| "UNAUTHORIZED".to_string()),
                message,
            },
            404 => ApiError::NotFound {
                code: code.unwrap_or_else(|| "NOT_FOUND".to_string()),
                message,
            },
            _ => {
                let message = match retry_after {
                    Some(secs) if status == 429 => format!("{message} (retry in {secs}s)"),
                    _ => message,
                };
                ApiError::Status {
                    status,
                    code: code.unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
                    message,
                }
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Transport("Request timed out".to_string())
        } else if e.is_connect() {
            ApiError::Transport("Could not reach the server".to_string())
        } else if e.is_decode() {
            ApiError::Malformed(format!("Unreadable response: {e}"))
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

// ── Error body shapes ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EnvelopeBody {
    error: EnvelopeInner,
}

#[derive(Deserialize)]
struct EnvelopeInner {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct DetailBody {
    detail: serde_json::Value,
}

/// Accepts `{"error": {"code", "message"}}` and `{"detail": "..."}`.
/// Returns `(code, message)`; `None` if the body matches neither shape.
fn parse_error_body(body: &str) -> Option<(Option<String>, Option<String>)> {
    if let Ok(env) = serde_json::from_str::<EnvelopeBody>(body) {
        return Some((env.error.code, env.error.message));
    }
    if let Ok(d) = serde_json::from_str::<DetailBody>(body) {
        let message = match d.detail {
            serde_json::Value::String(s) => Some(s),
            // validation errors come back as a list of objects with "msg"
            serde_json::Value::Array(items) => items
                .iter()
                .find_map(|i| i.get("msg").and_then(|m| m.as_str()))
                .map(str::to_string),
            _ => None,
        };
        return Some((None, message));
    }
    None
}
