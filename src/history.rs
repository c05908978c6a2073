/// Chat messages and history normalization.
///
/// The history endpoint is loose about its shape: the body may be a bare
/// array of records or an object wrapping one under `messages`, and each
/// record may spell its role as `role`/`sender`/`type` and its text as
/// `content`/`message`/`text`. Everything is flattened into `Message` here
/// so the controller only ever sees one shape.
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_SYSTEM: &str = "system";

const ROLE_KEYS: &[&str] = &["role", "sender", "type"];
const CONTENT_KEYS: &[&str] = &["content", "message", "text"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned, or client-generated for optimistic/local entries
    pub id: String,
    /// Free-form: "user" | "assistant" | "system", or whatever the server sent
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn local(role: &str, content: impl Into<String>) -> Self {
        Self {
            id: client_id(role),
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == ROLE_USER
    }
}

static CLIENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Role prefix + nanosecond timestamp, plus a process counter so two ids
/// minted within the same clock tick still differ.
pub fn client_id(prefix: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = CLIENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{nanos}-{seq}")
}

// ── Normalization ─────────────────────────────────────────────────────────────

/// Flatten a history response body into messages. Shapes other than an
/// array or `{messages: [...]}` yield an empty log.
pub fn normalize_history(body: &Value) -> Vec<Message> {
    let items: &[Value] = match body {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("messages") {
            Some(Value::Array(items)) => items,
            _ => &[],
        },
        _ => &[],
    };

    items
        .iter()
        .enumerate()
        .map(|(i, record)| Message {
            id: first_present(record, &["id"]).unwrap_or_else(|| format!("history-{i}")),
            role: first_present(record, ROLE_KEYS).unwrap_or_else(|| "unknown".to_string()),
            content: first_present(record, CONTENT_KEYS).unwrap_or_default(),
        })
        .collect()
}

/// First key whose value is present and non-null. Strings are taken as-is
/// (an empty string still counts as present); scalars are stringified.
fn first_present(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match record.get(*k)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

// ── Merge ─────────────────────────────────────────────────────────────────────

/// An optimistic user message whose send hasn't settled, plus how many
/// identical user messages the log already held when it was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub message: Message,
    earlier: usize,
}

impl Pending {
    pub fn new(message: Message, log: &[Message]) -> Self {
        let earlier = count_user(log, &message.content);
        Self { message, earlier }
    }
}

fn count_user(log: &[Message], content: &str) -> usize {
    log.iter().filter(|m| m.is_user() && m.content == content).count()
}

/// Replace the log with the server's, then re-append optimistic user
/// messages the server doesn't know about yet. A pending message counts as
/// reflected only once the server holds more identical user records than
/// the log did when it was sent, so repeating an earlier line is not
/// mistaken for the earlier one.
pub fn merge_pending(server: Vec<Message>, pending: &[Pending]) -> Vec<Message> {
    let missing: Vec<Message> = pending
        .iter()
        .filter(|p| count_user(&server, &p.message.content) <= p.earlier)
        .map(|p| p.message.clone())
        .collect();

    let mut log = server;
    log.extend(missing);
    log
}
