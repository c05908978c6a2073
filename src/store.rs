/// Auth/session store: the bearer credential and the active session id.
///
/// Both values survive restarts: they are written through to
/// `state.json` in the data directory on every change. Each can be cleared
/// independently. Empty strings and the sentinels `"null"` / `"undefined"`
/// are treated as absent on both read and write.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

pub struct AuthStore {
    /// None = in-memory only, nothing is written
    path: Option<PathBuf>,
    state: PersistedState,
}

/// Normalize a raw stored value: blank and sentinel strings mean "absent".
pub fn normalize(value: Option<&str>) -> Option<String> {
    let v = value?.trim();
    if v.is_empty() || v == "null" || v == "undefined" {
        None
    } else {
        Some(v.to_string())
    }
}

impl AuthStore {
    /// Open the store at `path`. A missing file is an empty store; a corrupt
    /// one is logged and treated as empty so a bad write can't lock the user out.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(s) => PersistedState {
                    access_token: normalize(s.access_token.as_deref()),
                    session_id: normalize(s.session_id.as_deref()),
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable state file");
                    PersistedState::default()
                }
            },
            Err(_) => PersistedState::default(),
        };
        Self { path: Some(path), state }
    }

    pub fn in_memory() -> Self {
        Self { path: None, state: PersistedState::default() }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Credential ────────────────────────────────────────────────────────────

    pub fn credential(&self) -> Option<&str> {
        self.state.access_token.as_deref()
    }

    pub fn set_credential(&mut self, token: &str) -> Result<()> {
        self.state.access_token = normalize(Some(token));
        self.flush()
    }

    // ── Active session ────────────────────────────────────────────────────────

    pub fn active_session(&self) -> Option<&str> {
        self.state.session_id.as_deref()
    }

    /// Persist `id` as the active session; blank/sentinel ids clear it.
    pub fn set_active_session(&mut self, id: &str) -> Result<()> {
        self.state.session_id = normalize(Some(id));
        self.flush()
    }

    pub fn clear_active_session(&mut self) -> Result<()> {
        self.state.session_id = None;
        self.flush()
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.state = PersistedState::default();
        self.flush()
    }

    // ── Disk ──────────────────────────────────────────────────────────────────

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(&self.state)?;
        // write-then-rename so a crash mid-write never leaves a torn file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}
