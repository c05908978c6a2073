use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::ControllerOptions;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Base URL of the chat backend
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Title given to sessions created with Ctrl+N
    #[serde(default = "default_title")]
    pub default_title: String,
    /// Characters of a reply revealed per tick
    #[serde(default = "default_reveal_chunk_chars")]
    pub reveal_chunk_chars: usize,
    #[serde(default = "default_reveal_interval_ms")]
    pub reveal_interval_ms: u64,
    /// Per-request timeout. Slow model replies count against this.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_title() -> String {
    "New chat".to_string()
}

fn default_reveal_chunk_chars() -> usize {
    3
}

fn default_reveal_interval_ms() -> u64 {
    24
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            default_title: default_title(),
            reveal_chunk_chars: default_reveal_chunk_chars(),
            reveal_interval_ms: default_reveal_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
    /// Holds state.json and auralis.log
    pub data_dir: PathBuf,
    pub default_title: String,
    pub reveal_chunk_chars: usize,
    pub reveal_interval: Duration,
    pub request_timeout: Duration,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        data_dir_override: Option<&Path>,
    ) -> Self {
        let profile_name = profile_override.unwrap_or(&file.default_profile).to_string();

        let base = file.resolve_profile(profile_override).cloned().unwrap_or_default();

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint)
                .trim_end_matches('/')
                .to_string(),
            profile_name,
            data_dir: data_dir_override.map(Path::to_path_buf).unwrap_or_else(data_dir),
            default_title: base.default_title,
            reveal_chunk_chars: base.reveal_chunk_chars.max(1),
            reveal_interval: Duration::from_millis(base.reveal_interval_ms.max(1)),
            request_timeout: Duration::from_secs(base.request_timeout_secs),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("auralis.log")
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            default_title: self.default_title.clone(),
            reveal_chunk: self.reveal_chunk_chars,
            reveal_interval: self.reveal_interval,
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("auralis")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| home().map(|h| h.join(".config")))
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| home().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("auralis")
}

fn home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# Auralis configuration
# Run `auralis --init` to regenerate this file.

default_profile = "local"

# ── Local backend (default) ───────────────────────────────────────────────────
[profiles.local]
endpoint = "http://127.0.0.1:8000"
# default_title        = "New chat"
# request_timeout_secs = 30

# ── Reply reveal ─────────────────────────────────────────────────────────────
# Replies arrive whole and are revealed a few characters at a time.
# reveal_chunk_chars = 3
# reveal_interval_ms = 24

# ── Hosted backend ───────────────────────────────────────────────────────────
# [profiles.hosted]
# endpoint             = "https://chat.example.com"
# request_timeout_secs = 60
"#;
