use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::reconcile::policy::{DUPLICATE_WINDOW_MINUTES, DuplicatePolicy, MAX_SESSIONS_PER_USER, PolicyError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Base URL of the Supabase project, e.g. `https://abc.supabase.co`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_sessions_table")]
    pub sessions_table: String,

    #[serde(default = "default_messages_table")]
    pub messages_table: String,

    /// Rows requested per page when reading from the store
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Where retired-but-not-pruned session ids are recorded.
    /// Falls back to `~/.sessionsweep/pending_prune.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,

    #[serde(default = "default_window_minutes")]
    pub duplicate_window_minutes: i64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_user: usize,
}

fn default_sessions_table() -> String {
    "chat_sessions".to_string()
}

fn default_messages_table() -> String {
    "chat_messages".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_timeout() -> u64 {
    30
}

fn default_window_minutes() -> i64 {
    DUPLICATE_WINDOW_MINUTES
}

fn default_max_sessions() -> usize {
    MAX_SESSIONS_PER_USER
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: None,
            api_key: None,
            sessions_table: default_sessions_table(),
            messages_table: default_messages_table(),
            page_size: default_page_size(),
            timeout_seconds: default_timeout(),
            ledger_path: None,
            duplicate_window_minutes: default_window_minutes(),
            max_sessions_per_user: default_max_sessions(),
        }
    }
}

/// What can be logged about a configuration without leaking the key
#[derive(Debug, Clone, PartialEq)]
pub struct SafeConfigSummary {
    pub store_url: Option<String>,
    pub api_key_configured: bool,
    pub sessions_table: String,
    pub messages_table: String,
    pub ledger_path: Option<PathBuf>,
}

impl Config {
    /// The duplicate classification policy this configuration selects
    pub fn policy(&self) -> Result<DuplicatePolicy, PolicyError> {
        DuplicatePolicy::new(self.duplicate_window_minutes, self.max_sessions_per_user)
    }

    pub fn get_safe_summary(&self) -> SafeConfigSummary {
        SafeConfigSummary {
            store_url: self.store_url.clone(),
            api_key_configured: self.api_key.as_deref().is_some_and(|k| !k.is_empty()),
            sessions_table: self.sessions_table.clone(),
            messages_table: self.messages_table.clone(),
            ledger_path: self.ledger_path.clone(),
        }
    }
}
