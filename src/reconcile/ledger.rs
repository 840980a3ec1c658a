//! Pending-prune ledger
//!
//! Once sessions are marked inactive they drop out of every later scan, so a
//! failed message cleanup would otherwise leave their messages orphaned for
//! good. The ledger records those session ids on disk between the two
//! retirement steps; the next run prunes whatever is still listed before it
//! fetches anything.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::session::SessionId;

const LEDGER_FILE: &str = "pending_prune.json";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to access prune ledger {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Prune ledger {path:?} is corrupted: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    recorded_at: Option<DateTime<Utc>>,
    session_ids: Vec<SessionId>,
}

/// Durable list of sessions marked inactive whose messages are not yet deleted
#[derive(Debug, Clone)]
pub struct PruneLedger {
    path: PathBuf,
}

impl PruneLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.sessionsweep/pending_prune.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".sessionsweep").join(LEDGER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Returns the pending ids; a missing ledger means nothing is pending
    pub async fn load(&self) -> Result<Vec<SessionId>, LedgerError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let file: LedgerFile = serde_json::from_str(&json).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = ?self.path, pending = file.session_ids.len(), "Loaded prune ledger");
        Ok(file.session_ids)
    }

    /// Adds ids to the ledger, keeping whatever is already pending
    pub async fn record(&self, ids: &[SessionId]) -> Result<(), LedgerError> {
        let mut session_ids = self.load().await?;
        for id in ids {
            if !session_ids.contains(id) {
                session_ids.push(id.clone());
            }
        }

        let file = LedgerFile {
            recorded_at: Some(Utc::now()),
            session_ids,
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        fs::write(&self.path, json).await.map_err(|e| self.io_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, permissions)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        info!(path = ?self.path, pending = file.session_ids.len(), "Recorded sessions pending message pruning");
        Ok(())
    }

    /// Forgets every pending id
    pub async fn clear(&self) -> Result<(), LedgerError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = ?self.path, "Cleared prune ledger");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
