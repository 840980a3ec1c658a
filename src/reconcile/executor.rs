//! Two-step retirement protocol
//!
//! ```text
//! Planned --bulk_set_inactive--> MarkedInactive --bulk_delete_messages--> MessagesPruned
//! ```
//!
//! A failure in the second step leaves the retirement in `MarkedInactive`:
//! the sessions are already excluded from later scans but their messages
//! are still in the store. That state is reported, never rolled back.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info};

use crate::reconcile::error::ReconcileError;
use crate::session::{SessionId, UserId};
use crate::store::{SessionStore, StoreOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetirementState {
    /// Selected for retirement, nothing written yet
    Planned,
    /// Active flags cleared, messages not yet deleted
    MarkedInactive,
    /// Active flags cleared and messages deleted
    MessagesPruned,
}

impl fmt::Display for RetirementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetirementState::Planned => "Planned",
            RetirementState::MarkedInactive => "MarkedInactive",
            RetirementState::MessagesPruned => "MessagesPruned",
        };
        f.write_str(name)
    }
}

/// A set of sessions moving through the retirement protocol
#[derive(Debug, Clone, PartialEq)]
pub struct Retirement {
    ids: Vec<SessionId>,
    state: RetirementState,
}

impl Retirement {
    pub fn new(ids: Vec<SessionId>) -> Self {
        Self {
            ids,
            state: RetirementState::Planned,
        }
    }

    /// Picks up sessions whose flags an earlier run already cleared
    pub fn resume(ids: Vec<SessionId>) -> Self {
        Self {
            ids,
            state: RetirementState::MarkedInactive,
        }
    }

    pub fn ids(&self) -> &[SessionId] {
        &self.ids
    }

    pub fn state(&self) -> RetirementState {
        self.state
    }

    fn check_transition(&self, from: RetirementState, to: RetirementState) -> Result<(), ReconcileError> {
        if self.state != from {
            return Err(ReconcileError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    /// Step 1: clear the active flag of every session in one bulk update
    pub async fn mark_inactive(&mut self, store: &dyn SessionStore) -> Result<(), ReconcileError> {
        self.check_transition(RetirementState::Planned, RetirementState::MarkedInactive)?;

        if self.ids.is_empty() {
            debug!("No sessions to mark inactive");
        } else {
            store
                .bulk_set_inactive(&self.ids)
                .await
                .map_err(|source| ReconcileError::Update {
                    count: self.ids.len(),
                    source,
                })?;
            info!(count = self.ids.len(), store = store.store_name(), "Marked sessions inactive");
        }

        self.state = RetirementState::MarkedInactive;
        Ok(())
    }

    /// Step 2: delete every message belonging to the retired sessions
    pub async fn prune_messages(&mut self, store: &dyn SessionStore) -> Result<(), ReconcileError> {
        self.check_transition(RetirementState::MarkedInactive, RetirementState::MessagesPruned)?;

        if self.ids.is_empty() {
            debug!("No sessions to prune messages for");
        } else {
            store
                .bulk_delete_messages_by_session(&self.ids)
                .await
                .map_err(|source| ReconcileError::Delete {
                    count: self.ids.len(),
                    state: self.state,
                    source,
                })?;
            info!(count = self.ids.len(), store = store.store_name(), "Deleted messages of retired sessions");
        }

        self.state = RetirementState::MessagesPruned;
        Ok(())
    }
}

/// Active-session statistics read back after a retirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub active_sessions: usize,
    pub distinct_users: usize,
}

impl Summary {
    pub fn from_user_ids(user_ids: &[UserId]) -> Self {
        let distinct: HashSet<&UserId> = user_ids.iter().collect();
        Self {
            active_sessions: user_ids.len(),
            distinct_users: distinct.len(),
        }
    }
}

/// Re-reads the active sessions and counts them per user
pub async fn fetch_summary(store: &dyn SessionStore) -> Result<Summary, ReconcileError> {
    let user_ids = store
        .fetch_active_session_user_ids()
        .await
        .map_err(|source| ReconcileError::Summary {
            operation: StoreOperation::FetchActiveUserIds,
            source,
        })?;
    Ok(Summary::from_user_ids(&user_ids))
}
