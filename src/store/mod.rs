//! Backing store access for the reconciler
//!
//! The reconciler never talks to a database directly. It sees the store
//! through the [`SessionStore`] trait, which exposes exactly the four bulk
//! operations a reconciliation run needs:
//!
//! - `fetch_active_sessions` for the snapshot to classify
//! - `bulk_set_inactive` for the flag flip
//! - `bulk_delete_messages_by_session` for the dependent cleanup
//! - `fetch_active_session_user_ids` for the closing summary
//!
//! [`RestStore`] talks to a Supabase/PostgREST endpoint. [`MemoryStore`]
//! keeps everything in process and can inject failures, which is what the
//! tests and benchmarks run against.

use std::fmt;

use crate::session::{Session, SessionId, UserId};

pub mod error;
pub mod memory;
pub mod rest;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use rest::RestStore;

/// The store operations a run can issue, used for logging and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    FetchActiveSessions,
    SetInactive,
    DeleteMessages,
    FetchActiveUserIds,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::FetchActiveSessions => "fetch_active_sessions",
            StoreOperation::SetInactive => "bulk_set_inactive",
            StoreOperation::DeleteMessages => "bulk_delete_messages_by_session",
            StoreOperation::FetchActiveUserIds => "fetch_active_session_user_ids",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait implemented by every session store
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns every session whose active flag is set, most recent first
    async fn fetch_active_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Clears the active flag of every listed session in one bulk update
    async fn bulk_set_inactive(&self, ids: &[SessionId]) -> Result<(), StoreError>;

    /// Deletes every message whose `session_id` is listed, in one bulk delete
    async fn bulk_delete_messages_by_session(&self, ids: &[SessionId]) -> Result<(), StoreError>;

    /// Returns the owning user id of each active session (one entry per session)
    async fn fetch_active_session_user_ids(&self) -> Result<Vec<UserId>, StoreError>;

    /// Short name used in logs
    fn store_name(&self) -> &'static str;
}
