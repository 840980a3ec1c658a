//! In-process session store
//!
//! Holds sessions and messages behind a mutex and applies the same filtering
//! and ordering a real store would. Failures can be injected per operation so
//! every step of the retirement protocol can be exercised.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::session::{Message, Session, SessionId, UserId};
use crate::store::{SessionStore, StoreError, StoreOperation};

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<Session>,
    messages: Vec<Message>,
    failures: HashMap<StoreOperation, StoreError>,
    calls: Vec<StoreOperation>,
}

/// Session store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with sessions and messages
    pub fn with_data(sessions: Vec<Session>, messages: Vec<Message>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                sessions,
                messages,
                ..MemoryState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_session(&self, session: Session) {
        self.lock().sessions.push(session);
    }

    pub fn insert_message(&self, message: Message) {
        self.lock().messages.push(message);
    }

    /// Makes every subsequent call of `operation` fail with `error`
    pub fn fail_on(&self, operation: StoreOperation, error: StoreError) {
        self.lock().failures.insert(operation, error);
    }

    /// Removes an injected failure
    pub fn clear_failure(&self, operation: StoreOperation) {
        self.lock().failures.remove(&operation);
    }

    /// Operations issued so far, in order (failed calls included)
    pub fn calls(&self) -> Vec<StoreOperation> {
        self.lock().calls.clone()
    }

    /// Returns a copy of a session regardless of its active flag
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.lock().sessions.iter().find(|s| &s.id == id).cloned()
    }

    /// Number of messages still referencing the session
    pub fn message_count(&self, id: &SessionId) -> usize {
        self.lock()
            .messages
            .iter()
            .filter(|m| &m.session_id == id)
            .count()
    }

    pub fn total_messages(&self) -> usize {
        self.lock().messages.len()
    }

    fn begin(&self, operation: StoreOperation) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.lock();
        state.calls.push(operation);
        if let Some(error) = state.failures.get(&operation) {
            debug!(operation = %operation, "Injected failure");
            return Err(error.clone());
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn fetch_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let state = self.begin(StoreOperation::FetchActiveSessions)?;
        let mut active: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn bulk_set_inactive(&self, ids: &[SessionId]) -> Result<(), StoreError> {
        let mut state = self.begin(StoreOperation::SetInactive)?;
        let targets: HashSet<&SessionId> = ids.iter().collect();
        for session in state.sessions.iter_mut() {
            if targets.contains(&session.id) {
                session.is_active = false;
            }
        }
        Ok(())
    }

    async fn bulk_delete_messages_by_session(&self, ids: &[SessionId]) -> Result<(), StoreError> {
        let mut state = self.begin(StoreOperation::DeleteMessages)?;
        let targets: HashSet<&SessionId> = ids.iter().collect();
        state.messages.retain(|m| !targets.contains(&m.session_id));
        Ok(())
    }

    async fn fetch_active_session_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let state = self.begin(StoreOperation::FetchActiveUserIds)?;
        Ok(state
            .sessions
            .iter()
            .filter(|s| s.is_active)
            .map(|s| s.user_id.clone())
            .collect())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
