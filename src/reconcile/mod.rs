//! Duplicate session reconciliation
//!
//! A run is strictly sequential:
//!
//! 1. prune messages left over from an earlier interrupted run (ledger)
//! 2. fetch every active session
//! 3. classify duplicates per user ([`classify`])
//! 4. mark them inactive, then delete their messages ([`Retirement`])
//! 5. read back the active session and user counts ([`Summary`])
//!
//! The first failing step ends the run with a [`ReconcileError`].

use std::sync::Arc;

use tracing::{error, info, warn};

pub mod classify;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod policy;

pub use classify::{DuplicateReason, RetirementCandidate, RetirementPlan, classify, partition_by_user};
pub use error::ReconcileError;
pub use executor::{Retirement, RetirementState, Summary, fetch_summary};
pub use ledger::{LedgerError, PruneLedger};
pub use policy::{DUPLICATE_WINDOW_MINUTES, DuplicatePolicy, MAX_SESSIONS_PER_USER, PolicyError};

use crate::session::SessionId;
use crate::store::{SessionStore, StoreOperation};

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Sessions from an earlier run whose messages were pruned first
    pub resumed: usize,
    pub plan: RetirementPlan,
    /// `Planned` when there was nothing to retire
    pub state: RetirementState,
    /// Absent when there was nothing to retire
    pub summary: Option<Summary>,
}

impl RunReport {
    pub fn retired(&self) -> usize {
        match self.state {
            RetirementState::MessagesPruned => self.plan.len(),
            _ => 0,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn SessionStore>,
    policy: DuplicatePolicy,
    ledger: Option<PruneLedger>,
}

impl Reconciler {
    /// Creates a reconciler without a ledger
    pub fn new(store: Arc<dyn SessionStore>, policy: DuplicatePolicy) -> Self {
        Self {
            store,
            policy,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: PruneLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn policy(&self) -> &DuplicatePolicy {
        &self.policy
    }

    /// Fetches the active sessions and classifies them, writing nothing
    pub async fn plan(&self) -> Result<RetirementPlan, ReconcileError> {
        let sessions = self
            .store
            .fetch_active_sessions()
            .await
            .map_err(|source| ReconcileError::Fetch {
                operation: StoreOperation::FetchActiveSessions,
                source,
            })?;
        info!(count = sessions.len(), "Found active sessions");

        Ok(classify(&sessions, &self.policy))
    }

    /// Prunes messages of sessions an earlier run marked inactive but could
    /// not clean up. Returns how many sessions were resumed.
    pub async fn resume_pending(&self) -> Result<usize, ReconcileError> {
        let Some(ledger) = &self.ledger else {
            return Ok(0);
        };

        let pending = ledger.load().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let count = pending.len();
        warn!(
            count = count,
            ledger = ?ledger.path(),
            "Resuming message pruning for sessions retired by an earlier run"
        );
        let mut retirement = Retirement::resume(pending);
        retirement.prune_messages(self.store.as_ref()).await?;
        self.clear_pending().await;

        Ok(count)
    }

    async fn record_pending(&self, ids: &[SessionId]) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(ids).await {
                // The run goes on; only a failed prune would need this record
                error!(error = %e, count = ids.len(), "Failed to record sessions pending message pruning");
            }
        }
    }

    async fn clear_pending(&self) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.clear().await {
                // Stale entries only cause a redundant delete next run
                warn!(error = %e, "Failed to clear prune ledger");
            }
        }
    }

    /// Runs the whole pipeline once
    pub async fn run(&self) -> Result<RunReport, ReconcileError> {
        info!(store = self.store.store_name(), "Starting duplicate session cleanup");

        let resumed = self.resume_pending().await?;
        let plan = self.plan().await?;

        if plan.is_empty() {
            info!("No duplicate sessions found, nothing to do");
            return Ok(RunReport {
                resumed,
                plan,
                state: RetirementState::Planned,
                summary: None,
            });
        }

        info!(count = plan.len(), "Found duplicate sessions to clean up");
        let store = self.store.as_ref();
        let mut retirement = Retirement::new(plan.session_ids());

        retirement.mark_inactive(store).await?;
        self.record_pending(retirement.ids()).await;

        retirement.prune_messages(store).await?;
        self.clear_pending().await;

        info!(
            count = retirement.ids().len(),
            "Cleaned up duplicate sessions and their messages"
        );

        let summary = fetch_summary(store).await?;
        info!(
            active_sessions = summary.active_sessions,
            distinct_users = summary.distinct_users,
            "Final stats"
        );

        Ok(RunReport {
            resumed,
            plan,
            state: retirement.state(),
            summary: Some(summary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Message, Session};
    use crate::store::{MemoryStore, StoreError};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn store_with_duplicates() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_data(
            vec![
                Session::new("a-new", "alice", at(30)),
                Session::new("a-dup", "alice", at(25)),
                Session::new("b-only", "bob", at(0)),
            ],
            vec![
                Message::new("m1", "a-dup", "hi"),
                Message::new("m2", "a-new", "hello"),
                Message::new("m3", "b-only", "hey"),
            ],
        ))
    }

    #[tokio::test]
    async fn test_run_retires_duplicates() {
        let store = store_with_duplicates();
        let reconciler = Reconciler::new(store.clone(), DuplicatePolicy::default());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.retired(), 1);
        assert_eq!(report.state, RetirementState::MessagesPruned);
        assert_eq!(
            report.summary,
            Some(Summary {
                active_sessions: 2,
                distinct_users: 2
            })
        );
        assert!(!store.session(&SessionId::new("a-dup")).unwrap().is_active);
        assert_eq!(store.message_count(&SessionId::new("a-dup")), 0);
        assert_eq!(store.total_messages(), 2);
    }

    #[tokio::test]
    async fn test_nothing_to_do_issues_no_writes() {
        let store = Arc::new(MemoryStore::with_data(
            vec![Session::new("v1", "V", at(0)), Session::new("v2", "V", at(20))],
            vec![],
        ));
        let reconciler = Reconciler::new(store.clone(), DuplicatePolicy::default());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.retired(), 0);
        assert_eq!(report.state, RetirementState::Planned);
        assert!(report.summary.is_none());
        assert_eq!(store.calls(), vec![StoreOperation::FetchActiveSessions]);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_before_writes() {
        let store = store_with_duplicates();
        store.fail_on(StoreOperation::FetchActiveSessions, StoreError::auth("bad key"));
        let reconciler = Reconciler::new(store.clone(), DuplicatePolicy::default());

        let err = reconciler.run().await.unwrap_err();

        assert!(matches!(err, ReconcileError::Fetch { .. }));
        assert_eq!(store.calls(), vec![StoreOperation::FetchActiveSessions]);
    }

    #[tokio::test]
    async fn test_update_failure_skips_message_deletion() {
        let store = store_with_duplicates();
        store.fail_on(StoreOperation::SetInactive, StoreError::unavailable("read-only"));
        let reconciler = Reconciler::new(store.clone(), DuplicatePolicy::default());

        let err = reconciler.run().await.unwrap_err();

        assert_eq!(err.affected_count(), Some(1));
        assert!(!store.calls().contains(&StoreOperation::DeleteMessages));
        assert!(store.session(&SessionId::new("a-dup")).unwrap().is_active);
        assert_eq!(store.total_messages(), 3);
    }

    #[tokio::test]
    async fn test_summary_failure_is_reported_after_retirement() {
        let store = store_with_duplicates();
        store.fail_on(StoreOperation::FetchActiveUserIds, StoreError::network("reset"));
        let reconciler = Reconciler::new(store.clone(), DuplicatePolicy::default());

        let err = reconciler.run().await.unwrap_err();

        assert!(matches!(err, ReconcileError::Summary { .. }));
        assert_eq!(store.message_count(&SessionId::new("a-dup")), 0);
    }

    #[tokio::test]
    async fn test_ledger_resumes_interrupted_prune() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = PruneLedger::new(temp_dir.path().join("pending.json"));
        let store = store_with_duplicates();
        store.fail_on(StoreOperation::DeleteMessages, StoreError::network("reset"));
        let reconciler =
            Reconciler::new(store.clone(), DuplicatePolicy::default()).with_ledger(ledger.clone());

        // First run: flags flip, prune fails
        let err = reconciler.run().await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Delete {
                state: RetirementState::MarkedInactive,
                ..
            }
        ));
        assert_eq!(store.message_count(&SessionId::new("a-dup")), 1);
        assert_eq!(ledger.load().await.unwrap(), vec![SessionId::new("a-dup")]);

        // Second run: the orphaned messages go first, nothing new to retire
        store.clear_failure(StoreOperation::DeleteMessages);
        let report = reconciler.run().await.unwrap();

        assert_eq!(report.resumed, 1);
        assert_eq!(report.retired(), 0);
        assert_eq!(store.message_count(&SessionId::new("a-dup")), 0);
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_ledger_orphans_stay() {
        let store = store_with_duplicates();
        store.fail_on(StoreOperation::DeleteMessages, StoreError::network("reset"));
        let reconciler = Reconciler::new(store.clone(), DuplicatePolicy::default());

        assert!(reconciler.run().await.is_err());
        store.clear_failure(StoreOperation::DeleteMessages);

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.resumed, 0);
        assert_eq!(report.retired(), 0);
        // Known gap: the retired session no longer shows up in the active scan
        assert_eq!(store.message_count(&SessionId::new("a-dup")), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ledger_write_failure_does_not_stop_pruning() {
        let temp_dir = TempDir::new().unwrap();
        // Reads as missing, but writing through it fails: the target directory does not exist
        let path = temp_dir.path().join("pending.json");
        std::os::unix::fs::symlink(temp_dir.path().join("gone").join("pending.json"), &path).unwrap();
        let ledger = PruneLedger::new(path);
        assert!(ledger.record(&[SessionId::new("x")]).await.is_err());

        let store = store_with_duplicates();
        let reconciler =
            Reconciler::new(store.clone(), DuplicatePolicy::default()).with_ledger(ledger.clone());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.retired(), 1);
        assert_eq!(report.state, RetirementState::MessagesPruned);
        assert_eq!(store.message_count(&SessionId::new("a-dup")), 0);
        assert_eq!(
            store.calls(),
            vec![
                StoreOperation::FetchActiveSessions,
                StoreOperation::SetInactive,
                StoreOperation::DeleteMessages,
                StoreOperation::FetchActiveUserIds,
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_run_leaves_ledger_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = PruneLedger::new(temp_dir.path().join("pending.json"));
        let store = store_with_duplicates();
        let reconciler =
            Reconciler::new(store.clone(), DuplicatePolicy::default()).with_ledger(ledger.clone());

        reconciler.run().await.unwrap();
        assert!(!ledger.path().exists());
    }
}
