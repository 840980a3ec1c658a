//! Partitioning and duplicate classification
//!
//! Both functions are pure: the same snapshot always yields the same plan.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Duration;
use tracing::{debug, info};

use crate::reconcile::policy::DuplicatePolicy;
use crate::session::{Session, SessionId, UserId};

/// Why a session was selected for retirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Created within the duplicate window of the next more recent session
    WithinWindow,
    /// Gap was outside the window but the user is over the session cap
    OverCap,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::WithinWindow => write!(f, "within window"),
            DuplicateReason::OverCap => write!(f, "over cap"),
        }
    }
}

/// One session selected for retirement
#[derive(Debug, Clone, PartialEq)]
pub struct RetirementCandidate {
    pub session_id: SessionId,
    pub user_id: UserId,
    /// Position in the user's partition, most recent first (always >= 1)
    pub position: usize,
    /// Time between this session and the next more recent one
    pub gap: Duration,
    pub reason: DuplicateReason,
}

impl RetirementCandidate {
    pub fn gap_minutes(&self) -> f64 {
        self.gap.num_milliseconds() as f64 / 60_000.0
    }
}

/// Result of classifying one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetirementPlan {
    pub sessions_scanned: usize,
    pub partitions: usize,
    pub candidates: Vec<RetirementCandidate>,
}

impl RetirementPlan {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.candidates.iter().map(|c| c.session_id.clone()).collect()
    }

    /// Sessions left active by this plan
    pub fn kept(&self) -> usize {
        self.sessions_scanned - self.candidates.len()
    }
}

/// Groups active sessions by owning user, each group most recent first.
///
/// Equal timestamps keep their input order. Inactive sessions are dropped.
pub fn partition_by_user(sessions: &[Session]) -> BTreeMap<UserId, Vec<Session>> {
    let mut partitions: BTreeMap<UserId, Vec<Session>> = BTreeMap::new();

    for session in sessions {
        if !session.is_active {
            debug!(session_id = %session.id, "Ignoring inactive session");
            continue;
        }
        partitions
            .entry(session.user_id.clone())
            .or_default()
            .push(session.clone());
    }

    for group in partitions.values_mut() {
        // sort_by is stable
        group.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    partitions
}

/// Selects the sessions to retire from a snapshot of active sessions
pub fn classify(sessions: &[Session], policy: &DuplicatePolicy) -> RetirementPlan {
    let partitions = partition_by_user(sessions);
    let sessions_scanned: usize = partitions.values().map(Vec::len).sum();
    let mut candidates = Vec::new();

    for (user_id, group) in &partitions {
        debug!(user_id = %user_id, sessions = group.len(), "Classifying partition");
        let over_cap = policy.exceeds_cap(group.len());

        for (position, pair) in group.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let gap = previous.created_at - current.created_at;

            let reason = if policy.is_within_window(gap) {
                DuplicateReason::WithinWindow
            } else if over_cap {
                DuplicateReason::OverCap
            } else {
                continue;
            };

            let candidate = RetirementCandidate {
                session_id: current.id.clone(),
                user_id: user_id.clone(),
                position: position + 1,
                gap,
                reason,
            };
            debug!(
                user_id = %user_id,
                session_id = %candidate.session_id,
                gap_minutes = candidate.gap_minutes(),
                reason = %reason,
                "Marking duplicate session for retirement"
            );
            candidates.push(candidate);
        }
    }

    info!(
        sessions_scanned = sessions_scanned,
        partitions = partitions.len(),
        duplicates = candidates.len(),
        "Classification complete"
    );

    RetirementPlan {
        sessions_scanned,
        partitions: partitions.len(),
        candidates,
    }
}
