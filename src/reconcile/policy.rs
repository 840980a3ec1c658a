//! Duplicate classification policy
//!
//! Two rules decide whether a session is a duplicate of a more recent sibling
//! owned by the same user:
//!
//! - it was created at most [`DUPLICATE_WINDOW_MINUTES`] before that sibling
//! - its user holds more than [`MAX_SESSIONS_PER_USER`] active sessions
//!
//! The cap is a blanket rule. Once a partition exceeds it, every session but
//! the most recent is retired, whatever the gaps. How the two rules interact
//! and how equal timestamps are ordered are both left as they have always
//! behaved; change them here, deliberately, if ever.

use chrono::Duration;
use thiserror::Error;

/// Sessions created within this many minutes of a more recent sibling are duplicates
pub const DUPLICATE_WINDOW_MINUTES: i64 = 10;

/// Users with more active sessions than this keep only the most recent one
pub const MAX_SESSIONS_PER_USER: usize = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    #[error("duplicate_window_minutes must not be negative, got {0}")]
    NegativeWindow(i64),

    #[error("duplicate_window_minutes is out of range, got {0}")]
    WindowOutOfRange(i64),

    #[error("max_sessions_per_user must be at least 1")]
    ZeroCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicatePolicy {
    window: Duration,
    max_sessions_per_user: usize,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(DUPLICATE_WINDOW_MINUTES),
            max_sessions_per_user: MAX_SESSIONS_PER_USER,
        }
    }
}

impl DuplicatePolicy {
    /// Rejects a negative or unrepresentable window and a cap of zero
    pub fn new(window_minutes: i64, max_sessions_per_user: usize) -> Result<Self, PolicyError> {
        if window_minutes < 0 {
            return Err(PolicyError::NegativeWindow(window_minutes));
        }
        if max_sessions_per_user == 0 {
            return Err(PolicyError::ZeroCap);
        }
        let window =
            Duration::try_minutes(window_minutes).ok_or(PolicyError::WindowOutOfRange(window_minutes))?;

        Ok(Self {
            window,
            max_sessions_per_user,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_sessions_per_user(&self) -> usize {
        self.max_sessions_per_user
    }

    /// Inclusive: a gap of exactly the window is still a duplicate
    pub fn is_within_window(&self, gap: Duration) -> bool {
        gap <= self.window
    }

    /// Strict: a partition of exactly the cap is not over it
    pub fn exceeds_cap(&self, partition_size: usize) -> bool {
        partition_size > self.max_sessions_per_user
    }
}
