//! Errors that halt a reconciliation run
//!
//! Every variant is fatal for the run. Each one says which store operation
//! failed, how many session ids it covered, and what state the store was
//! left in. Nothing is retried or rolled back.

use thiserror::Error;

use crate::reconcile::executor::RetirementState;
use crate::reconcile::ledger::LedgerError;
use crate::store::{StoreError, StoreOperation};

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Reading the snapshot failed; nothing was classified or written
    #[error("{operation} failed, nothing was classified: {source}")]
    Fetch {
        operation: StoreOperation,
        source: StoreError,
    },

    /// The flag flip failed; the store is unchanged
    #[error("bulk_set_inactive failed for {count} sessions, store left unchanged: {source}")]
    Update { count: usize, source: StoreError },

    /// Message cleanup failed after the flags were committed
    #[error(
        "bulk_delete_messages_by_session failed for {count} sessions (state: {state}), \
         sessions stay inactive and their messages remain: {source}"
    )]
    Delete {
        count: usize,
        state: RetirementState,
        source: StoreError,
    },

    /// The closing summary could not be read; the retirement itself completed
    #[error("{operation} failed after retirement completed: {source}")]
    Summary {
        operation: StoreOperation,
        source: StoreError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid retirement transition from {from} to {to}")]
    InvalidTransition {
        from: RetirementState,
        to: RetirementState,
    },
}

impl ReconcileError {
    /// Name of the store operation that failed, if a store call failed
    pub fn operation(&self) -> Option<StoreOperation> {
        match self {
            ReconcileError::Fetch { operation, .. } | ReconcileError::Summary { operation, .. } => {
                Some(*operation)
            }
            ReconcileError::Update { .. } => Some(StoreOperation::SetInactive),
            ReconcileError::Delete { .. } => Some(StoreOperation::DeleteMessages),
            ReconcileError::Ledger(_) | ReconcileError::InvalidTransition { .. } => None,
        }
    }

    /// Number of session ids the failed write covered
    pub fn affected_count(&self) -> Option<usize> {
        match self {
            ReconcileError::Update { count, .. } | ReconcileError::Delete { count, .. } => Some(*count),
            _ => None,
        }
    }

    /// Returns the store error behind this failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ReconcileError::Fetch { source, .. }
            | ReconcileError::Update { source, .. }
            | ReconcileError::Delete { source, .. }
            | ReconcileError::Summary { source, .. } => Some(source),
            _ => None,
        }
    }
}
