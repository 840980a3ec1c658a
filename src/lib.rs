//! sessionsweep: batch cleanup of duplicate chat sessions
//!
//! Reads every active session from the backing store, groups them per user,
//! retires the ones classified as duplicates and deletes their messages.

pub mod cli;
pub mod config;
pub mod reconcile;
pub mod session;
pub mod store;
