//! quicksave-core - Core library for Quicksave
//!
//! This crate contains the save/save-state synchronization engine of the
//! Quicksave game-library launcher: the local cache database, the
//! local/remote reconciler, and the launch/session sync protocol shared by
//! every front-end.

pub mod capture;
pub mod db;
pub mod emulator;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod restore;
pub mod slots;
pub mod sync;
pub mod version;

pub use error::{Error, Result};
pub use models::{Game, SaveCache, StateCache, UnifiedSaveEntry, UnifiedStateEntry};

/// Current unix time in milliseconds, the storage convention for all
/// engine timestamps.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
