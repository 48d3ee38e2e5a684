//! Sync tracking and retry queue models

use serde::{Deserialize, Serialize};

/// Sync-tracking record for one (game, emulator, channel) save stream.
///
/// Records what this engine last knew about both sides; the pre-launch check
/// compares against it to decide whether a prompt is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSyncRecord {
    /// Local row id
    pub id: i64,
    pub game_id: i64,
    pub remote_game_id: i64,
    pub emulator_id: String,
    /// Channel; `None` is the default stream
    pub channel: Option<String>,
    /// Server save id this stream last synced against
    pub remote_save_id: Option<i64>,
    /// On-device save file path, once discovered
    pub local_save_path: Option<String>,
    /// Local save mtime at the last sync (unix ms)
    pub local_updated_at: Option<i64>,
    /// Server updated-at at the last check (unix ms)
    pub server_updated_at: Option<i64>,
    /// When this engine last completed a sync for the stream (unix ms)
    pub last_synced_at: Option<i64>,
}

/// A deferred upload awaiting best-effort replay. FIFO, not transactional:
/// repeated failures for the same game produce multiple entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Local row id
    pub id: i64,
    pub game_id: i64,
    pub emulator_id: String,
    pub save_path: String,
    /// Enqueue time (unix ms)
    pub enqueued_at: i64,
}
