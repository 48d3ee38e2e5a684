//! Save cache and unified save view models

use serde::{Deserialize, Serialize};

/// One locally cached save snapshot.
///
/// Created when a session ends and a save file is detected; mutated only on
/// re-sync or when the user locks/unlocks it. The engine assumes a single
/// active writer per game, so rows are never mutated concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCache {
    /// Local row id
    pub id: i64,
    /// Owning game
    pub game_id: i64,
    /// Emulator the save belongs to
    pub emulator_id: String,
    /// Capture timestamp (unix ms)
    pub captured_at: i64,
    /// Save file size in bytes
    pub size_bytes: i64,
    /// Path of the snapshot inside the cache directory
    pub cache_path: String,
    /// Locked entries are named checkpoints and never pruned
    pub locked: bool,
    /// Channel name; `None` is the default "latest" stream
    pub channel: Option<String>,
    /// Content hash of the save bytes, when computed
    pub content_hash: Option<String>,
    /// Captured during a hardcore (achievement-locked) session
    pub hardcore: bool,
    /// Cheats were active when this save was captured
    pub cheats_used: bool,
    /// Still awaiting a successful upload
    pub needs_sync: bool,
    /// Last successful sync (unix ms)
    pub last_synced_at: Option<i64>,
    /// Message from the last failed sync attempt
    pub last_sync_error: Option<String>,
}

/// Where a unified entry's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveSource {
    Local,
    Server,
    Both,
}

/// Derived merge of a local cache row and/or a remote save. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedSaveEntry {
    pub local_cache_id: Option<i64>,
    pub remote_save_id: Option<i64>,
    /// Effective timestamp (unix ms)
    pub timestamp: i64,
    pub size_bytes: i64,
    pub channel: Option<String>,
    pub source: SaveSource,
    /// Server-side file name, when a remote half exists
    pub remote_file_name: Option<String>,
    /// True only for the single continuously-overwritten save stream
    pub is_latest: bool,
    pub locked: bool,
    pub hardcore: bool,
    pub cheats_used: bool,
}

impl UnifiedSaveEntry {
    /// Whether this entry occupies a named channel slot in the UI, as
    /// opposed to the dated timeline. Superseded rows for a channel keep
    /// their name but are not the slot occupant.
    #[must_use]
    pub fn is_channel_slot(&self) -> bool {
        self.channel.is_some() && self.locked
    }
}
