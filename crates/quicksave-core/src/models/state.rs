//! State cache and unified state view models

use serde::{Deserialize, Serialize};

/// Slot number reserved for the emulator's own auto-save slot.
pub const AUTO_SLOT: i32 = -1;

/// One locally cached save-state. Unique per (game, emulator, slot, channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCache {
    /// Local row id
    pub id: i64,
    pub game_id: i64,
    pub platform_slug: String,
    pub emulator_id: String,
    /// `AUTO_SLOT` or an explicit numbered slot `0..N`
    pub slot: i32,
    /// Channel name; `None` is the default channel
    pub channel: Option<String>,
    /// Capture timestamp (unix ms)
    pub captured_at: i64,
    pub size_bytes: i64,
    /// Path of the state file inside the cache directory
    pub cache_path: String,
    /// Screenshot sidecar, if one was captured alongside the state
    pub screenshot_path: Option<String>,
    /// Identity of the core that produced this state
    pub core_id: Option<String>,
    /// Version of the core that produced this state
    pub core_version: Option<String>,
    pub locked: bool,
    /// Free-text note attached by the user
    pub note: Option<String>,
}

/// Advisory compatibility of a cached state with the active core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    Compatible,
    Mismatch,
    Unknown,
}

/// Derived slot view of a cached state. Empty slots are sentinels with no
/// backing cache row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedStateEntry {
    pub local_cache_id: Option<i64>,
    pub slot: i32,
    /// Capture timestamp (unix ms); `None` for empty slots
    pub timestamp: Option<i64>,
    pub size_bytes: i64,
    pub channel: Option<String>,
    pub core_id: Option<String>,
    pub core_version: Option<String>,
    pub screenshot_path: Option<String>,
    /// True when this state is currently loaded in the emulator
    pub active: bool,
    pub locked: bool,
    pub version_status: VersionStatus,
}

impl UnifiedStateEntry {
    /// Placeholder for an unoccupied slot.
    #[must_use]
    pub fn empty(slot: i32) -> Self {
        Self {
            local_cache_id: None,
            slot,
            timestamp: None,
            size_bytes: 0,
            channel: None,
            core_id: None,
            core_version: None,
            screenshot_path: None,
            active: false,
            locked: false,
            version_status: VersionStatus::Unknown,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_cache_id.is_none()
    }
}
