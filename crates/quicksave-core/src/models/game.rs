//! Game library entry model

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A game in the local library.
///
/// `remote_id` is the save-server's identity for this game and is distinct
/// from the local row id; games without one never take part in save sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Local row id
    pub id: i64,
    /// Display title
    pub title: String,
    /// Canonical platform slug (e.g. "snes", "n64")
    pub platform_slug: String,
    /// Absolute path of the ROM file, if present on device
    pub local_path: Option<String>,
    /// Save-server identity, if this game is linked to the remote library
    pub remote_id: Option<i64>,
    /// Platform title id claimed by save-path discovery, if any
    pub title_id: Option<String>,
    /// Currently active save channel; `None` is the default "latest" stream
    pub active_channel: Option<String>,
    /// Package name of the emulator configured for this game
    pub emulator_package: Option<String>,
}

impl Game {
    /// The ROM's file name without extension, used to recognize the
    /// continuously-overwritten "latest" save stream.
    #[must_use]
    pub fn rom_base_name(&self) -> Option<String> {
        self.local_path
            .as_deref()
            .and_then(|p| Path::new(p).file_stem())
            .map(|s| s.to_string_lossy().into_owned())
    }
}
