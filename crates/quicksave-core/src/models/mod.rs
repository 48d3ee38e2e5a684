//! Shared data models

mod game;
mod remote_save;
mod save;
mod state;
mod sync;

pub use game::Game;
pub use remote_save::{parse_remote_timestamp, RemoteSave};
pub use save::{SaveCache, SaveSource, UnifiedSaveEntry};
pub use state::{StateCache, UnifiedStateEntry, VersionStatus, AUTO_SLOT};
pub use sync::{SaveSyncRecord, SyncQueueEntry};
