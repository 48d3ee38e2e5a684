//! Database layer

mod connection;
mod game_repository;
mod migrations;
mod save_cache_repository;
mod settings_repository;
mod state_cache_repository;
mod sync_repository;

pub use connection::Database;
pub use game_repository::{GameRepository, LibSqlGameRepository, NewGame};
pub use save_cache_repository::{LibSqlSaveCacheRepository, NewSaveCache, SaveCacheRepository};
pub use settings_repository::{
    LibSqlPreferencesRepository, PreferencesRepository, SyncPreferences,
};
pub use state_cache_repository::{
    LibSqlStateCacheRepository, NewStateCache, StateCacheRepository,
};
pub use sync_repository::{LibSqlSyncRepository, SyncRepository, UpsertSyncRecord};
