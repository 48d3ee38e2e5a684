//! Sync preferences repository implementation

use libsql::Connection;

use crate::error::Result;

/// Toggles controlling what the engine is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPreferences {
    /// Master switch for save upload/download
    pub save_sync_enabled: bool,
    /// Mirror save-states into the local cache at session end
    pub state_cache_enabled: bool,
    /// Allow scanning emulator save folders for undiscovered save files
    pub folder_save_sync: bool,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            save_sync_enabled: true,
            state_cache_enabled: true,
            folder_save_sync: false,
        }
    }
}

/// Trait for preference storage operations (async)
#[allow(async_fn_in_trait)]
pub trait PreferencesRepository {
    /// Load preferences, falling back to defaults for unset keys
    async fn load(&self) -> Result<SyncPreferences>;

    /// Persist preferences
    async fn store(&self, prefs: &SyncPreferences) -> Result<()>;
}

/// libSQL implementation of `PreferencesRepository` backed by the settings
/// key/value table.
pub struct LibSqlPreferencesRepository<'a> {
    conn: &'a Connection,
}

const KEY_SAVE_SYNC: &str = "save_sync_enabled";
const KEY_STATE_CACHE: &str = "state_cache_enabled";
const KEY_FOLDER_SYNC: &str = "folder_save_sync";

impl<'a> LibSqlPreferencesRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => {
                let value: String = row.get(0)?;
                Ok(parse_bool(&value))
            }
            None => Ok(default),
        }
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                libsql::params![key, if value { "true" } else { "false" }],
            )
            .await?;
        Ok(())
    }
}

/// Tolerant boolean parsing for values written by hand or by older builds.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl PreferencesRepository for LibSqlPreferencesRepository<'_> {
    async fn load(&self) -> Result<SyncPreferences> {
        let defaults = SyncPreferences::default();
        Ok(SyncPreferences {
            save_sync_enabled: self
                .get_bool(KEY_SAVE_SYNC, defaults.save_sync_enabled)
                .await?,
            state_cache_enabled: self
                .get_bool(KEY_STATE_CACHE, defaults.state_cache_enabled)
                .await?,
            folder_save_sync: self
                .get_bool(KEY_FOLDER_SYNC, defaults.folder_save_sync)
                .await?,
        })
    }

    async fn store(&self, prefs: &SyncPreferences) -> Result<()> {
        self.set_bool(KEY_SAVE_SYNC, prefs.save_sync_enabled).await?;
        self.set_bool(KEY_STATE_CACHE, prefs.state_cache_enabled).await?;
        self.set_bool(KEY_FOLDER_SYNC, prefs.folder_save_sync).await?;
        Ok(())
    }
}
