//! State cache repository implementation

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::StateCache;

/// Fields for upserting a state snapshot into its slot.
#[derive(Debug, Clone, Default)]
pub struct NewStateCache {
    pub game_id: i64,
    pub platform_slug: String,
    pub emulator_id: String,
    pub slot: i32,
    pub channel: Option<String>,
    pub captured_at: i64,
    pub size_bytes: i64,
    pub cache_path: String,
    pub screenshot_path: Option<String>,
    pub core_id: Option<String>,
    pub core_version: Option<String>,
}

/// Trait for state cache storage operations (async)
#[allow(async_fn_in_trait)]
pub trait StateCacheRepository {
    /// Insert or replace the snapshot occupying (game, emulator, slot,
    /// channel). Lock state and notes on an existing row are preserved.
    async fn upsert(&self, state: &NewStateCache) -> Result<StateCache>;

    /// Get a snapshot by id
    async fn get(&self, id: i64) -> Result<Option<StateCache>>;

    /// The snapshot occupying a slot, if any
    async fn get_by_slot(
        &self,
        game_id: i64,
        emulator_id: &str,
        slot: i32,
        channel: Option<&str>,
    ) -> Result<Option<StateCache>>;

    /// All snapshots for a game+emulator within one channel, slot order
    async fn list_for_channel(
        &self,
        game_id: i64,
        emulator_id: &str,
        channel: Option<&str>,
    ) -> Result<Vec<StateCache>>;

    /// Lock or unlock a snapshot
    async fn set_locked(&self, id: i64, locked: bool) -> Result<()>;

    /// Attach or clear a user note
    async fn set_note(&self, id: i64, note: Option<&str>) -> Result<()>;

    /// Delete a snapshot row
    async fn delete(&self, id: i64) -> Result<()>;
}

/// libSQL implementation of `StateCacheRepository`
pub struct LibSqlStateCacheRepository<'a> {
    conn: &'a Connection,
}

const STATE_COLUMNS: &str = "id, game_id, platform_slug, emulator_id, slot, channel, \
     captured_at, size_bytes, cache_path, screenshot_path, core_id, core_version, locked, note";

impl<'a> LibSqlStateCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_state(row: &libsql::Row) -> Result<StateCache> {
        Ok(StateCache {
            id: row.get(0)?,
            game_id: row.get(1)?,
            platform_slug: row.get(2)?,
            emulator_id: row.get(3)?,
            slot: row.get(4)?,
            channel: row.get(5)?,
            captured_at: row.get(6)?,
            size_bytes: row.get(7)?,
            cache_path: row.get(8)?,
            screenshot_path: row.get(9)?,
            core_id: row.get(10)?,
            core_version: row.get(11)?,
            locked: row.get::<i64>(12)? != 0,
            note: row.get(13)?,
        })
    }
}

impl StateCacheRepository for LibSqlStateCacheRepository<'_> {
    async fn upsert(&self, state: &NewStateCache) -> Result<StateCache> {
        let existing = self
            .get_by_slot(
                state.game_id,
                &state.emulator_id,
                state.slot,
                state.channel.as_deref(),
            )
            .await?;

        let id = if let Some(existing) = existing {
            self.conn
                .execute(
                    "UPDATE state_cache
                     SET captured_at = ?, size_bytes = ?, cache_path = ?,
                         screenshot_path = ?, core_id = ?, core_version = ?
                     WHERE id = ?",
                    libsql::params![
                        state.captured_at,
                        state.size_bytes,
                        state.cache_path.clone(),
                        state.screenshot_path.clone(),
                        state.core_id.clone(),
                        state.core_version.clone(),
                        existing.id
                    ],
                )
                .await?;
            existing.id
        } else {
            self.conn
                .execute(
                    "INSERT INTO state_cache
                        (game_id, platform_slug, emulator_id, slot, channel,
                         captured_at, size_bytes, cache_path, screenshot_path,
                         core_id, core_version)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    libsql::params![
                        state.game_id,
                        state.platform_slug.clone(),
                        state.emulator_id.clone(),
                        state.slot,
                        state.channel.clone(),
                        state.captured_at,
                        state.size_bytes,
                        state.cache_path.clone(),
                        state.screenshot_path.clone(),
                        state.core_id.clone(),
                        state.core_version.clone()
                    ],
                )
                .await?;
            self.conn.last_insert_rowid()
        };

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("upserted state not found".to_string()))
    }

    async fn get(&self, id: i64) -> Result<Option<StateCache>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM state_cache WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_state(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_slot(
        &self,
        game_id: i64,
        emulator_id: &str,
        slot: i32,
        channel: Option<&str>,
    ) -> Result<Option<StateCache>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM state_cache
                     WHERE game_id = ? AND emulator_id = ? AND slot = ?
                       AND COALESCE(channel, '') = COALESCE(?, '')"
                ),
                libsql::params![game_id, emulator_id, slot, channel],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_state(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_for_channel(
        &self,
        game_id: i64,
        emulator_id: &str,
        channel: Option<&str>,
    ) -> Result<Vec<StateCache>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM state_cache
                     WHERE game_id = ? AND emulator_id = ?
                       AND COALESCE(channel, '') = COALESCE(?, '')
                     ORDER BY slot ASC"
                ),
                libsql::params![game_id, emulator_id, channel],
            )
            .await?;

        let mut states = Vec::new();
        while let Some(row) = rows.next().await? {
            states.push(Self::parse_state(&row)?);
        }
        Ok(states)
    }

    async fn set_locked(&self, id: i64, locked: bool) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE state_cache SET locked = ? WHERE id = ?",
                libsql::params![locked, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("state cache row {id}")));
        }
        Ok(())
    }

    async fn set_note(&self, id: i64, note: Option<&str>) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE state_cache SET note = ? WHERE id = ?",
                libsql::params![note, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("state cache row {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM state_cache WHERE id = ?", [id])
            .await?;
        Ok(())
    }
}
