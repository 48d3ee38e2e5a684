//! Save cache repository implementation

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::SaveCache;

/// Fields for inserting a new save snapshot.
#[derive(Debug, Clone, Default)]
pub struct NewSaveCache {
    pub game_id: i64,
    pub emulator_id: String,
    pub captured_at: i64,
    pub size_bytes: i64,
    pub cache_path: String,
    pub locked: bool,
    pub channel: Option<String>,
    pub content_hash: Option<String>,
    pub hardcore: bool,
    pub cheats_used: bool,
    pub needs_sync: bool,
}

/// Trait for save cache storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SaveCacheRepository {
    /// Insert a new snapshot row
    async fn insert(&self, save: &NewSaveCache) -> Result<SaveCache>;

    /// Get a snapshot by id
    async fn get(&self, id: i64) -> Result<Option<SaveCache>>;

    /// All snapshots for a game, newest first
    async fn list_for_game(&self, game_id: i64) -> Result<Vec<SaveCache>>;

    /// Most recent snapshot in a channel (`None` = default stream)
    async fn most_recent_in_channel(
        &self,
        game_id: i64,
        channel: Option<&str>,
    ) -> Result<Option<SaveCache>>;

    /// Record a successful upload for a snapshot
    async fn mark_synced(&self, id: i64, synced_at: i64) -> Result<()>;

    /// Record a failed upload attempt, keeping the row pending
    async fn mark_sync_failed(&self, id: i64, error: &str) -> Result<()>;

    /// Lock or unlock a snapshot
    async fn set_locked(&self, id: i64, locked: bool) -> Result<()>;

    /// Delete a snapshot row
    async fn delete(&self, id: i64) -> Result<()>;
}

/// libSQL implementation of `SaveCacheRepository`
pub struct LibSqlSaveCacheRepository<'a> {
    conn: &'a Connection,
}

const SAVE_COLUMNS: &str = "id, game_id, emulator_id, captured_at, size_bytes, cache_path, \
     locked, channel, content_hash, hardcore, cheats_used, needs_sync, \
     last_synced_at, last_sync_error";

impl<'a> LibSqlSaveCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_save(row: &libsql::Row) -> Result<SaveCache> {
        Ok(SaveCache {
            id: row.get(0)?,
            game_id: row.get(1)?,
            emulator_id: row.get(2)?,
            captured_at: row.get(3)?,
            size_bytes: row.get(4)?,
            cache_path: row.get(5)?,
            locked: row.get::<i64>(6)? != 0,
            channel: row.get(7)?,
            content_hash: row.get(8)?,
            hardcore: row.get::<i64>(9)? != 0,
            cheats_used: row.get::<i64>(10)? != 0,
            needs_sync: row.get::<i64>(11)? != 0,
            last_synced_at: row.get(12)?,
            last_sync_error: row.get(13)?,
        })
    }
}

impl SaveCacheRepository for LibSqlSaveCacheRepository<'_> {
    async fn insert(&self, save: &NewSaveCache) -> Result<SaveCache> {
        self.conn
            .execute(
                "INSERT INTO save_cache
                    (game_id, emulator_id, captured_at, size_bytes, cache_path,
                     locked, channel, content_hash, hardcore, cheats_used, needs_sync)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    save.game_id,
                    save.emulator_id.clone(),
                    save.captured_at,
                    save.size_bytes,
                    save.cache_path.clone(),
                    save.locked,
                    save.channel.clone(),
                    save.content_hash.clone(),
                    save.hardcore,
                    save.cheats_used,
                    save.needs_sync
                ],
            )
            .await?;

        let id = self.conn.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("inserted save not found".to_string()))
    }

    async fn get(&self, id: i64) -> Result<Option<SaveCache>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SAVE_COLUMNS} FROM save_cache WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_save(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_for_game(&self, game_id: i64) -> Result<Vec<SaveCache>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SAVE_COLUMNS} FROM save_cache
                     WHERE game_id = ? ORDER BY captured_at DESC, id DESC"
                ),
                [game_id],
            )
            .await?;

        let mut saves = Vec::new();
        while let Some(row) = rows.next().await? {
            saves.push(Self::parse_save(&row)?);
        }
        Ok(saves)
    }

    async fn most_recent_in_channel(
        &self,
        game_id: i64,
        channel: Option<&str>,
    ) -> Result<Option<SaveCache>> {
        // COALESCE keeps NULL-channel rows addressable through one query shape.
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SAVE_COLUMNS} FROM save_cache
                     WHERE game_id = ? AND COALESCE(channel, '') = COALESCE(?, '')
                     ORDER BY captured_at DESC, id DESC LIMIT 1"
                ),
                libsql::params![game_id, channel],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_save(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_synced(&self, id: i64, synced_at: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE save_cache
                 SET needs_sync = 0, last_synced_at = ?, last_sync_error = NULL
                 WHERE id = ?",
                [synced_at, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("save cache row {id}")));
        }
        Ok(())
    }

    async fn mark_sync_failed(&self, id: i64, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE save_cache
                 SET needs_sync = 1, last_sync_error = ?
                 WHERE id = ?",
                libsql::params![error, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("save cache row {id}")));
        }
        Ok(())
    }

    async fn set_locked(&self, id: i64, locked: bool) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE save_cache SET locked = ? WHERE id = ?",
                libsql::params![locked, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("save cache row {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM save_cache WHERE id = ?", [id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, GameRepository, LibSqlGameRepository, NewGame};

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let game = LibSqlGameRepository::new(db.connection())
            .insert(&NewGame {
                title: "Metroid Fusion".to_string(),
                platform_slug: "gba".to_string(),
                ..NewGame::default()
            })
            .await
            .unwrap();
        let game_id = game.id;
        (db, game_id)
    }

    fn snapshot(game_id: i64, captured_at: i64, channel: Option<&str>) -> NewSaveCache {
        NewSaveCache {
            game_id,
            emulator_id: "retroarch".to_string(),
            captured_at,
            size_bytes: 8192,
            cache_path: format!("/cache/saves/{captured_at}.srm"),
            locked: channel.is_some(),
            channel: channel.map(ToString::to_string),
            needs_sync: true,
            ..NewSaveCache::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_list_newest_first() {
        let (db, game_id) = setup().await;
        let repo = LibSqlSaveCacheRepository::new(db.connection());

        repo.insert(&snapshot(game_id, 1_000, None)).await.unwrap();
        repo.insert(&snapshot(game_id, 3_000, None)).await.unwrap();
        repo.insert(&snapshot(game_id, 2_000, Some("boss"))).await.unwrap();

        let saves = repo.list_for_game(game_id).await.unwrap();
        assert_eq!(saves.len(), 3);
        assert_eq!(saves[0].captured_at, 3_000);
        assert_eq!(saves[2].captured_at, 1_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_most_recent_in_channel_separates_streams() {
        let (db, game_id) = setup().await;
        let repo = LibSqlSaveCacheRepository::new(db.connection());

        repo.insert(&snapshot(game_id, 1_000, None)).await.unwrap();
        repo.insert(&snapshot(game_id, 5_000, Some("boss"))).await.unwrap();
        repo.insert(&snapshot(game_id, 2_000, None)).await.unwrap();

        let default = repo
            .most_recent_in_channel(game_id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(default.captured_at, 2_000);
        assert_eq!(default.channel, None);

        let boss = repo
            .most_recent_in_channel(game_id, Some("boss"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(boss.captured_at, 5_000);

        assert!(repo
            .most_recent_in_channel(game_id, Some("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_synced_clears_pending_state() {
        let (db, game_id) = setup().await;
        let repo = LibSqlSaveCacheRepository::new(db.connection());
        let save = repo.insert(&snapshot(game_id, 1_000, None)).await.unwrap();
        assert!(save.needs_sync);

        repo.mark_sync_failed(save.id, "connection refused").await.unwrap();
        let failed = repo.get(save.id).await.unwrap().unwrap();
        assert!(failed.needs_sync);
        assert_eq!(failed.last_sync_error.as_deref(), Some("connection refused"));

        repo.mark_synced(save.id, 9_000).await.unwrap();
        let synced = repo.get(save.id).await.unwrap().unwrap();
        assert!(!synced.needs_sync);
        assert_eq!(synced.last_synced_at, Some(9_000));
        assert_eq!(synced.last_sync_error, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_locked_and_delete() {
        let (db, game_id) = setup().await;
        let repo = LibSqlSaveCacheRepository::new(db.connection());
        let save = repo.insert(&snapshot(game_id, 1_000, None)).await.unwrap();

        repo.set_locked(save.id, true).await.unwrap();
        assert!(repo.get(save.id).await.unwrap().unwrap().locked);

        repo.delete(save.id).await.unwrap();
        assert!(repo.get(save.id).await.unwrap().is_none());
    }
}
