//! Sync Protocol Controller.
//!
//! Two entry points drive the whole save-sync conversation: a pre-launch
//! check before control passes to the emulator, and a post-session sync
//! when it comes back. Both fail open (an offline device plays games, it
//! just doesn't sync), so conflicts are possible and are surfaced as named
//! outcomes, never resolved silently.

pub mod conflict;
mod discovery;

pub use conflict::{ConflictChoice, ConflictOutcome};
pub(crate) use discovery::{direct_save_path, mtime_millis};

use std::path::{Path, PathBuf};

use crate::db::{
    Database, GameRepository, LibSqlGameRepository, LibSqlPreferencesRepository,
    LibSqlSaveCacheRepository, LibSqlStateCacheRepository, LibSqlSyncRepository, NewSaveCache,
    PreferencesRepository, SaveCacheRepository, StateCacheRepository, SyncRepository,
    UpsertSyncRecord,
};
use crate::emulator::{self, EmulatorConfig};
use crate::error::{Error, Result};
use crate::models::{Game, RemoteSave, SaveCache, UnifiedSaveEntry, UnifiedStateEntry};
use crate::reconcile::{self, DEFAULT_SAVE_NAME};
use crate::remote::{RemoteStore, UploadRequest};
use crate::{now_millis, slots};

/// Filesystem roots the engine is constructed with. Save and state roots
/// are the device directories emulators write into; the cache dir belongs
/// to the engine alone.
#[derive(Debug, Clone)]
pub struct DevicePaths {
    pub save_root: PathBuf,
    pub state_root: PathBuf,
    pub cache_dir: PathBuf,
}

/// Outcome of the pre-launch check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreLaunchStatus {
    /// Nothing blocks the launch
    Ready,
    /// Remote unreachable; launch proceeds without syncing
    NoConnection,
    /// The local save changed outside this engine's knowledge
    LocalModified {
        save_path: String,
        channel: Option<String>,
    },
    /// The server copy is strictly newer than anything known locally
    ServerNewer { server_timestamp: i64 },
}

/// Outcome of the post-session sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSyncStatus {
    Uploaded,
    /// Transient failure; the upload was deferred to the retry queue
    Queued,
    /// The server copy moved between pre-launch and now; resolution is
    /// explicit, never automatic
    Conflict {
        game_id: i64,
        local_timestamp: i64,
        server_timestamp: i64,
    },
    NoSaveFound,
    NotConfigured,
}

/// Result of draining the retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
}

/// The save/state synchronization engine: local cache database, remote
/// store, and the device paths they meet at.
pub struct SyncEngine<R> {
    pub(crate) db: Database,
    pub(crate) remote: R,
    pub(crate) paths: DevicePaths,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(db: Database, remote: R, paths: DevicePaths) -> Self {
        Self { db, remote, paths }
    }

    pub const fn database(&self) -> &Database {
        &self.db
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// The merged local/remote save timeline for a game. Remote saves are
    /// folded in when the game has a remote identity and the server
    /// answers; otherwise the view is local-only.
    pub async fn unified_saves(&self, game_id: i64) -> Result<Vec<UnifiedSaveEntry>> {
        let conn = self.db.connection();
        let game = self.require_game(game_id).await?;
        let local = LibSqlSaveCacheRepository::new(conn)
            .list_for_game(game_id)
            .await?;

        let remote = match game.remote_id {
            Some(remote_game_id) if self.remote.is_reachable().await => {
                match self.remote.list_saves(remote_game_id).await {
                    Ok(saves) => saves,
                    Err(e) => {
                        tracing::warn!(game_id, error = %e, "Remote save listing failed");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        Ok(reconcile::merge_save_entries(
            &local,
            &remote,
            game.rom_base_name().as_deref(),
        ))
    }

    /// The dense slot list for a game+channel, version-checked against the
    /// active core.
    pub async fn state_slots(
        &self,
        game_id: i64,
        channel: Option<&str>,
        core_id: Option<&str>,
        core_version: Option<&str>,
    ) -> Result<Vec<UnifiedStateEntry>> {
        let game = self.require_game(game_id).await?;
        let emulator = resolve_emulator(&game)
            .ok_or_else(|| Error::InvalidInput(format!("no emulator for game {game_id}")))?;

        let rows = LibSqlStateCacheRepository::new(self.db.connection())
            .list_for_channel(game_id, emulator.id, channel)
            .await?;
        Ok(slots::build_slot_list(
            &rows,
            emulator.max_slots,
            core_id,
            core_version,
        ))
    }

    /// Pre-launch check. Returns `Ready` without any network round-trip
    /// when the game has no remote identity, no resolvable emulator, or
    /// sync is disabled.
    pub async fn pre_launch_sync(&self, game_id: i64) -> Result<PreLaunchStatus> {
        let conn = self.db.connection();
        let game = self.require_game(game_id).await?;

        let Some(emulator) = resolve_emulator(&game) else {
            return Ok(PreLaunchStatus::Ready);
        };
        let Some(remote_game_id) = game.remote_id else {
            return Ok(PreLaunchStatus::Ready);
        };
        let prefs = LibSqlPreferencesRepository::new(conn).load().await?;
        if !prefs.save_sync_enabled {
            return Ok(PreLaunchStatus::Ready);
        }

        if !self.remote.is_reachable().await {
            return Ok(PreLaunchStatus::NoConnection);
        }
        let latest = match self.remote.latest_save(remote_game_id, emulator.id).await {
            Ok(latest) => latest,
            Err(e) if e.is_transient() => {
                tracing::debug!(game_id, error = %e, "Remote check failed, proceeding offline");
                return Ok(PreLaunchStatus::NoConnection);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(latest) = latest else {
            return Ok(PreLaunchStatus::Ready);
        };
        let server_timestamp = latest.updated_at_millis().unwrap_or(0);

        let record = LibSqlSyncRepository::new(conn)
            .get_record(game_id, emulator.id, game.active_channel.as_deref())
            .await?;
        if let Some(record) = &record {
            if record
                .local_updated_at
                .is_some_and(|local| local >= server_timestamp)
            {
                return Ok(PreLaunchStatus::Ready);
            }
            // A save touched since our last sync means something wrote it
            // behind our back; the user decides before we overwrite.
            if let (Some(path), Some(last_synced)) =
                (record.local_save_path.as_deref(), record.last_synced_at)
            {
                if let Ok(metadata) = tokio::fs::metadata(path).await {
                    if mtime_millis(&metadata) > last_synced {
                        return Ok(PreLaunchStatus::LocalModified {
                            save_path: path.to_string(),
                            channel: game.active_channel.clone(),
                        });
                    }
                }
            }
        }

        Ok(PreLaunchStatus::ServerNewer { server_timestamp })
    }

    /// Post-session sync: discover the save file the session wrote, snapshot
    /// it into the local cache, and attempt exactly one upload.
    pub async fn sync_on_session_end(
        &self,
        game_id: i64,
        session_started_at: i64,
    ) -> Result<SessionSyncStatus> {
        let conn = self.db.connection();
        let prefs = LibSqlPreferencesRepository::new(conn).load().await?;
        if !prefs.save_sync_enabled {
            return Ok(SessionSyncStatus::NotConfigured);
        }
        if !self.remote.is_reachable().await {
            return Ok(SessionSyncStatus::NotConfigured);
        }

        let game = self.require_game(game_id).await?;
        let Some(remote_game_id) = game.remote_id else {
            return Ok(SessionSyncStatus::NotConfigured);
        };
        let Some(emulator) = resolve_emulator(&game) else {
            return Ok(SessionSyncStatus::NotConfigured);
        };

        let Some(save_path) = self
            .discover_save_file(&game, emulator, session_started_at, prefs.folder_save_sync)
            .await?
        else {
            return Ok(SessionSyncStatus::NoSaveFound);
        };

        let metadata = tokio::fs::metadata(&save_path).await?;
        let local_updated_at = mtime_millis(&metadata);
        let size_bytes = i64::try_from(metadata.len()).unwrap_or(i64::MAX);
        let channel = game.active_channel.clone();

        let sync_repo = LibSqlSyncRepository::new(conn);
        let record = sync_repo
            .get_record(game_id, emulator.id, channel.as_deref())
            .await?;
        let known_server_updated_at = record.as_ref().and_then(|r| r.server_updated_at);

        let cached = self
            .cache_save_snapshot(&game, emulator, &save_path, local_updated_at, size_bytes)
            .await?;

        let save_repo = LibSqlSaveCacheRepository::new(conn);
        let file_name = upload_file_name(emulator, channel.as_deref());
        let request = UploadRequest {
            remote_game_id,
            emulator_id: emulator.id,
            channel: channel.as_deref(),
            file_name: &file_name,
            source_path: &save_path,
            known_server_updated_at,
        };

        match self.remote.upload_save(&request).await {
            Ok(uploaded) => {
                self.record_upload(&game, emulator.id, &save_path, local_updated_at, &uploaded)
                    .await?;
                save_repo.mark_synced(cached.id, now_millis()).await?;
                tracing::info!(game_id, file_name, "Uploaded save");
                Ok(SessionSyncStatus::Uploaded)
            }
            Err(crate::remote::RemoteError::Conflict { server_updated_at }) => {
                self.record_local_side(&game, emulator.id, &save_path, local_updated_at, record)
                    .await?;
                save_repo
                    .mark_sync_failed(cached.id, "server copy is newer")
                    .await?;
                Ok(SessionSyncStatus::Conflict {
                    game_id,
                    local_timestamp: local_updated_at,
                    server_timestamp: server_updated_at,
                })
            }
            Err(e) if e.is_transient() => {
                self.record_local_side(&game, emulator.id, &save_path, local_updated_at, record)
                    .await?;
                save_repo.mark_sync_failed(cached.id, &e.to_string()).await?;
                sync_repo
                    .enqueue(
                        game_id,
                        emulator.id,
                        &save_path.to_string_lossy(),
                        now_millis(),
                    )
                    .await?;
                tracing::warn!(game_id, error = %e, "Upload failed, queued for retry");
                Ok(SessionSyncStatus::Queued)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drain the retry queue, oldest first. Stops at the first transient
    /// failure (the server is likely still down); entries that can never
    /// succeed are dropped.
    pub async fn replay_queued_uploads(&self) -> Result<ReplayReport> {
        let conn = self.db.connection();
        let sync_repo = LibSqlSyncRepository::new(conn);
        let games = LibSqlGameRepository::new(conn);
        let mut replayed = 0;

        for entry in sync_repo.list_queue().await? {
            let save_path = Path::new(&entry.save_path);
            if tokio::fs::metadata(save_path).await.is_err() {
                tracing::warn!(path = entry.save_path, "Queued save file is gone, dropping");
                sync_repo.remove_queue_entry(entry.id).await?;
                continue;
            }

            let game = games.get(entry.game_id).await?;
            let (Some(game), Some(emulator)) =
                (game.as_ref(), emulator::get(&entry.emulator_id))
            else {
                sync_repo.remove_queue_entry(entry.id).await?;
                continue;
            };
            let Some(remote_game_id) = game.remote_id else {
                sync_repo.remove_queue_entry(entry.id).await?;
                continue;
            };

            let channel = game.active_channel.clone();
            let record = sync_repo
                .get_record(entry.game_id, emulator.id, channel.as_deref())
                .await?;
            let file_name = upload_file_name(emulator, channel.as_deref());
            let request = UploadRequest {
                remote_game_id,
                emulator_id: emulator.id,
                channel: channel.as_deref(),
                file_name: &file_name,
                source_path: save_path,
                known_server_updated_at: record.as_ref().and_then(|r| r.server_updated_at),
            };

            match self.remote.upload_save(&request).await {
                Ok(uploaded) => {
                    let metadata = tokio::fs::metadata(save_path).await?;
                    self.record_upload(
                        game,
                        emulator.id,
                        save_path,
                        mtime_millis(&metadata),
                        &uploaded,
                    )
                    .await?;
                    sync_repo.remove_queue_entry(entry.id).await?;
                    replayed += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "Replay hit a transient failure, stopping");
                    break;
                }
                Err(e) => {
                    // Conflicts and rejections need an explicit user action;
                    // retrying them forever helps no one.
                    tracing::warn!(game_id = entry.game_id, error = %e, "Dropping queued upload");
                    sync_repo.remove_queue_entry(entry.id).await?;
                }
            }
        }

        let remaining = sync_repo.list_queue().await?.len();
        Ok(ReplayReport { replayed, remaining })
    }

    /// Look up a game by id.
    pub async fn game(&self, game_id: i64) -> Result<Option<Game>> {
        LibSqlGameRepository::new(self.db.connection())
            .get(game_id)
            .await
    }

    pub(crate) async fn require_game(&self, game_id: i64) -> Result<Game> {
        self.game(game_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("game {game_id}")))
    }

    async fn discover_save_file(
        &self,
        game: &Game,
        emulator: &'static EmulatorConfig,
        session_started_at: i64,
        folder_scan_enabled: bool,
    ) -> Result<Option<PathBuf>> {
        if let Some(path) =
            discovery::direct_save_path(&self.paths.save_root, game, emulator).await
        {
            return Ok(Some(path));
        }

        if folder_scan_enabled && emulator.uses_title_id && game.title_id.is_none() {
            if let Some((title_id, path)) = discovery::scan_for_title_id(
                &self.paths.save_root,
                emulator,
                session_started_at,
            )
            .await?
            {
                let games = LibSqlGameRepository::new(self.db.connection());
                if games.claim_title_id(game.id, &title_id).await? {
                    tracing::info!(game_id = game.id, title_id, "Claimed title id by scan");
                    return Ok(Some(path));
                }
                tracing::debug!(
                    game_id = game.id,
                    title_id,
                    "Scanned title id already belongs to another game"
                );
            }
        }

        Ok(None)
    }

    /// Copy the session's save into the engine-owned cache directory and
    /// insert its cache row.
    async fn cache_save_snapshot(
        &self,
        game: &Game,
        emulator: &'static EmulatorConfig,
        save_path: &Path,
        captured_at: i64,
        size_bytes: i64,
    ) -> Result<SaveCache> {
        let dir = self.paths.cache_dir.join("saves").join(game.id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(format!("{captured_at}.{}", emulator.save_ext));
        tokio::fs::copy(save_path, &dest).await?;

        let channel = game.active_channel.clone();
        LibSqlSaveCacheRepository::new(self.db.connection())
            .insert(&NewSaveCache {
                game_id: game.id,
                emulator_id: emulator.id.to_string(),
                captured_at,
                size_bytes,
                cache_path: dest.to_string_lossy().into_owned(),
                locked: channel.is_some(),
                channel,
                needs_sync: true,
                ..NewSaveCache::default()
            })
            .await
    }

    /// Refresh the stream's tracking record after a successful upload.
    pub(crate) async fn record_upload(
        &self,
        game: &Game,
        emulator_id: &str,
        save_path: &Path,
        local_updated_at: i64,
        uploaded: &RemoteSave,
    ) -> Result<()> {
        LibSqlSyncRepository::new(self.db.connection())
            .upsert_record(&UpsertSyncRecord {
                game_id: game.id,
                remote_game_id: uploaded.remote_game_id,
                emulator_id: emulator_id.to_string(),
                channel: game.active_channel.clone(),
                remote_save_id: Some(uploaded.id),
                local_save_path: Some(save_path.to_string_lossy().into_owned()),
                local_updated_at: Some(local_updated_at),
                server_updated_at: uploaded.updated_at_millis(),
                last_synced_at: Some(now_millis()),
            })
            .await?;
        Ok(())
    }

    /// Refresh only the local half of the tracking record, after an upload
    /// that didn't land.
    async fn record_local_side(
        &self,
        game: &Game,
        emulator_id: &str,
        save_path: &Path,
        local_updated_at: i64,
        previous: Option<crate::models::SaveSyncRecord>,
    ) -> Result<()> {
        let Some(remote_game_id) = game.remote_id else {
            return Ok(());
        };
        LibSqlSyncRepository::new(self.db.connection())
            .upsert_record(&UpsertSyncRecord {
                game_id: game.id,
                remote_game_id,
                emulator_id: emulator_id.to_string(),
                channel: game.active_channel.clone(),
                remote_save_id: previous.as_ref().and_then(|r| r.remote_save_id),
                local_save_path: Some(save_path.to_string_lossy().into_owned()),
                local_updated_at: Some(local_updated_at),
                server_updated_at: previous.as_ref().and_then(|r| r.server_updated_at),
                last_synced_at: previous.as_ref().and_then(|r| r.last_synced_at),
            })
            .await?;
        Ok(())
    }
}

/// Resolve the emulator configured for a game.
pub(crate) fn resolve_emulator(game: &Game) -> Option<&'static EmulatorConfig> {
    game.emulator_package
        .as_deref()
        .and_then(emulator::resolve_package)
}

/// Server-side file name for an upload: named channels upload under their
/// own name, the default stream under a well-known one.
pub(crate) fn upload_file_name(emulator: &EmulatorConfig, channel: Option<&str>) -> String {
    match channel {
        Some(channel) => format!("{channel}.{}", emulator.save_ext),
        None => format!("{DEFAULT_SAVE_NAME}.{}", emulator.save_ext),
    }
}
