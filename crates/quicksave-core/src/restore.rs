//! Restore Coordinator: put chosen save bytes back where the emulator
//! reads them, and mirror a channel's save-states into the emulator's
//! state directory.
//!
//! The primary (local) step of a restore is fatal when it fails; the
//! optional server sync-back never is. A player's restored save is not
//! rolled back because the network flaked afterwards.

use std::path::{Path, PathBuf};

use crate::db::{
    GameRepository, LibSqlGameRepository, LibSqlSaveCacheRepository, LibSqlStateCacheRepository,
    LibSqlSyncRepository, SaveCacheRepository, StateCacheRepository, SyncRepository,
    UpsertSyncRecord,
};
use crate::emulator::{self, EmulatorConfig};
use crate::error::{Error, Result};
use crate::models::{Game, SaveSource, StateCache, UnifiedSaveEntry};
use crate::remote::{RemoteStore, UploadRequest};
use crate::sync::{mtime_millis, upload_file_name, SyncEngine};

/// Outcome of a save restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSaveResult {
    /// Bytes are in place; the requested server sync-back failed or was
    /// not requested
    Restored { target_path: PathBuf },
    /// Bytes are in place and the server holds the same copy
    RestoredAndSynced { target_path: PathBuf },
    Error(String),
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Restore a unified save entry into the emulator's save location and
    /// repoint the game's active channel at it.
    pub async fn restore_save(
        &self,
        game_id: i64,
        emulator_id: &str,
        entry: &UnifiedSaveEntry,
        core_id: Option<&str>,
        also_sync_to_server: bool,
    ) -> Result<RestoreSaveResult> {
        let game = self.require_game(game_id).await?;
        let Some(emulator) = emulator::get(emulator_id) else {
            return Ok(RestoreSaveResult::Error(format!(
                "unknown emulator {emulator_id}"
            )));
        };

        let Some(target_path) = self.resolve_target_path(&game, emulator, core_id).await else {
            return Ok(RestoreSaveResult::Error(
                "could not resolve an on-device save path".to_string(),
            ));
        };
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match entry.source {
            SaveSource::Local | SaveSource::Both => {
                let Some(cache_id) = entry.local_cache_id else {
                    return Ok(RestoreSaveResult::Error(
                        "entry has no local cache row".to_string(),
                    ));
                };
                let cached = LibSqlSaveCacheRepository::new(self.db.connection())
                    .get(cache_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("save cache row {cache_id}")))?;
                tokio::fs::copy(&cached.cache_path, &target_path).await?;
            }
            SaveSource::Server => {
                let Some(remote_save_id) = entry.remote_save_id else {
                    return Ok(RestoreSaveResult::Error(
                        "entry has no remote save id".to_string(),
                    ));
                };
                if let Err(e) = self.remote.download_save(remote_save_id, &target_path).await {
                    return Ok(RestoreSaveResult::Error(e.to_string()));
                }
            }
        }

        LibSqlGameRepository::new(self.db.connection())
            .set_active_channel(game_id, entry.channel.as_deref())
            .await?;
        tracing::info!(
            game_id,
            channel = entry.channel.as_deref().unwrap_or("<default>"),
            "Restored save"
        );

        let local_updated_at = tokio::fs::metadata(&target_path)
            .await
            .map(|m| mtime_millis(&m))
            .ok();
        if let Some(remote_game_id) = game.remote_id {
            let sync_repo = LibSqlSyncRepository::new(self.db.connection());
            let previous = sync_repo
                .get_record(game_id, emulator.id, entry.channel.as_deref())
                .await?;
            sync_repo
                .upsert_record(&UpsertSyncRecord {
                    game_id,
                    remote_game_id,
                    emulator_id: emulator.id.to_string(),
                    channel: entry.channel.clone(),
                    remote_save_id: entry
                        .remote_save_id
                        .or_else(|| previous.as_ref().and_then(|r| r.remote_save_id)),
                    local_save_path: Some(target_path.to_string_lossy().into_owned()),
                    local_updated_at,
                    server_updated_at: previous.as_ref().and_then(|r| r.server_updated_at),
                    last_synced_at: previous.as_ref().and_then(|r| r.last_synced_at),
                })
                .await?;
        }

        if !also_sync_to_server {
            return Ok(RestoreSaveResult::Restored { target_path });
        }
        let Some(remote_game_id) = game.remote_id else {
            return Ok(RestoreSaveResult::Restored { target_path });
        };

        let file_name = upload_file_name(emulator, entry.channel.as_deref());
        let request = UploadRequest {
            remote_game_id,
            emulator_id: emulator.id,
            channel: entry.channel.as_deref(),
            file_name: &file_name,
            source_path: &target_path,
            // The restored copy is the one the user chose; overwrite.
            known_server_updated_at: None,
        };
        match self.remote.upload_save(&request).await {
            Ok(uploaded) => {
                let mut repointed = game;
                repointed.active_channel.clone_from(&entry.channel);
                self.record_upload(
                    &repointed,
                    emulator.id,
                    &target_path,
                    local_updated_at.unwrap_or(0),
                    &uploaded,
                )
                .await?;
                Ok(RestoreSaveResult::RestoredAndSynced { target_path })
            }
            Err(e) => {
                tracing::warn!(game_id, error = %e, "Sync-back after restore failed");
                Ok(RestoreSaveResult::Restored { target_path })
            }
        }
    }

    /// Mirror every cached state for (game, channel, core) into the
    /// emulator's state directory, clearing stale slot files first.
    /// Returns the count restored; zero is a legitimate outcome.
    pub async fn restore_channel_states(
        &self,
        game_id: i64,
        channel: Option<&str>,
        emulator_id: &str,
        core_id: Option<&str>,
    ) -> Result<usize> {
        let game = self.require_game(game_id).await?;
        let emulator = emulator::get(emulator_id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown emulator {emulator_id}")))?;
        let rom_base = game
            .rom_base_name()
            .ok_or_else(|| Error::InvalidInput(format!("game {game_id} has no local ROM")))?;
        let state_dir = emulator
            .state_dir_for(&self.paths.state_root, core_id)
            .ok_or_else(|| {
                Error::InvalidInput(format!("state dir for {emulator_id} needs a core id"))
            })?;
        tokio::fs::create_dir_all(&state_dir).await?;

        self.clear_slot_files(&state_dir, emulator, &rom_base).await?;

        let rows = LibSqlStateCacheRepository::new(self.db.connection())
            .list_for_channel(game_id, emulator.id, channel)
            .await?;
        let mut restored = 0;
        for row in rows.iter().filter(|r| core_matches(r, core_id)) {
            let dest = state_dir.join(emulator.state_file_name(&rom_base, row.slot));
            tokio::fs::copy(&row.cache_path, &dest).await?;
            if let Some(screenshot) = &row.screenshot_path {
                if tokio::fs::metadata(screenshot).await.is_ok() {
                    let file_name = dest.file_name().unwrap_or_default().to_string_lossy();
                    let sidecar = state_dir.join(emulator.screenshot_file_name(&file_name));
                    tokio::fs::copy(screenshot, &sidecar).await?;
                }
            }
            restored += 1;
        }

        tracing::info!(
            game_id,
            channel = channel.unwrap_or("<default>"),
            restored,
            "Restored channel states"
        );
        Ok(restored)
    }

    /// Discovery first, then path construction from emulator conventions.
    async fn resolve_target_path(
        &self,
        game: &Game,
        emulator: &'static EmulatorConfig,
        core_id: Option<&str>,
    ) -> Option<PathBuf> {
        if let Some(path) =
            crate::sync::direct_save_path(&self.paths.save_root, game, emulator).await
        {
            return Some(path);
        }
        let rom_base = game.rom_base_name()?;
        let dir = emulator.save_dir_for(&self.paths.save_root, core_id, game.title_id.as_deref())?;
        Some(dir.join(emulator.save_file_name(&rom_base)))
    }

    /// Delete every slot file (and screenshot sidecar) for this ROM so
    /// slots emptied in the cache don't linger on disk.
    async fn clear_slot_files(
        &self,
        state_dir: &Path,
        emulator: &EmulatorConfig,
        rom_base: &str,
    ) -> Result<()> {
        let mut entries = tokio::fs::read_dir(state_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let state_name = name.strip_suffix(".png").unwrap_or(&name);
            if emulator.parse_state_slot(state_name, rom_base).is_some() {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

fn core_matches(row: &StateCache, core_id: Option<&str>) -> bool {
    match (row.core_id.as_deref(), core_id) {
        (Some(saved), Some(current)) => saved == current,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewSaveCache, NewStateCache};
    use crate::models::RemoteSave;
    use crate::remote::mock::{MockRemoteStore, UploadBehavior};
    use crate::sync::tests::{fixture, write_save, Fixture};
    use pretty_assertions::assert_eq;

    fn local_entry(cache_id: i64, channel: Option<&str>) -> UnifiedSaveEntry {
        UnifiedSaveEntry {
            local_cache_id: Some(cache_id),
            remote_save_id: None,
            timestamp: 1_000,
            size_bytes: 10,
            channel: channel.map(ToString::to_string),
            source: SaveSource::Local,
            remote_file_name: None,
            is_latest: false,
            locked: channel.is_some(),
            hardcore: false,
            cheats_used: false,
        }
    }

    async fn seed_cached_save(fx: &Fixture, channel: Option<&str>, bytes: &[u8]) -> i64 {
        let path = fx.tmp_path().join("cached.sra");
        std::fs::write(&path, bytes).unwrap();
        LibSqlSaveCacheRepository::new(fx.engine.database().connection())
            .insert(&NewSaveCache {
                game_id: fx.game_id,
                emulator_id: "mupen64plus".to_string(),
                captured_at: 1_000,
                size_bytes: bytes.len() as i64,
                cache_path: path.to_string_lossy().into_owned(),
                locked: channel.is_some(),
                channel: channel.map(ToString::to_string),
                ..NewSaveCache::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restores_local_entry_to_constructed_path() {
        let fx = fixture(MockRemoteStore::new()).await;
        let cache_id = seed_cached_save(&fx, Some("boss"), b"checkpoint bytes").await;

        let result = fx
            .engine
            .restore_save(
                fx.game_id,
                "mupen64plus",
                &local_entry(cache_id, Some("boss")),
                None,
                false,
            )
            .await
            .unwrap();

        let RestoreSaveResult::Restored { target_path } = result else {
            panic!("expected Restored, got {result:?}");
        };
        assert!(target_path.ends_with("mupen64plus/GameSaves/Majora.sra"));
        assert_eq!(std::fs::read(&target_path).unwrap(), b"checkpoint bytes");

        let game = LibSqlGameRepository::new(fx.engine.database().connection())
            .get(fx.game_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.active_channel.as_deref(), Some("boss"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restores_server_entry_by_download() {
        let fx = fixture(MockRemoteStore::new()).await;
        fx.engine.remote().add_save(
            RemoteSave {
                id: 5,
                remote_game_id: 7,
                emulator_id: Some("mupen64plus".to_string()),
                file_name: "boss.sra".to_string(),
                size_bytes: 12,
                updated_at: "9000".to_string(),
            },
            b"server bytes",
        );
        let entry = UnifiedSaveEntry {
            local_cache_id: None,
            remote_save_id: Some(5),
            source: SaveSource::Server,
            ..local_entry(0, Some("boss"))
        };

        let result = fx
            .engine
            .restore_save(fx.game_id, "mupen64plus", &entry, None, false)
            .await
            .unwrap();
        let RestoreSaveResult::Restored { target_path } = result else {
            panic!("expected Restored, got {result:?}");
        };
        assert_eq!(std::fs::read(&target_path).unwrap(), b"server bytes");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_repoints_to_default_channel() {
        let fx = fixture(MockRemoteStore::new()).await;
        LibSqlGameRepository::new(fx.engine.database().connection())
            .set_active_channel(fx.game_id, Some("boss"))
            .await
            .unwrap();
        let cache_id = seed_cached_save(&fx, None, b"latest bytes").await;

        fx.engine
            .restore_save(
                fx.game_id,
                "mupen64plus",
                &local_entry(cache_id, None),
                None,
                false,
            )
            .await
            .unwrap();

        let game = LibSqlGameRepository::new(fx.engine.database().connection())
            .get(fx.game_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.active_channel, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_back_success_upgrades_result() {
        let fx = fixture(MockRemoteStore::new()).await;
        let cache_id = seed_cached_save(&fx, Some("boss"), b"bytes").await;

        let result = fx
            .engine
            .restore_save(
                fx.game_id,
                "mupen64plus",
                &local_entry(cache_id, Some("boss")),
                None,
                true,
            )
            .await
            .unwrap();
        assert!(matches!(result, RestoreSaveResult::RestoredAndSynced { .. }));

        let uploads = fx.engine.remote().uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "boss.sra");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_sync_back_downgrades_but_keeps_restore() {
        let fx = fixture(MockRemoteStore::new()).await;
        let cache_id = seed_cached_save(&fx, Some("boss"), b"bytes").await;
        fx.engine
            .remote()
            .set_upload_behavior(UploadBehavior::FailTransient);

        let result = fx
            .engine
            .restore_save(
                fx.game_id,
                "mupen64plus",
                &local_entry(cache_id, Some("boss")),
                None,
                true,
            )
            .await
            .unwrap();
        let RestoreSaveResult::Restored { target_path } = result else {
            panic!("expected downgraded Restored, got {result:?}");
        };
        assert!(target_path.exists());
    }

    async fn seed_state(fx: &Fixture, slot: i32, channel: Option<&str>, core: &str) {
        let path = fx.tmp_path().join(format!("cached-state-{slot}"));
        std::fs::write(&path, format!("state {slot}")).unwrap();
        LibSqlStateCacheRepository::new(fx.engine.database().connection())
            .upsert(&NewStateCache {
                game_id: fx.game_id,
                platform_slug: "n64".to_string(),
                emulator_id: "mupen64plus".to_string(),
                slot,
                channel: channel.map(ToString::to_string),
                captured_at: 1_000,
                size_bytes: 8,
                cache_path: path.to_string_lossy().into_owned(),
                core_id: Some(core.to_string()),
                core_version: Some("2.6.0".to_string()),
                ..NewStateCache::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn channel_state_restore_replaces_stale_slots() {
        let fx = fixture(MockRemoteStore::new()).await;
        seed_state(&fx, 0, Some("run"), "mupen64plus_next").await;
        seed_state(&fx, 3, Some("run"), "mupen64plus_next").await;

        // A stale slot file from a previous channel lingers on disk.
        let state_dir = fx.tmp_path().join("states/mupen64plus/GameStates");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("Majora.state7"), b"stale").unwrap();

        let restored = fx
            .engine
            .restore_channel_states(fx.game_id, Some("run"), "mupen64plus", None)
            .await
            .unwrap();
        assert_eq!(restored, 2);
        assert!(state_dir.join("Majora.state").exists());
        assert!(state_dir.join("Majora.state3").exists());
        assert!(!state_dir.join("Majora.state7").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_channel_restores_zero() {
        let fx = fixture(MockRemoteStore::new()).await;
        let restored = fx
            .engine
            .restore_channel_states(fx.game_id, Some("empty"), "mupen64plus", None)
            .await
            .unwrap();
        assert_eq!(restored, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn state_restore_filters_by_core() {
        let fx = fixture(MockRemoteStore::new()).await;
        seed_state(&fx, 0, None, "core-a").await;
        seed_state(&fx, 1, None, "core-b").await;

        let restored = fx
            .engine
            .restore_channel_states(fx.game_id, None, "mupen64plus", Some("core-a"))
            .await
            .unwrap();
        assert_eq!(restored, 1);
    }
}
