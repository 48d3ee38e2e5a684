//! State Capture: mirror on-disk save-states into the local cache when a
//! session ends.
//!
//! A discovered slot is cached only when it's new, strictly newer on disk
//! than the cached copy, or when a screenshot sidecar appeared that the
//! cached row is missing. Anything else is a no-op; re-running after an
//! unchanged session caches nothing.

use std::path::PathBuf;

use crate::db::{
    LibSqlPreferencesRepository, LibSqlStateCacheRepository, NewStateCache,
    PreferencesRepository, StateCacheRepository,
};
use crate::emulator;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::sync::{mtime_millis, SyncEngine};

/// Outcome of a session-end state capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatesOutcome {
    /// Count of slots newly cached or refreshed (zero is fine)
    Cached(usize),
    /// A prerequisite is missing; nothing was cached
    NotConfigured,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Discover and cache the session's save-states for a game.
    pub async fn capture_states_on_session_end(
        &self,
        game_id: i64,
        emulator_package: &str,
        core_id: Option<&str>,
        core_version: Option<&str>,
    ) -> Result<CaptureStatesOutcome> {
        let conn = self.db.connection();
        let prefs = LibSqlPreferencesRepository::new(conn).load().await?;
        if !prefs.state_cache_enabled {
            return Ok(CaptureStatesOutcome::NotConfigured);
        }

        let game = self.require_game(game_id).await?;
        let Some(rom_base) = game.rom_base_name() else {
            return Ok(CaptureStatesOutcome::NotConfigured);
        };
        let Some(emulator) = emulator::resolve_package(emulator_package) else {
            return Ok(CaptureStatesOutcome::NotConfigured);
        };
        let Some(state_dir) = emulator.state_dir_for(&self.paths.state_root, core_id) else {
            return Ok(CaptureStatesOutcome::NotConfigured);
        };

        let Ok(mut entries) = tokio::fs::read_dir(&state_dir).await else {
            // No state directory yet means no states, not a failure.
            return Ok(CaptureStatesOutcome::Cached(0));
        };

        let channel = game.active_channel.clone();
        let states = LibSqlStateCacheRepository::new(conn);
        let mut cached = 0;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(slot) = emulator.parse_state_slot(&file_name, &rom_base) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            let disk_mtime = mtime_millis(&metadata);

            let screenshot_on_disk = {
                let sidecar = state_dir.join(emulator.screenshot_file_name(&file_name));
                tokio::fs::metadata(&sidecar).await.is_ok().then_some(sidecar)
            };

            let existing = states
                .get_by_slot(game_id, emulator.id, slot, channel.as_deref())
                .await?;
            let should_cache = match &existing {
                None => true,
                Some(row) => {
                    disk_mtime > row.captured_at
                        || (row.screenshot_path.is_none() && screenshot_on_disk.is_some())
                }
            };
            if !should_cache {
                continue;
            }

            let (cache_path, screenshot_cache_path) = self
                .copy_state_into_cache(game_id, &channel, &file_name, &entry.path(), screenshot_on_disk)
                .await?;

            let row = states
                .upsert(&NewStateCache {
                    game_id,
                    platform_slug: game.platform_slug.clone(),
                    emulator_id: emulator.id.to_string(),
                    slot,
                    channel: channel.clone(),
                    captured_at: disk_mtime,
                    size_bytes: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
                    cache_path,
                    screenshot_path: screenshot_cache_path,
                    core_id: core_id.map(ToString::to_string),
                    core_version: core_version.map(ToString::to_string),
                })
                .await?;

            // New checkpoints on a named channel are locked from the start.
            if existing.is_none() && channel.is_some() {
                states.set_locked(row.id, true).await?;
            }
            cached += 1;
        }

        tracing::debug!(game_id, cached, "Captured session states");
        Ok(CaptureStatesOutcome::Cached(cached))
    }

    async fn copy_state_into_cache(
        &self,
        game_id: i64,
        channel: &Option<String>,
        file_name: &str,
        source: &std::path::Path,
        screenshot_on_disk: Option<PathBuf>,
    ) -> Result<(String, Option<String>)> {
        let dir = self
            .paths
            .cache_dir
            .join("states")
            .join(game_id.to_string())
            .join(channel.as_deref().unwrap_or("default"));
        tokio::fs::create_dir_all(&dir).await?;

        let dest = dir.join(file_name);
        tokio::fs::copy(source, &dest).await?;

        let screenshot_dest = match screenshot_on_disk {
            Some(sidecar) => {
                let dest = dir.join(format!("{file_name}.png"));
                tokio::fs::copy(&sidecar, &dest).await?;
                Some(dest.to_string_lossy().into_owned())
            }
            None => None,
        };

        Ok((dest.to_string_lossy().into_owned(), screenshot_dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GameRepository, LibSqlGameRepository, SyncPreferences};
    use crate::remote::mock::MockRemoteStore;
    use crate::sync::tests::{fixture, Fixture};
    use pretty_assertions::assert_eq;

    const PACKAGE: &str = "org.mupen64plusae.v3.fzurita";

    fn state_dir(fx: &Fixture) -> std::path::PathBuf {
        let dir = fx.tmp_path().join("states/mupen64plus/GameStates");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_feature_is_not_configured() {
        let fx = fixture(MockRemoteStore::new()).await;
        LibSqlPreferencesRepository::new(fx.engine.database().connection())
            .store(&SyncPreferences {
                state_cache_enabled: false,
                ..SyncPreferences::default()
            })
            .await
            .unwrap();

        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::NotConfigured);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_package_is_not_configured() {
        let fx = fixture(MockRemoteStore::new()).await;
        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, "com.example.unknown", None, None)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::NotConfigured);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn caches_discovered_slots_once() {
        let fx = fixture(MockRemoteStore::new()).await;
        let dir = state_dir(&fx);
        std::fs::write(dir.join("Majora.state"), b"slot0").unwrap();
        std::fs::write(dir.join("Majora.state2"), b"slot2").unwrap();
        std::fs::write(dir.join("Majora.state.auto"), b"auto").unwrap();
        std::fs::write(dir.join("Other.state"), b"not ours").unwrap();

        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, Some("mupen64plus_next"), Some("2.6.0"))
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::Cached(3));

        let rows = LibSqlStateCacheRepository::new(fx.engine.database().connection())
            .list_for_channel(fx.game_id, "mupen64plus", None)
            .await
            .unwrap();
        let slots: Vec<i32> = rows.iter().map(|r| r.slot).collect();
        assert_eq!(slots, vec![-1, 0, 2]);
        assert!(rows.iter().all(|r| !r.locked));
        assert!(rows
            .iter()
            .all(|r| r.core_id.as_deref() == Some("mupen64plus_next")));

        // Nothing changed on disk, so a second pass caches nothing.
        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, Some("mupen64plus_next"), Some("2.6.0"))
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::Cached(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn named_channel_locks_new_entries() {
        let fx = fixture(MockRemoteStore::new()).await;
        LibSqlGameRepository::new(fx.engine.database().connection())
            .set_active_channel(fx.game_id, Some("run"))
            .await
            .unwrap();
        let dir = state_dir(&fx);
        std::fs::write(dir.join("Majora.state"), b"slot0").unwrap();

        fx.engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();

        let rows = LibSqlStateCacheRepository::new(fx.engine.database().connection())
            .list_for_channel(fx.game_id, "mupen64plus", Some("run"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].locked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recaches_when_disk_is_newer() {
        let fx = fixture(MockRemoteStore::new()).await;
        let dir = state_dir(&fx);
        std::fs::write(dir.join("Majora.state"), b"v1").unwrap();
        fx.engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();

        // Age the cached row so the on-disk mtime is strictly newer.
        fx.engine
            .database()
            .connection()
            .execute("UPDATE state_cache SET captured_at = 1000", ())
            .await
            .unwrap();

        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::Cached(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recaches_when_screenshot_appears() {
        let fx = fixture(MockRemoteStore::new()).await;
        let dir = state_dir(&fx);
        std::fs::write(dir.join("Majora.state"), b"slot0").unwrap();
        fx.engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();

        std::fs::write(dir.join("Majora.state.png"), b"screenshot").unwrap();
        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::Cached(1));

        let rows = LibSqlStateCacheRepository::new(fx.engine.database().connection())
            .list_for_channel(fx.game_id, "mupen64plus", None)
            .await
            .unwrap();
        assert!(rows[0].screenshot_path.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_state_dir_caches_zero() {
        let fx = fixture(MockRemoteStore::new()).await;
        let outcome = fx
            .engine
            .capture_states_on_session_end(fx.game_id, PACKAGE, None, None)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureStatesOutcome::Cached(0));
    }
}
