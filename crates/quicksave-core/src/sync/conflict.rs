//! Conflict resolution: the explicit follow-up to a `Conflict` outcome.
//!
//! Both branches overwrite one side with the other; neither merges bytes.
//! Failures here surface as `Error` immediately; the user asked for this
//! action and is watching the result.

use std::path::Path;

use crate::db::{LibSqlSyncRepository, SyncRepository, UpsertSyncRecord};
use crate::error::Result;
use crate::remote::{RemoteStore, UploadRequest};
use crate::sync::{mtime_millis, resolve_emulator, upload_file_name, SyncEngine};
use crate::{emulator, now_millis};

/// Which side of a save conflict survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Re-upload the local save, overwriting the server copy
    KeepLocal,
    /// Download the server copy, overwriting the local save
    KeepServer,
}

/// Outcome of a resolution attempt. No silent partial states: either the
/// chosen side fully replaced the other, or the message says why not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    Resolved,
    Error(String),
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Resolve a save conflict for one (game, emulator, channel) stream.
    pub async fn resolve_conflict(
        &self,
        game_id: i64,
        emulator_id: &str,
        choice: ConflictChoice,
        channel: Option<&str>,
    ) -> Result<ConflictOutcome> {
        let game = self.require_game(game_id).await?;
        let Some(remote_game_id) = game.remote_id else {
            return Ok(ConflictOutcome::Error(
                "game has no remote identity".to_string(),
            ));
        };
        let Some(emulator) = emulator::get(emulator_id).or_else(|| resolve_emulator(&game))
        else {
            return Ok(ConflictOutcome::Error(format!(
                "unknown emulator {emulator_id}"
            )));
        };

        let sync_repo = LibSqlSyncRepository::new(self.db.connection());
        let record = sync_repo.get_record(game_id, emulator.id, channel).await?;
        let Some(local_path) = record.as_ref().and_then(|r| r.local_save_path.clone()) else {
            return Ok(ConflictOutcome::Error(
                "no known local save path for this stream".to_string(),
            ));
        };

        match choice {
            ConflictChoice::KeepLocal => {
                let metadata = match tokio::fs::metadata(&local_path).await {
                    Ok(m) => m,
                    Err(e) => {
                        return Ok(ConflictOutcome::Error(format!(
                            "local save unreadable: {e}"
                        )))
                    }
                };
                let file_name = upload_file_name(emulator, channel);
                let request = UploadRequest {
                    remote_game_id,
                    emulator_id: emulator.id,
                    channel,
                    file_name: &file_name,
                    source_path: Path::new(&local_path),
                    // Forced overwrite: the user chose the local side.
                    known_server_updated_at: None,
                };
                match self.remote.upload_save(&request).await {
                    Ok(uploaded) => {
                        self.record_upload(
                            &game,
                            emulator.id,
                            Path::new(&local_path),
                            mtime_millis(&metadata),
                            &uploaded,
                        )
                        .await?;
                        tracing::info!(game_id, "Conflict resolved keeping local save");
                        Ok(ConflictOutcome::Resolved)
                    }
                    Err(e) => Ok(ConflictOutcome::Error(e.to_string())),
                }
            }
            ConflictChoice::KeepServer => {
                let remote_save = match self.remote.latest_save(remote_game_id, emulator.id).await
                {
                    Ok(Some(save)) => save,
                    Ok(None) => {
                        return Ok(ConflictOutcome::Error(
                            "server no longer has a save for this game".to_string(),
                        ))
                    }
                    Err(e) => return Ok(ConflictOutcome::Error(e.to_string())),
                };

                if let Err(e) = self
                    .remote
                    .download_save(remote_save.id, Path::new(&local_path))
                    .await
                {
                    return Ok(ConflictOutcome::Error(e.to_string()));
                }

                let server_updated_at = remote_save.updated_at_millis();
                let local_updated_at = tokio::fs::metadata(&local_path)
                    .await
                    .map(|m| mtime_millis(&m))
                    .ok();
                sync_repo
                    .upsert_record(&UpsertSyncRecord {
                        game_id,
                        remote_game_id,
                        emulator_id: emulator.id.to_string(),
                        channel: channel.map(ToString::to_string),
                        remote_save_id: Some(remote_save.id),
                        local_save_path: Some(local_path),
                        local_updated_at,
                        server_updated_at,
                        last_synced_at: Some(now_millis()),
                    })
                    .await?;
                tracing::info!(game_id, "Conflict resolved keeping server save");
                Ok(ConflictOutcome::Resolved)
            }
        }
    }
}
