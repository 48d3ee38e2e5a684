//! Save file discovery.
//!
//! Direct resolution renders the emulator's save-dir template and probes the
//! expected file name; template placeholders the engine can't fill (an
//! unknown active core, an unclaimed title id) degrade to a directory scan.
//! The title-id scan is a best-effort classifier keyed by session start
//! time, never a source of truth.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::emulator::EmulatorConfig;
use crate::error::Result;
use crate::models::Game;

/// Modification time of a file as unix ms; 0 when the filesystem can't say.
pub(crate) fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Resolve the on-device save file for a game, if one exists.
pub(crate) async fn direct_save_path(
    save_root: &Path,
    game: &Game,
    emulator: &EmulatorConfig,
) -> Option<PathBuf> {
    if emulator.uses_title_id {
        let dir = emulator.save_dir_for(save_root, None, game.title_id.as_deref())?;
        return newest_save_in_dir(&dir, emulator.save_ext, 0).await.map(|(path, _)| path);
    }

    let rom_base = game.rom_base_name()?;
    let file_name = emulator.save_file_name(&rom_base);

    if let Some(scan_base) = template_scan_root(emulator.save_dir, "{core}") {
        // Active core unknown here; probe every per-core subdirectory and
        // take the most recently written copy.
        return newest_named_file(&save_root.join(scan_base), &file_name).await;
    }

    let path = save_root.join(emulator.save_dir).join(file_name);
    tokio::fs::metadata(&path).await.ok().map(|_| path)
}

/// One-shot folder scan for an unclaimed title id: a title directory counts
/// as a candidate when it holds a save file written after the session
/// started. Exactly one candidate identifies the game; zero or several mean
/// the scan learned nothing.
pub(crate) async fn scan_for_title_id(
    save_root: &Path,
    emulator: &EmulatorConfig,
    session_started_at: i64,
) -> Result<Option<(String, PathBuf)>> {
    let Some(scan_base) = template_scan_root(emulator.save_dir, "{title_id}") else {
        return Ok(None);
    };
    let base = save_root.join(scan_base);
    let Ok(mut dirs) = tokio::fs::read_dir(&base).await else {
        return Ok(None);
    };

    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    while let Some(entry) = dirs.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let title_id = entry.file_name().to_string_lossy().into_owned();
        if let Some((path, _)) =
            newest_save_in_dir(&entry.path(), emulator.save_ext, session_started_at).await
        {
            candidates.push((title_id, path));
        }
    }

    if candidates.len() == 1 {
        Ok(candidates.pop())
    } else {
        if candidates.len() > 1 {
            tracing::debug!(
                count = candidates.len(),
                "Ambiguous title-id scan, skipping"
            );
        }
        Ok(None)
    }
}

/// Prefix of a dir template up to (excluding) a placeholder segment, or
/// `None` when the template doesn't use it.
fn template_scan_root<'a>(template: &'a str, placeholder: &str) -> Option<&'a str> {
    let idx = template.find(placeholder)?;
    Some(template[..idx].trim_end_matches('/'))
}

/// Most recent file with the given extension directly inside `dir`, modified
/// at or after `min_mtime`.
async fn newest_save_in_dir(
    dir: &Path,
    save_ext: &str,
    min_mtime: i64,
) -> Option<(PathBuf, i64)> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<(PathBuf, i64)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_none_or(|e| e != save_ext) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let mtime = mtime_millis(&metadata);
        if mtime < min_mtime {
            continue;
        }
        if newest.as_ref().is_none_or(|(_, t)| mtime > *t) {
            newest = Some((path, mtime));
        }
    }

    newest
}

/// Most recently modified `<subdir>/<file_name>` under `base`.
async fn newest_named_file(base: &Path, file_name: &str) -> Option<PathBuf> {
    let mut dirs = tokio::fs::read_dir(base).await.ok()?;
    let mut newest: Option<(PathBuf, i64)> = None;

    while let Ok(Some(entry)) = dirs.next_entry().await {
        let candidate = entry.path().join(file_name);
        let Ok(metadata) = tokio::fs::metadata(&candidate).await else {
            continue;
        };
        let mtime = mtime_millis(&metadata);
        if newest.as_ref().is_none_or(|(_, t)| mtime > *t) {
            newest = Some((candidate, mtime));
        }
    }

    newest.map(|(path, _)| path)
}
