//! Quicksave CLI - front-end for the save/state synchronization engine
//!
//! Exposes the read-model queries and the launch/session protocol for a
//! headless device or for debugging a misbehaving sync.

use std::env;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use quicksave_core::db::Database;
use quicksave_core::models::{SaveSource, UnifiedSaveEntry};
use quicksave_core::remote::HttpRemoteStore;
use quicksave_core::restore::RestoreSaveResult;
use quicksave_core::sync::{
    ConflictChoice, ConflictOutcome, DevicePaths, PreLaunchStatus, SessionSyncStatus, SyncEngine,
};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "quicksave")]
#[command(about = "Keep game saves and save-states in sync with a save server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local cache database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Root directory emulators write save files under
    #[arg(long, value_name = "PATH")]
    save_root: Option<PathBuf>,

    /// Root directory emulators write save-states under
    #[arg(long, value_name = "PATH")]
    state_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the merged local/remote save timeline for a game
    Saves {
        /// Game id
        game_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the save-state slot view for a game
    States {
        /// Game id
        game_id: i64,
        /// Channel name (omit for the default channel)
        #[arg(long)]
        channel: Option<String>,
        /// Active core id, for version compatibility checks
        #[arg(long)]
        core: Option<String>,
        /// Active core version
        #[arg(long)]
        core_version: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the pre-launch sync check for a game
    LaunchCheck {
        /// Game id
        game_id: i64,
    },
    /// Run the post-session sync for a game
    SessionEnd {
        /// Game id
        game_id: i64,
        /// Session start time as unix milliseconds
        #[arg(long, value_name = "MILLIS")]
        started_at: i64,
        /// Also capture on-disk save-states into the local cache
        #[arg(long)]
        capture_states: bool,
        /// Active core id (used when capturing states)
        #[arg(long)]
        core: Option<String>,
        /// Active core version
        #[arg(long)]
        core_version: Option<String>,
    },
    /// Resolve a save conflict for a game
    Resolve {
        /// Game id
        game_id: i64,
        /// Emulator id
        emulator: String,
        /// Keep the local save, overwriting the server copy
        #[arg(long, conflicts_with = "keep_server")]
        keep_local: bool,
        /// Keep the server save, overwriting the local copy
        #[arg(long)]
        keep_server: bool,
        /// Channel name (omit for the default stream)
        #[arg(long)]
        channel: Option<String>,
    },
    /// Restore a save entry into the emulator's save location
    Restore {
        /// Game id
        game_id: i64,
        /// Emulator id
        emulator: String,
        /// Local cache row id to restore (omit to download by remote id)
        #[arg(long, value_name = "ID")]
        local_id: Option<i64>,
        /// Remote save id to restore
        #[arg(long, value_name = "ID")]
        remote_id: Option<i64>,
        /// Channel to repoint the game at (omit for the default stream)
        #[arg(long)]
        channel: Option<String>,
        /// Active core id, for core-aware path construction
        #[arg(long)]
        core: Option<String>,
        /// Also upload the restored save back to the server
        #[arg(long)]
        sync: bool,
    },
    /// Restore every cached save-state of a channel into the emulator
    RestoreStates {
        /// Game id
        game_id: i64,
        /// Emulator id
        emulator: String,
        /// Channel name (omit for the default channel)
        #[arg(long)]
        channel: Option<String>,
        /// Active core id
        #[arg(long)]
        core: Option<String>,
    },
    /// Replay queued uploads that previously failed
    Replay,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] quicksave_core::Error),
    #[error(transparent)]
    Remote(#[from] quicksave_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Restore needs --local-id or --remote-id")]
    NoRestoreSource,
    #[error("Resolve needs --keep-local or --keep-server")]
    NoConflictChoice,
    #[error(
        "Save server is not configured. Set QUICKSAVE_SERVER_URL and QUICKSAVE_API_KEY."
    )]
    ServerNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quicksave=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let engine = open_engine(
        cli.db_path.as_deref(),
        cli.save_root.clone(),
        cli.state_root.clone(),
    )
    .await?;

    match cli.command {
        Commands::Saves { game_id, json } => run_saves(&engine, game_id, json).await?,
        Commands::States {
            game_id,
            channel,
            core,
            core_version,
            json,
        } => {
            run_states(
                &engine,
                game_id,
                channel.as_deref(),
                core.as_deref(),
                core_version.as_deref(),
                json,
            )
            .await?;
        }
        Commands::LaunchCheck { game_id } => run_launch_check(&engine, game_id).await?,
        Commands::SessionEnd {
            game_id,
            started_at,
            capture_states,
            core,
            core_version,
        } => {
            run_session_end(
                &engine,
                game_id,
                started_at,
                capture_states,
                core.as_deref(),
                core_version.as_deref(),
            )
            .await?;
        }
        Commands::Resolve {
            game_id,
            emulator,
            keep_local,
            keep_server,
            channel,
        } => {
            let choice = match (keep_local, keep_server) {
                (true, _) => ConflictChoice::KeepLocal,
                (_, true) => ConflictChoice::KeepServer,
                _ => return Err(CliError::NoConflictChoice),
            };
            run_resolve(&engine, game_id, &emulator, choice, channel.as_deref()).await?;
        }
        Commands::Restore {
            game_id,
            emulator,
            local_id,
            remote_id,
            channel,
            core,
            sync,
        } => {
            run_restore(
                &engine,
                game_id,
                &emulator,
                local_id,
                remote_id,
                channel,
                core.as_deref(),
                sync,
            )
            .await?;
        }
        Commands::RestoreStates {
            game_id,
            emulator,
            channel,
            core,
        } => {
            let restored = engine
                .restore_channel_states(game_id, channel.as_deref(), &emulator, core.as_deref())
                .await?;
            println!("Restored {restored} state(s)");
        }
        Commands::Replay => {
            let report = engine.replay_queued_uploads().await?;
            println!(
                "Replayed {} upload(s), {} still queued",
                report.replayed, report.remaining
            );
        }
    }

    Ok(())
}

async fn run_saves(
    engine: &SyncEngine<HttpRemoteStore>,
    game_id: i64,
    as_json: bool,
) -> Result<(), CliError> {
    let entries = engine.unified_saves(game_id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No saves for game {game_id}");
    } else {
        for line in format_save_lines(&entries) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_states(
    engine: &SyncEngine<HttpRemoteStore>,
    game_id: i64,
    channel: Option<&str>,
    core: Option<&str>,
    core_version: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let slots = engine
        .state_slots(game_id, channel, core, core_version)
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&slots)?);
        return Ok(());
    }
    for entry in &slots {
        let slot_label = if entry.slot < 0 {
            "auto".to_string()
        } else {
            entry.slot.to_string()
        };
        if entry.is_empty() {
            println!("{slot_label:>4}  (empty)");
        } else {
            println!(
                "{slot_label:>4}  {}  {}  {:?}",
                format_timestamp(entry.timestamp.unwrap_or(0)),
                entry.core_id.as_deref().unwrap_or("-"),
                entry.version_status,
            );
        }
    }
    Ok(())
}

async fn run_launch_check(
    engine: &SyncEngine<HttpRemoteStore>,
    game_id: i64,
) -> Result<(), CliError> {
    match engine.pre_launch_sync(game_id).await? {
        PreLaunchStatus::Ready => println!("Ready"),
        PreLaunchStatus::NoConnection => println!("No connection; launching without sync"),
        PreLaunchStatus::LocalModified { save_path, channel } => {
            println!(
                "Local save was modified outside sync: {save_path} (channel: {})",
                channel.as_deref().unwrap_or("default")
            );
        }
        PreLaunchStatus::ServerNewer { server_timestamp } => {
            println!("Server has a newer save ({})", format_timestamp(server_timestamp));
        }
    }
    Ok(())
}

async fn run_session_end(
    engine: &SyncEngine<HttpRemoteStore>,
    game_id: i64,
    started_at: i64,
    capture_states: bool,
    core: Option<&str>,
    core_version: Option<&str>,
) -> Result<(), CliError> {
    match engine.sync_on_session_end(game_id, started_at).await? {
        SessionSyncStatus::Uploaded => println!("Uploaded"),
        SessionSyncStatus::Queued => println!("Upload failed; queued for retry"),
        SessionSyncStatus::Conflict {
            local_timestamp,
            server_timestamp,
            ..
        } => {
            println!(
                "Conflict: local {} vs server {} (resolve with `quicksave resolve`)",
                format_timestamp(local_timestamp),
                format_timestamp(server_timestamp)
            );
        }
        SessionSyncStatus::NoSaveFound => println!("No save file found"),
        SessionSyncStatus::NotConfigured => println!("Sync not configured"),
    }

    if capture_states {
        let package = engine
            .game(game_id)
            .await?
            .and_then(|game| game.emulator_package);
        if let Some(package) = package {
            let outcome = engine
                .capture_states_on_session_end(game_id, &package, core, core_version)
                .await?;
            println!("State capture: {outcome:?}");
        } else {
            println!("State capture skipped: no emulator configured");
        }
    }
    Ok(())
}

async fn run_resolve(
    engine: &SyncEngine<HttpRemoteStore>,
    game_id: i64,
    emulator: &str,
    choice: ConflictChoice,
    channel: Option<&str>,
) -> Result<(), CliError> {
    match engine
        .resolve_conflict(game_id, emulator, choice, channel)
        .await?
    {
        ConflictOutcome::Resolved => println!("Resolved"),
        ConflictOutcome::Error(message) => println!("Failed: {message}"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_restore(
    engine: &SyncEngine<HttpRemoteStore>,
    game_id: i64,
    emulator: &str,
    local_id: Option<i64>,
    remote_id: Option<i64>,
    channel: Option<String>,
    core: Option<&str>,
    sync: bool,
) -> Result<(), CliError> {
    let source = match (local_id, remote_id) {
        (Some(_), _) => SaveSource::Local,
        (None, Some(_)) => SaveSource::Server,
        (None, None) => return Err(CliError::NoRestoreSource),
    };
    let entry = UnifiedSaveEntry {
        local_cache_id: local_id,
        remote_save_id: remote_id,
        timestamp: 0,
        size_bytes: 0,
        channel,
        source,
        remote_file_name: None,
        is_latest: false,
        locked: false,
        hardcore: false,
        cheats_used: false,
    };

    match engine
        .restore_save(game_id, emulator, &entry, core, sync)
        .await?
    {
        RestoreSaveResult::Restored { target_path } => {
            println!("Restored to {}", target_path.display());
        }
        RestoreSaveResult::RestoredAndSynced { target_path } => {
            println!("Restored to {} and synced", target_path.display());
        }
        RestoreSaveResult::Error(message) => println!("Failed: {message}"),
    }
    Ok(())
}

fn format_save_lines(entries: &[UnifiedSaveEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let name = if entry.is_latest {
                "latest".to_string()
            } else {
                entry
                    .channel
                    .clone()
                    .unwrap_or_else(|| format_timestamp(entry.timestamp))
            };
            let source = match entry.source {
                SaveSource::Local => "local",
                SaveSource::Server => "server",
                SaveSource::Both => "both",
            };
            let lock = if entry.locked { "locked" } else { "" };
            format!(
                "{name:<24}  {source:<6}  {:>10} B  {}  {lock}",
                entry.size_bytes,
                format_timestamp(entry.timestamp),
            )
        })
        .collect()
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

async fn open_engine(
    db_path: Option<&Path>,
    save_root: Option<PathBuf>,
    state_root: Option<PathBuf>,
) -> Result<SyncEngine<HttpRemoteStore>, CliError> {
    let db_path = resolve_db_path(db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path).await?;

    let server_url =
        env::var("QUICKSAVE_SERVER_URL").map_err(|_| CliError::ServerNotConfigured)?;
    let api_key = env::var("QUICKSAVE_API_KEY").map_err(|_| CliError::ServerNotConfigured)?;
    let remote = HttpRemoteStore::new(server_url, api_key)?;

    let data_dir = default_data_dir();
    let paths = DevicePaths {
        save_root: save_root
            .or_else(|| env::var_os("QUICKSAVE_SAVE_ROOT").map(PathBuf::from))
            .unwrap_or_else(|| data_dir.join("device")),
        state_root: state_root
            .or_else(|| env::var_os("QUICKSAVE_STATE_ROOT").map(PathBuf::from))
            .unwrap_or_else(|| data_dir.join("device")),
        cache_dir: data_dir.join("cache"),
    };

    Ok(SyncEngine::new(db, remote, paths))
}

fn resolve_db_path(cli_db_path: Option<&Path>) -> PathBuf {
    cli_db_path.map_or_else(
        || {
            env::var_os("QUICKSAVE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_data_dir().join("quicksave.db"))
        },
        Path::to_path_buf,
    )
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quicksave")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel: Option<&str>, is_latest: bool) -> UnifiedSaveEntry {
        UnifiedSaveEntry {
            local_cache_id: Some(1),
            remote_save_id: None,
            timestamp: 1_700_000_000_000,
            size_bytes: 4096,
            channel: channel.map(ToString::to_string),
            source: SaveSource::Local,
            remote_file_name: None,
            is_latest,
            locked: channel.is_some(),
            hardcore: false,
            cheats_used: false,
        }
    }

    #[test]
    fn format_timestamp_renders_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn save_lines_label_latest_and_channels() {
        let lines = format_save_lines(&[entry(None, true), entry(Some("boss"), false)]);
        assert!(lines[0].starts_with("latest"));
        assert!(lines[1].starts_with("boss"));
        assert!(lines[1].contains("locked"));
    }

    #[test]
    fn db_path_prefers_explicit_flag() {
        let explicit = resolve_db_path(Some(Path::new("/tmp/x.db")));
        assert_eq!(explicit, PathBuf::from("/tmp/x.db"));
    }
}
