//! Database migrations

use libsql::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement
    // separately inside a transaction for atomicity.
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Game library rows
        "CREATE TABLE IF NOT EXISTS games (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            platform_slug TEXT NOT NULL,
            local_path TEXT,
            remote_id INTEGER,
            title_id TEXT,
            active_channel TEXT,
            emulator_package TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_games_remote ON games(remote_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_games_title_id ON games(title_id)",
        // Local save snapshots
        "CREATE TABLE IF NOT EXISTS save_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            emulator_id TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            cache_path TEXT NOT NULL,
            locked INTEGER NOT NULL DEFAULT 0,
            channel TEXT,
            needs_sync INTEGER NOT NULL DEFAULT 0,
            last_synced_at INTEGER,
            last_sync_error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_save_cache_game ON save_cache(game_id, captured_at DESC)",
        // Local save-state snapshots, one row per occupied slot
        "CREATE TABLE IF NOT EXISTS state_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            platform_slug TEXT NOT NULL,
            emulator_id TEXT NOT NULL,
            slot INTEGER NOT NULL,
            channel TEXT,
            captured_at INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            cache_path TEXT NOT NULL,
            screenshot_path TEXT,
            core_id TEXT,
            core_version TEXT,
            locked INTEGER NOT NULL DEFAULT 0,
            note TEXT
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_state_cache_slot
            ON state_cache(game_id, emulator_id, slot, COALESCE(channel, ''))",
        // Per-stream sync tracking
        "CREATE TABLE IF NOT EXISTS save_sync (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
            remote_game_id INTEGER NOT NULL,
            emulator_id TEXT NOT NULL,
            channel TEXT,
            remote_save_id INTEGER,
            local_save_path TEXT,
            local_updated_at INTEGER,
            server_updated_at INTEGER,
            last_synced_at INTEGER
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_save_sync_stream
            ON save_sync(game_id, emulator_id, COALESCE(channel, ''))",
        // Deferred uploads, replayed FIFO
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL,
            emulator_id TEXT NOT NULL,
            save_path TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL
        )",
        // Settings table (local only)
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: content hashes and achievement flags on saves
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "ALTER TABLE save_cache ADD COLUMN content_hash TEXT",
        "ALTER TABLE save_cache ADD COLUMN hardcore INTEGER NOT NULL DEFAULT 0",
        "ALTER TABLE save_cache ADD COLUMN cheats_used INTEGER NOT NULL DEFAULT 0",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
