//! Sync record and retry queue repository implementation

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::{SaveSyncRecord, SyncQueueEntry};

/// Fields for upserting the sync record of one save stream.
#[derive(Debug, Clone, Default)]
pub struct UpsertSyncRecord {
    pub game_id: i64,
    pub remote_game_id: i64,
    pub emulator_id: String,
    pub channel: Option<String>,
    pub remote_save_id: Option<i64>,
    pub local_save_path: Option<String>,
    pub local_updated_at: Option<i64>,
    pub server_updated_at: Option<i64>,
    pub last_synced_at: Option<i64>,
}

/// Trait for sync tracking and deferred upload storage (async)
#[allow(async_fn_in_trait)]
pub trait SyncRepository {
    /// The sync record for a (game, emulator, channel) stream, if any
    async fn get_record(
        &self,
        game_id: i64,
        emulator_id: &str,
        channel: Option<&str>,
    ) -> Result<Option<SaveSyncRecord>>;

    /// Insert or replace the sync record for a stream
    async fn upsert_record(&self, record: &UpsertSyncRecord) -> Result<SaveSyncRecord>;

    /// Append a deferred upload to the retry queue
    async fn enqueue(
        &self,
        game_id: i64,
        emulator_id: &str,
        save_path: &str,
        enqueued_at: i64,
    ) -> Result<SyncQueueEntry>;

    /// All queued uploads, oldest first
    async fn list_queue(&self) -> Result<Vec<SyncQueueEntry>>;

    /// Remove one queue entry after a successful (or abandoned) replay
    async fn remove_queue_entry(&self, id: i64) -> Result<()>;
}

/// libSQL implementation of `SyncRepository`
pub struct LibSqlSyncRepository<'a> {
    conn: &'a Connection,
}

const RECORD_COLUMNS: &str = "id, game_id, remote_game_id, emulator_id, channel, remote_save_id, \
     local_save_path, local_updated_at, server_updated_at, last_synced_at";

impl<'a> LibSqlSyncRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &libsql::Row) -> Result<SaveSyncRecord> {
        Ok(SaveSyncRecord {
            id: row.get(0)?,
            game_id: row.get(1)?,
            remote_game_id: row.get(2)?,
            emulator_id: row.get(3)?,
            channel: row.get(4)?,
            remote_save_id: row.get(5)?,
            local_save_path: row.get(6)?,
            local_updated_at: row.get(7)?,
            server_updated_at: row.get(8)?,
            last_synced_at: row.get(9)?,
        })
    }

    fn parse_queue_entry(row: &libsql::Row) -> Result<SyncQueueEntry> {
        Ok(SyncQueueEntry {
            id: row.get(0)?,
            game_id: row.get(1)?,
            emulator_id: row.get(2)?,
            save_path: row.get(3)?,
            enqueued_at: row.get(4)?,
        })
    }
}

impl SyncRepository for LibSqlSyncRepository<'_> {
    async fn get_record(
        &self,
        game_id: i64,
        emulator_id: &str,
        channel: Option<&str>,
    ) -> Result<Option<SaveSyncRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM save_sync
                     WHERE game_id = ? AND emulator_id = ?
                       AND COALESCE(channel, '') = COALESCE(?, '')"
                ),
                libsql::params![game_id, emulator_id, channel],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_record(&self, record: &UpsertSyncRecord) -> Result<SaveSyncRecord> {
        let existing = self
            .get_record(record.game_id, &record.emulator_id, record.channel.as_deref())
            .await?;

        if let Some(existing) = existing {
            self.conn
                .execute(
                    "UPDATE save_sync
                     SET remote_game_id = ?, remote_save_id = ?, local_save_path = ?,
                         local_updated_at = ?, server_updated_at = ?, last_synced_at = ?
                     WHERE id = ?",
                    libsql::params![
                        record.remote_game_id,
                        record.remote_save_id,
                        record.local_save_path.clone(),
                        record.local_updated_at,
                        record.server_updated_at,
                        record.last_synced_at,
                        existing.id
                    ],
                )
                .await?;
        } else {
            self.conn
                .execute(
                    "INSERT INTO save_sync
                        (game_id, remote_game_id, emulator_id, channel, remote_save_id,
                         local_save_path, local_updated_at, server_updated_at, last_synced_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    libsql::params![
                        record.game_id,
                        record.remote_game_id,
                        record.emulator_id.clone(),
                        record.channel.clone(),
                        record.remote_save_id,
                        record.local_save_path.clone(),
                        record.local_updated_at,
                        record.server_updated_at,
                        record.last_synced_at
                    ],
                )
                .await?;
        }

        self.get_record(record.game_id, &record.emulator_id, record.channel.as_deref())
            .await?
            .ok_or_else(|| Error::Database("upserted sync record not found".to_string()))
    }

    async fn enqueue(
        &self,
        game_id: i64,
        emulator_id: &str,
        save_path: &str,
        enqueued_at: i64,
    ) -> Result<SyncQueueEntry> {
        self.conn
            .execute(
                "INSERT INTO sync_queue (game_id, emulator_id, save_path, enqueued_at)
                 VALUES (?, ?, ?, ?)",
                libsql::params![game_id, emulator_id, save_path, enqueued_at],
            )
            .await?;

        let id = self.conn.last_insert_rowid();
        let mut rows = self
            .conn
            .query(
                "SELECT id, game_id, emulator_id, save_path, enqueued_at
                 FROM sync_queue WHERE id = ?",
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Self::parse_queue_entry(&row),
            None => Err(Error::Database("enqueued entry not found".to_string())),
        }
    }

    async fn list_queue(&self) -> Result<Vec<SyncQueueEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, game_id, emulator_id, save_path, enqueued_at
                 FROM sync_queue ORDER BY enqueued_at ASC, id ASC",
                (),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_queue_entry(&row)?);
        }
        Ok(entries)
    }

    async fn remove_queue_entry(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id])
            .await?;
        Ok(())
    }
}
