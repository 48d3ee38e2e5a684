//! Game repository implementation

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::Game;

/// Fields for inserting a new game row.
#[derive(Debug, Clone, Default)]
pub struct NewGame {
    pub title: String,
    pub platform_slug: String,
    pub local_path: Option<String>,
    pub remote_id: Option<i64>,
    pub title_id: Option<String>,
    pub emulator_package: Option<String>,
}

/// Trait for game storage operations (async)
#[allow(async_fn_in_trait)]
pub trait GameRepository {
    /// Insert a new game row
    async fn insert(&self, game: &NewGame) -> Result<Game>;

    /// Get a game by id
    async fn get(&self, id: i64) -> Result<Option<Game>>;

    /// Find the game that has claimed a platform title id, if any
    async fn find_by_title_id(&self, title_id: &str) -> Result<Option<Game>>;

    /// Re-point the game's active save channel (`None` = default stream)
    async fn set_active_channel(&self, game_id: i64, channel: Option<&str>) -> Result<()>;

    /// Claim a title id for a game. Returns false without writing when a
    /// different game already holds it.
    async fn claim_title_id(&self, game_id: i64, title_id: &str) -> Result<bool>;
}

/// libSQL implementation of `GameRepository`
pub struct LibSqlGameRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlGameRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_game(row: &libsql::Row) -> Result<Game> {
        Ok(Game {
            id: row.get(0)?,
            title: row.get(1)?,
            platform_slug: row.get(2)?,
            local_path: row.get(3)?,
            remote_id: row.get(4)?,
            title_id: row.get(5)?,
            active_channel: row.get(6)?,
            emulator_package: row.get(7)?,
        })
    }
}

const GAME_COLUMNS: &str =
    "id, title, platform_slug, local_path, remote_id, title_id, active_channel, emulator_package";

impl GameRepository for LibSqlGameRepository<'_> {
    async fn insert(&self, game: &NewGame) -> Result<Game> {
        self.conn
            .execute(
                "INSERT INTO games
                    (title, platform_slug, local_path, remote_id, title_id, emulator_package)
                 VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    game.title.clone(),
                    game.platform_slug.clone(),
                    game.local_path.clone(),
                    game.remote_id,
                    game.title_id.clone(),
                    game.emulator_package.clone()
                ],
            )
            .await?;

        let id = self.conn.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("inserted game not found".to_string()))
    }

    async fn get(&self, id: i64) -> Result<Option<Game>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_game(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_title_id(&self, title_id: &str) -> Result<Option<Game>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {GAME_COLUMNS} FROM games WHERE title_id = ?"),
                [title_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_game(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_active_channel(&self, game_id: i64, channel: Option<&str>) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE games SET active_channel = ? WHERE id = ?",
                libsql::params![channel, game_id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("game {game_id}")));
        }
        Ok(())
    }

    async fn claim_title_id(&self, game_id: i64, title_id: &str) -> Result<bool> {
        if let Some(owner) = self.find_by_title_id(title_id).await? {
            return Ok(owner.id == game_id);
        }

        let rows = self
            .conn
            .execute(
                "UPDATE games SET title_id = ? WHERE id = ? AND title_id IS NULL",
                libsql::params![title_id, game_id],
            )
            .await?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn new_game(title: &str) -> NewGame {
        NewGame {
            title: title.to_string(),
            platform_slug: "snes".to_string(),
            local_path: Some(format!("/roms/snes/{title}.sfc")),
            remote_id: Some(100),
            title_id: None,
            emulator_package: Some("com.retroarch".to_string()),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let db = setup().await;
        let repo = LibSqlGameRepository::new(db.connection());

        let game = repo.insert(&new_game("Super Mario World")).await.unwrap();
        let fetched = repo.get(game.id).await.unwrap().unwrap();

        assert_eq!(fetched.title, "Super Mario World");
        assert_eq!(fetched.remote_id, Some(100));
        assert_eq!(fetched.active_channel, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_active_channel() {
        let db = setup().await;
        let repo = LibSqlGameRepository::new(db.connection());
        let game = repo.insert(&new_game("Chrono Trigger")).await.unwrap();

        repo.set_active_channel(game.id, Some("crono")).await.unwrap();
        let fetched = repo.get(game.id).await.unwrap().unwrap();
        assert_eq!(fetched.active_channel.as_deref(), Some("crono"));

        repo.set_active_channel(game.id, None).await.unwrap();
        let fetched = repo.get(game.id).await.unwrap().unwrap();
        assert_eq!(fetched.active_channel, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claim_title_id_respects_existing_owner() {
        let db = setup().await;
        let repo = LibSqlGameRepository::new(db.connection());
        let first = repo.insert(&new_game("Game A")).await.unwrap();
        let second = repo.insert(&new_game("Game B")).await.unwrap();

        assert!(repo.claim_title_id(first.id, "0100ABCD").await.unwrap());
        // Another game cannot steal the claim.
        assert!(!repo.claim_title_id(second.id, "0100ABCD").await.unwrap());
        // Re-claiming by the owner is a no-op success.
        assert!(repo.claim_title_id(first.id, "0100ABCD").await.unwrap());

        let owner = repo.find_by_title_id("0100ABCD").await.unwrap().unwrap();
        assert_eq!(owner.id, first.id);
    }
}
