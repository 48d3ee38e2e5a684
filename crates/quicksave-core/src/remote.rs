//! Save-server client.
//!
//! `RemoteStore` is the seam the sync engine talks through; the HTTP
//! implementation targets the launcher's JSON save API. Timeouts are
//! enforced here, not by the engine: a timed-out request is just another
//! transient failure.

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::models::RemoteSave;

const HTTP_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("No connection to save server")]
    Unreachable,
    #[error("Server has a newer save (updated at {server_updated_at})")]
    Conflict { server_updated_at: i64 },
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Save server API error: {0}")]
    Api(String),
}

impl RemoteError {
    /// Transient failures route to the retry queue; everything else
    /// surfaces to the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable | Self::Http(_) | Self::Io(_))
    }
}

/// One upload attempt. `known_server_updated_at` is the server timestamp
/// the caller last observed; the server rejects the upload with `Conflict`
/// when its copy has moved past it.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub remote_game_id: i64,
    pub emulator_id: &'a str,
    pub channel: Option<&'a str>,
    pub file_name: &'a str,
    pub source_path: &'a Path,
    pub known_server_updated_at: Option<i64>,
}

/// Operations the sync engine needs from the save server.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Cheap reachability probe; never errors.
    async fn is_reachable(&self) -> bool;

    /// All saves the server holds for a remote game id.
    async fn list_saves(&self, remote_game_id: i64) -> Result<Vec<RemoteSave>, RemoteError>;

    /// Most recently updated save for (remote game, emulator), if any.
    async fn latest_save(
        &self,
        remote_game_id: i64,
        emulator_id: &str,
    ) -> Result<Option<RemoteSave>, RemoteError>;

    /// Upload a save file, overwriting the server copy for the same
    /// channel. Fails with [`RemoteError::Conflict`] when the server copy
    /// is newer than `known_server_updated_at`.
    async fn upload_save(&self, request: &UploadRequest<'_>) -> Result<RemoteSave, RemoteError>;

    /// Download a save's bytes to `dest`, creating parent directories.
    /// Returns the byte count.
    async fn download_save(&self, save_id: i64, dest: &Path) -> Result<u64, RemoteError>;
}

/// HTTP implementation of [`RemoteStore`].
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn is_reachable(&self) -> bool {
        self.client
            .get(self.url("/api/health"))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn list_saves(&self, remote_game_id: i64) -> Result<Vec<RemoteSave>, RemoteError> {
        let response = self
            .client
            .get(self.url("/api/saves"))
            .bearer_auth(&self.api_key)
            .query(&[("game_id", remote_game_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        Ok(response.json::<Vec<RemoteSave>>().await?)
    }

    async fn latest_save(
        &self,
        remote_game_id: i64,
        emulator_id: &str,
    ) -> Result<Option<RemoteSave>, RemoteError> {
        let response = self
            .client
            .get(self.url("/api/saves/latest"))
            .bearer_auth(&self.api_key)
            .query(&[
                ("game_id", remote_game_id.to_string()),
                ("emulator", emulator_id.to_string()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        Ok(Some(response.json::<RemoteSave>().await?))
    }

    async fn upload_save(&self, request: &UploadRequest<'_>) -> Result<RemoteSave, RemoteError> {
        let bytes = tokio::fs::read(request.source_path).await?;

        let mut http = self
            .client
            .post(self.url("/api/saves"))
            .bearer_auth(&self.api_key)
            .query(&[
                ("game_id", request.remote_game_id.to_string()),
                ("emulator", request.emulator_id.to_string()),
                ("file_name", request.file_name.to_string()),
            ])
            .body(bytes);
        if let Some(channel) = request.channel {
            http = http.query(&[("channel", channel)]);
        }
        if let Some(known) = request.known_server_updated_at {
            http = http.query(&[("if_not_newer_than", known.to_string())]);
        }

        let response = http.send().await?;

        if response.status() == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            let server_updated_at = serde_json::from_str::<ConflictBody>(&body)
                .ok()
                .and_then(|b| b.server_updated_at)
                .unwrap_or(0);
            return Err(RemoteError::Conflict { server_updated_at });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        Ok(response.json::<RemoteSave>().await?)
    }

    async fn download_save(&self, save_id: i64, dest: &Path) -> Result<u64, RemoteError> {
        let response = self
            .client
            .get(self.url(&format!("/api/saves/{save_id}/content")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let bytes = response.bytes().await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    server_updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String, RemoteError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "server URL must not be empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "server URL must include http:// or https://".to_string(),
        ))
    }
}
