//! Persisted admin configuration: the active stream URL and the admin-set
//! fallback.  `SettingsStore` is the seam; `FileSettingsStore` keeps a JSON
//! document on disk and `MemorySettingsStore` backs tests and ephemeral runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::RadioErrorKind;

/// Entity name used for cache invalidation.
pub const SETTINGS_ENTITY: &str = "settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub stream_url: String,
    #[serde(default)]
    pub fallback_url: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Incremented on every successful update.
    #[serde(default)]
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUrlUpdate {
    pub stream_url: String,
    #[serde(default)]
    pub fallback_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("settings storage unavailable: {0}")]
    Unavailable(String),
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed settings document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl StoreError {
    pub fn kind(&self) -> RadioErrorKind {
        match self {
            StoreError::Unavailable(_) => RadioErrorKind::DatabaseConnectionError,
            StoreError::Io(_) | StoreError::Malformed(_) => RadioErrorKind::DatabaseQueryFailed,
            StoreError::Constraint(_) => RadioErrorKind::DatabaseConstraintViolation,
            StoreError::Transaction(_) => RadioErrorKind::DatabaseTransactionFailed,
        }
    }
}

/// Read/write access to the persisted stream configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current persisted primary configuration, `None` if never configured.
    async fn active_settings(&self) -> Result<Option<StreamSettings>, StoreError>;

    /// Admin-configured fallback URL.
    async fn fallback_url(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .active_settings()
            .await?
            .and_then(|s| s.fallback_url)
            .filter(|u| !u.trim().is_empty()))
    }

    /// Replace the stream configuration in a single atomic step.
    async fn update_stream_url_atomic(
        &self,
        update: StreamUrlUpdate,
        admin_user_id: &str,
    ) -> Result<StreamSettings, StoreError>;

    /// Drop any cached reads of `entity`.
    async fn invalidate_entity_cache(&self, entity: &str);
}

fn apply_update(
    previous: Option<&StreamSettings>,
    update: StreamUrlUpdate,
    admin_user_id: &str,
) -> Result<StreamSettings, StoreError> {
    let stream_url = update.stream_url.trim().to_string();
    if stream_url.is_empty() {
        return Err(StoreError::Constraint("stream_url must not be empty".into()));
    }
    let fallback_url = update
        .fallback_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    if fallback_url.as_deref() == Some(stream_url.as_str()) {
        return Err(StoreError::Constraint(
            "fallback_url must differ from stream_url".into(),
        ));
    }
    Ok(StreamSettings {
        stream_url,
        fallback_url,
        updated_at: Utc::now(),
        updated_by: Some(admin_user_id.to_string()),
        revision: previous.map(|p| p.revision + 1).unwrap_or(1),
    })
}

// ── File-backed store ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum CachedRead {
    Stale,
    Loaded(Option<StreamSettings>),
}

/// JSON document on disk.  Writes go to a sibling temp file followed by a
/// rename, so readers never observe a half-written document.
pub struct FileSettingsStore {
    path: PathBuf,
    cache: RwLock<CachedRead>,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(CachedRead::Stale),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_from_disk(&self) -> Result<Option<StreamSettings>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_to_disk(&self, settings: &StreamSettings) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Transaction(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn active_settings(&self) -> Result<Option<StreamSettings>, StoreError> {
        if let CachedRead::Loaded(settings) = &*self.cache.read().await {
            return Ok(settings.clone());
        }
        let settings = self.read_from_disk().await?;
        *self.cache.write().await = CachedRead::Loaded(settings.clone());
        Ok(settings)
    }

    async fn update_stream_url_atomic(
        &self,
        update: StreamUrlUpdate,
        admin_user_id: &str,
    ) -> Result<StreamSettings, StoreError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.read_from_disk().await?;
        let next = apply_update(previous.as_ref(), update, admin_user_id)?;
        self.write_to_disk(&next).await?;
        *self.cache.write().await = CachedRead::Loaded(Some(next.clone()));
        info!(
            "settings: stream URL updated to {} (rev {}) by {}",
            next.stream_url, next.revision, admin_user_id
        );
        Ok(next)
    }

    async fn invalidate_entity_cache(&self, entity: &str) {
        if entity == SETTINGS_ENTITY {
            debug!("settings: cache invalidated");
            *self.cache.write().await = CachedRead::Stale;
        }
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemorySettingsStore {
    settings: RwLock<Option<StreamSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a primary (and optional fallback) URL.
    pub fn with_urls(stream_url: &str, fallback_url: Option<&str>) -> Self {
        Self {
            settings: RwLock::new(Some(StreamSettings {
                stream_url: stream_url.to_string(),
                fallback_url: fallback_url.map(str::to_string),
                updated_at: Utc::now(),
                updated_by: None,
                revision: 1,
            })),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn active_settings(&self) -> Result<Option<StreamSettings>, StoreError> {
        Ok(self.settings.read().await.clone())
    }

    async fn update_stream_url_atomic(
        &self,
        update: StreamUrlUpdate,
        admin_user_id: &str,
    ) -> Result<StreamSettings, StoreError> {
        let mut guard = self.settings.write().await;
        let next = apply_update(guard.as_ref(), update, admin_user_id)?;
        *guard = Some(next.clone());
        Ok(next)
    }

    async fn invalidate_entity_cache(&self, _entity: &str) {}
}
