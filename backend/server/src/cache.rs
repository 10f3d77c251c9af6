//! # Configuration Cache
//!
//! Cache-aside over a single JSON blob with a durable fallback.
//!
//! - Read: cached string under the key, otherwise load from the durable source and cache it with
//!   no expiry.
//! - Write: durable source first, then delete the cached entry. The new value is never written
//!   straight into the cache; the next read repopulates it.
//!
//! Two blobs use it: the website configuration and the page cover list.
use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, warn};

use crate::{error::AppError, store::KeyValueStore};

/// Durable home of a configuration blob.
#[async_trait]
pub trait ConfigSource<T>: Send + Sync {
    async fn load(&self) -> Result<T, AppError>;
    async fn save(&self, value: &T) -> Result<(), AppError>;
}

pub struct ConfigCache<T> {
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn ConfigSource<T>>,
    key: &'static str,
}

impl<T> ConfigCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn ConfigSource<T>>,
        key: &'static str,
    ) -> Self {
        Self { store, source, key }
    }

    pub async fn get(&self) -> Result<T, AppError> {
        if let Some(cached) = self.store.get(self.key).await? {
            match serde_json::from_str(&cached) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Dropping undecodable {} cache entry: {e}", self.key);
                    self.store.del(self.key).await?;
                }
            }
        }

        debug!("{} cache miss", self.key);

        let value = self.source.load().await?;
        self.store
            .set(self.key, &serde_json::to_string(&value)?)
            .await?;

        Ok(value)
    }

    pub async fn update(&self, value: &T) -> Result<(), AppError> {
        self.source.save(value).await?;
        self.store.del(self.key).await?;

        Ok(())
    }
}

/// Site-wide settings shown by the front end. Fields not listed here are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsiteConfig {
    pub website_name: String,
    pub website_author: String,
    pub website_intro: String,
    pub website_avatar: String,
    pub website_notice: String,
    pub website_create_time: String,
    pub website_record_no: String,
    pub social_login_list: Vec<String>,
    pub is_comment_review: bool,
    pub is_message_review: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCover {
    pub id: i64,
    pub page_name: String,
    pub page_label: String,
    pub page_cover: String,
}

/// A JSON document on disk. A missing file reads as the default value.
pub struct JsonFileSource<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileSource<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> ConfigSource<T> for JsonFileSource<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    async fn load(&self) -> Result<T, AppError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using defaults", self.path.display());
                Ok(T::default())
            }
            Err(e) => Err(AppError::ConfigSource(Box::new(e))),
        }
    }

    async fn save(&self, value: &T) -> Result<(), AppError> {
        let contents = serde_json::to_string_pretty(value)?;
        let staging = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::ConfigSource(Box::new(e)))?;
        }

        fs::write(&staging, contents)
            .await
            .map_err(|e| AppError::ConfigSource(Box::new(e)))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| AppError::ConfigSource(Box::new(e)))?;

        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    /// In-memory [ConfigSource] counting loads, with an injectable save failure.
    #[derive(Default)]
    pub struct MemorySource<T> {
        pub value: Mutex<T>,
        pub loads: AtomicUsize,
        pub fail_saves: AtomicBool,
    }

    impl<T> MemorySource<T> {
        pub fn new(value: T) -> Self {
            Self {
                value: Mutex::new(value),
                loads: AtomicUsize::new(0),
                fail_saves: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl<T> ConfigSource<T> for MemorySource<T>
    where
        T: Clone + Send + Sync,
    {
        async fn load(&self) -> Result<T, AppError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.lock().clone())
        }

        async fn save(&self, value: &T) -> Result<(), AppError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(AppError::ConfigSource(Box::new(DiskFull)));
            }
            *self.value.lock() = value.clone();
            Ok(())
        }
    }
}
