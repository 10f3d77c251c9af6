//! # Key-Value Store
//!
//! The one shared mutable resource of the counting engine. Every component receives the store
//! through its constructor as an `Arc<dyn KeyValueStore>`; nothing reaches for a global handle.
//!
//! ## Primitives
//!
//! | Shape      | Operations                                         |
//! |------------|----------------------------------------------------|
//! | scalar     | GET, SET, DEL, INCRBY                              |
//! | set        | SADD, SREM, SISMEMBER, SCARD, SMEMBERS             |
//! | hash       | HINCRBY (and HDECR through it), HGET, HGETALL      |
//! | sorted set | ZINCRBY, ZSCORE, ZREVRANGE(BYSCORE) WITHSCORES     |
//!
//! Each call is atomic on its own. No call spans more than one key and there are no
//! transactions, so any sequence of calls may interleave with other writers.
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Unexpected value under key {key}")]
    Corrupt { key: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable(Box::new(err))
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// True if the key existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// True if `member` was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// True if `member` was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn scard(&self, key: &str) -> Result<u64, StoreError>;
    async fn smembers(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, StoreError>;

    async fn hdecr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.hincr(key, field, -delta).await
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;
    /// Members ranked `start..=stop` by descending score.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>, StoreError>;
    /// Every member scoring at least `min`, by descending score.
    async fn zrevrangebyscore_withscores(
        &self,
        key: &str,
        min: f64,
    ) -> Result<Vec<(String, f64)>, StoreError>;
}


#[cfg(test)]
mod tests {
    use super::{memory::MemoryStore, *};

    #[tokio::test]
    async fn test_absent_keys_read_empty() {
        let store = MemoryStore::new();

        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.scard("missing").await.unwrap(), 0);
        assert_eq!(store.hget("missing", "1").await.unwrap(), None);
        assert_eq!(store.zscore("missing", "1").await.unwrap(), None);
        assert!(store.zrevrange_withscores("missing", 0, 4).await.unwrap().is_empty());
        assert!(!store.del("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_hdecr_goes_through_hincr() {
        let store = MemoryStore::new();

        assert_eq!(store.hincr("likes", "7", 2).await.unwrap(), 2);
        assert_eq!(store.hdecr("likes", "7", 3).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_zrevrange_window() {
        let store = MemoryStore::new();
        for (member, score) in [("1", 3.0), ("2", 9.0), ("3", 5.0), ("4", 1.0)] {
            store.zincr("views", member, score).await.unwrap();
        }

        let ranked = store.zrevrange_withscores("views", 1, 2).await.unwrap();

        assert_eq!(
            ranked,
            vec![("3".to_string(), 5.0), ("1".to_string(), 3.0)]
        );

        let above = store.zrevrangebyscore_withscores("views", 3.0).await.unwrap();

        assert_eq!(
            above,
            vec![
                ("2".to_string(), 9.0),
                ("3".to_string(), 5.0),
                ("1".to_string(), 3.0)
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_shape_is_corrupt() {
        let store = MemoryStore::new();
        store.set("plain", "x").await.unwrap();

        assert!(matches!(
            store.sadd("plain", "a").await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            store.incr("plain", 1).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);

        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.sadd("k", "m").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
