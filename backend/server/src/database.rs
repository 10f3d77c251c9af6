//! # Redis
//!
//! RAM database.
//!
//! Core purpose is to hold the per-entity popularity counters and the per-user like memberships.
//! Every mutation is a single atomic Redis command; Redis queues them so concurrent requests never
//! need an application-side lock.
//!
//! ## Implementation
//!
//! - Sorted set for article views: `ZINCRBY` on every detail view, `ZREVRANGE` for rankings
//! - Hash per entity kind for likes: compact field per entity id, `HINCRBY` both ways
//! - Set per user and entity kind for like membership
//! - Set + hash for the daily visitor window, cleared by the reconciler
//! - Plain strings for the cached configuration blobs, no TTL
//!
//! Reads of absent keys come back as empty/zero; Redis creates counters lazily on first increment.
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::store::{KeyValueStore, StoreError};

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).map_err(StoreError::unavailable)?;
    let connection_manager = client
        .get_connection_manager_with_config(config)
        .await
        .map_err(StoreError::unavailable)?;

    Ok(connection_manager)
}

/// [KeyValueStore] over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .get::<_, Option<String>>(key)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn()
            .set::<_, _, ()>(key, value)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let removed: usize = self
            .conn()
            .del(key)
            .await
            .map_err(StoreError::unavailable)?;

        Ok(removed > 0)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.conn()
            .incr::<_, _, i64>(key, delta)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let added: usize = self
            .conn()
            .sadd(key, member)
            .await
            .map_err(StoreError::unavailable)?;

        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed: usize = self
            .conn()
            .srem(key, member)
            .await
            .map_err(StoreError::unavailable)?;

        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.conn()
            .sismember::<_, _, bool>(key, member)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.conn()
            .scard::<_, u64>(key)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn smembers(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        self.conn()
            .smembers::<_, HashSet<String>>(key)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.conn()
            .hincr::<_, _, _, i64>(key, field, delta)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        self.conn()
            .hget::<_, _, Option<i64>>(key, field)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        self.conn()
            .hgetall::<_, HashMap<String, i64>>(key)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        self.conn()
            .zincr::<_, _, _, f64>(key, member, delta)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.conn()
            .zscore::<_, _, Option<f64>>(key, member)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.conn()
            .zrevrange_withscores::<_, Vec<(String, f64)>>(key, start as isize, stop as isize)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn zrevrangebyscore_withscores(
        &self,
        key: &str,
        min: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.conn()
            .zrevrangebyscore_withscores::<_, _, _, Vec<(String, f64)>>(key, "+inf", min)
            .await
            .map_err(StoreError::unavailable)
    }
}
