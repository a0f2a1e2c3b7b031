//! Derived-state cache. Never authoritative: everything in here is
//! reconstructible from schedules, bookings, and holds, so a cache
//! outage degrades to recompute-on-read, never to a correctness error.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::error::CoreError;
use crate::model::{now_ms, Ms};

/// Key for a memoized slot list.
pub fn availability_key(tenant: Ulid, resource_id: Ulid, date: NaiveDate) -> String {
    format!("availability:{tenant}:{resource_id}:{date}")
}

/// Key/value store with per-entry TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    async fn put(&self, key: &str, value: String, ttl_ms: Ms) -> Result<(), CoreError>;
    async fn remove(&self, key: &str) -> Result<(), CoreError>;
}

// ── In-process backend ───────────────────────────────────────────

/// In-process cache. Entries carry an explicit expiry instant and the
/// same liveness predicate as holds and waitlist entries — expiry is
/// checked at read, and `purge_expired` exists for housekeeping.
///
/// Invalidation only reaches this process. Fine for tests and
/// single-instance deployments; multi-instance deployments need
/// [`RedisCache`] for cross-instance invalidation.
#[derive(Default)]
pub struct LocalCache {
    entries: DashMap<String, (String, Ms)>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purge_expired(&self, now: Ms) {
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        match self.entries.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if *expires_at > now_ms() {
                    Ok(Some(value.clone()))
                } else {
                    drop(entry);
                    self.entries.remove(key);
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl_ms: Ms) -> Result<(), CoreError> {
        self.entries
            .insert(key.to_string(), (value, now_ms() + ttl_ms));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ── Distributed backend ──────────────────────────────────────────

/// Redis-backed cache shared by all app instances.
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let client =
            redis::Client::open(url).map_err(|e| CoreError::Storage(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl_ms: Ms) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        // SETEX wants whole seconds; round up so short TTLs still expire
        let secs = ((ttl_ms + 999) / 1000).max(1);
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(secs)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }
}

// ── Fallback combinator ──────────────────────────────────────────

/// Primary backend with an in-process fallback. A primary failure is
/// logged and counted, then served locally — callers never see cache
/// errors. While degraded, cross-instance invalidation guarantees are
/// gone; other instances stop seeing this instance's invalidations
/// until the primary recovers.
pub struct FallbackCache<P> {
    primary: P,
    local: LocalCache,
}

impl<P: CacheBackend> FallbackCache<P> {
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            local: LocalCache::new(),
        }
    }

    fn degrade(&self, op: &str, key: &str, err: &CoreError) {
        tracing::warn!("cache {op} for {key} failed, using local fallback: {err}");
        metrics::counter!(crate::observability::CACHE_FALLBACK_TOTAL).increment(1);
    }
}

#[async_trait]
impl<P: CacheBackend> CacheBackend for FallbackCache<P> {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        match self.primary.get(key).await {
            Ok(hit) => Ok(hit),
            Err(e) => {
                self.degrade("get", key, &e);
                self.local.get(key).await
            }
        }
    }

    async fn put(&self, key: &str, value: String, ttl_ms: Ms) -> Result<(), CoreError> {
        match self.primary.put(key, value.clone(), ttl_ms).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.degrade("put", key, &e);
                self.local.put(key, value, ttl_ms).await
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), CoreError> {
        // Always clear the local copy too, so a recovered primary can't
        // resurrect a locally-served stale entry.
        let local = self.local.remove(key).await;
        match self.primary.remove(key).await {
            Ok(()) => local,
            Err(e) => {
                self.degrade("remove", key, &e);
                local
            }
        }
    }
}
