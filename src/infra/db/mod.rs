//! Postgres-backed durable cache tier.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    query, query_as,
    postgres::{PgPool, PgPoolOptions},
};
use time::OffsetDateTime;

use crate::cache::{BackendError, CacheEntry, DurableCacheBackend};

const BACKEND: &str = "postgres";

type EntryRow = (String, String, i64, OffsetDateTime);

#[derive(Clone)]
pub struct PostgresDurableCache {
    pool: Arc<PgPool>,
}

impl PostgresDurableCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

#[async_trait]
impl DurableCacheBackend for PostgresDurableCache {
    async fn get_by_id(&self, key: &str) -> Result<Option<CacheEntry>, BackendError> {
        let row: Option<EntryRow> = query_as(
            "SELECT key, body, ttl_seconds, created_at FROM html_cache WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|(key, body, ttl_seconds, created_at)| {
            // A negative lifetime can only come from manual edits; treat it as expired.
            let ttl_seconds = u64::try_from(ttl_seconds).unwrap_or(0);
            CacheEntry::new(key, body, ttl_seconds, created_at)
        }))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), BackendError> {
        let ttl_seconds = i64::try_from(entry.ttl_seconds).unwrap_or(i64::MAX);

        query(
            "INSERT INTO html_cache (key, body, ttl_seconds, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (key) DO UPDATE \
             SET body = EXCLUDED.body, \
                 ttl_seconds = EXCLUDED.ttl_seconds, \
                 created_at = EXCLUDED.created_at",
        )
        .bind(&entry.key)
        .bind(&entry.body)
        .bind(ttl_seconds)
        .bind(entry.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete_by_id(&self, key: &str) -> Result<bool, BackendError> {
        let result = query("DELETE FROM html_cache WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), BackendError> {
        query("DELETE FROM html_cache")
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> BackendError {
    BackendError::unavailable(BACKEND, err.to_string())
}
