//! Typed wrappers over the persistent store (C5).
//!
//! The distilled spec describes a document store (Mongo-shaped collections
//! with compound-key upserts and aggregation-based duplicate reconciliation).
//! This crate keeps the teacher's actual persistence stack — `sqlx` against
//! SQLite/Postgres via `DATABASE_URL` — and models each collection as a
//! table, with JSON columns for embedded/variable-shaped fields (`genres`,
//! `streams`, `streams_urls`). See DESIGN.md for the full rationale.
//!
//! The bulk-save algorithm's externally observable contract (existence
//! batching, insert/update partition counts, idempotence, timestamp
//! maintenance) is preserved even though the literal `$or` query batching
//! mechanism is replaced with a batched `SELECT ... WHERE key IN (...)`.

pub mod job_history;
pub mod provider_titles;
pub mod providers;
pub mod title_streams;
pub mod titles;

use crate::error::AppResult;
use sqlx::sqlite::{SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default batch size for existence checks and batched insert/update, per
/// §4.5's `defaultBatchSize`.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Result of a bulk-save pass: how many rows were newly inserted vs. how
/// many existing rows were updated in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSaveResult {
    pub inserted: u64,
    pub updated: u64,
}

impl std::ops::Add for BulkSaveResult {
    type Output = BulkSaveResult;

    fn add(self, rhs: Self) -> Self::Output {
        BulkSaveResult {
            inserted: self.inserted + rhs.inserted,
            updated: self.updated + rhs.updated,
        }
    }
}

/// Process-wide connection pool plus the `stopping` flag every repository
/// honors: once set, reads return safe defaults (`None`/`vec![]`/`0`) and
/// writes still propagate so in-flight bulk-saves can fail loudly and be
/// retried on the next run, per §5 cancellation policy.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    stopping: Arc<AtomicBool>,
}

impl Store {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await.ok();
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await.ok();
        let store = Self {
            pool,
            stopping: Arc::new(AtomicBool::new(false)),
        };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn connect_test() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .connect("sqlite::memory:")
            .await?;
        pool.set_connect_options(
            sqlx::sqlite::SqliteConnectOptions::new()
                .in_memory(true)
                .synchronous(SqliteSynchronous::Off),
        );
        let store = Self {
            pool,
            stopping: Arc::new(AtomicBool::new(false)),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn begin_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS titles (
                title_key TEXT PRIMARY KEY,
                title_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                title TEXT NOT NULL,
                release_date TEXT,
                overview TEXT,
                vote_average REAL,
                genres TEXT NOT NULL DEFAULT '[]',
                runtime INTEGER,
                poster_path TEXT,
                backdrop_path TEXT,
                imdb_id TEXT,
                streams TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_titles_type_title ON titles (content_type, title)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_titles_type_release ON titles (content_type, release_date)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_titles_release ON titles (release_date)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_titles (
                provider_id TEXT NOT NULL,
                title_key TEXT NOT NULL,
                title_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                tmdb_id TEXT,
                category_id TEXT,
                release_date TEXT,
                ignored INTEGER NOT NULL DEFAULT 0,
                ignored_reason TEXT,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (provider_id, title_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_provider_titles_provider_type ON provider_titles (provider_id, content_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_provider_titles_provider_ignored ON provider_titles (provider_id, ignored)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_provider_titles_provider_updated ON provider_titles (provider_id, last_updated)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_provider_titles_title_key ON provider_titles (title_key)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS title_streams (
                title_key TEXT NOT NULL,
                stream_id TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                proxy_url TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (title_key, stream_id, provider_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_title_streams_title_stream ON title_streams (title_key, stream_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_title_streams_title ON title_streams (title_key)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_title_streams_provider ON title_streams (provider_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_title_streams_provider_title ON title_streams (provider_id, title_key)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                provider_type TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                deleted INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 999,
                api_url TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                streams_urls TEXT NOT NULL DEFAULT '[]',
                rate_concurrent INTEGER NOT NULL,
                rate_duration_seconds INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_providers_deleted_priority ON providers (deleted, priority)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_history (
                job_name TEXT NOT NULL,
                provider_id TEXT,
                status TEXT NOT NULL,
                last_execution TEXT,
                execution_count INTEGER NOT NULL DEFAULT 0,
                last_result TEXT,
                last_error TEXT,
                last_provider_check TEXT,
                last_settings_check TEXT,
                last_policy_check TEXT,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (job_name, provider_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_history_job_name ON job_history (job_name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_history_status ON job_history (status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Splits `keys` into chunks of `batch_size`, mirroring the `$or`-group
/// batching of the existence query in §4.5.
pub fn batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
