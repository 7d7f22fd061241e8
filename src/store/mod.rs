//! Local relational store
//!
//! SQLite via `sqlx`. Two tables: `yandex_sources` and its cascade-owned
//! `reviews`. Schema bootstrap is idempotent; versioned migration tooling
//! is an external concern.

pub mod materializer;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::types::{Review, Source};

/// Idempotent DDL for both tables and the lookup index
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS yandex_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    organization_name TEXT,
    rating REAL,
    total_reviews INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    yandex_source_id INTEGER NOT NULL REFERENCES yandex_sources(id) ON DELETE CASCADE,
    author_name TEXT NOT NULL,
    author_phone TEXT,
    rating INTEGER,
    text TEXT,
    branch_name TEXT,
    published_at TEXT,
    yandex_id TEXT UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_source_published
    ON reviews (yandex_source_id, published_at);
"#;

/// Handle to the local store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a database, enforcing foreign keys so the cascade actually
    /// fires
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Create both tables and the lookup index when absent
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a new source for a user
    pub async fn create_source(&self, user_id: i64, url: &str) -> Result<Source, sqlx::Error> {
        let now = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO yandex_sources (user_id, url, total_reviews, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.source(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn source(&self, id: i64) -> Result<Option<Source>, sqlx::Error> {
        sqlx::query_as::<_, Source>("SELECT * FROM yandex_sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// All registered sources, oldest first
    pub async fn sources(&self) -> Result<Vec<Source>, sqlx::Error> {
        sqlx::query_as::<_, Source>("SELECT * FROM yandex_sources ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn reviews_for_source(&self, source_id: i64) -> Result<Vec<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE yandex_source_id = ? ORDER BY id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn review_count(&self, source_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reviews WHERE yandex_source_id = ?",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory DSN")
        .foreign_keys(true);
    // A single connection: every pooled connection would otherwise get its
    // own private in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("open in-memory sqlite");
    let store = Store::new(pool);
    store.ensure_schema().await.expect("schema");
    store
}
