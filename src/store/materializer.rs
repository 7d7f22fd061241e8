//! Transactional review materialization
//!
//! Full sync replaces a source's reviews atomically: the delete and every
//! insert share one transaction, so an observer sees the old set or the new
//! set and never less. Incremental sync only ever inserts. In both modes a
//! zero-review fetch is a refusal, not a wipe: a stale-but-complete local
//! set always beats an empty overwrite.

use chrono::Utc;
use regex::Regex;
use sqlx::{Sqlite, Transaction};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::Store;
use crate::error::SyncError;
use crate::scrape::ReviewFetcher;
use crate::types::{RawReview, Source, ANONYMOUS_AUTHOR};

/// Three or more newlines collapse to a blank line
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static pattern"));

/// Runs of non-newline whitespace collapse to one space
static EXCESS_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]{2,}").expect("static pattern"));

/// Full sync: fetch everything, then replace the source's review set
pub async fn sync_reviews(
    store: &Store,
    fetcher: &mut ReviewFetcher,
    source: &Source,
) -> Result<Source, SyncError> {
    let fetched = fetcher.fetch_reviews(&source.url).await?;
    materialize_full(store, source, &fetched).await
}

/// Incremental sync: fetch everything, insert only what is new
pub async fn sync_new_reviews(
    store: &Store,
    fetcher: &mut ReviewFetcher,
    source: &Source,
) -> Result<Source, SyncError> {
    let fetched = fetcher.fetch_reviews(&source.url).await?;
    materialize_incremental(store, source, &fetched).await
}

/// Replace the stored review set with `fetched`, inside one transaction
pub async fn materialize_full(
    store: &Store,
    source: &Source,
    fetched: &crate::types::FetchResult,
) -> Result<Source, SyncError> {
    if fetched.reviews.is_empty() {
        return touch_only(store, source).await;
    }

    let mut tx = store.pool().begin().await?;

    sqlx::query("DELETE FROM reviews WHERE yandex_source_id = ?")
        .bind(source.id)
        .execute(&mut *tx)
        .await?;

    let mut batch_ids: HashSet<String> = HashSet::new();
    let mut inserted = 0usize;
    for raw in &fetched.reviews {
        let clean = sanitize_review(raw);
        if let Some(id) = &clean.yandex_id {
            if !batch_ids.insert(id.clone()) {
                continue;
            }
        }
        insert_review(&mut tx, source.id, &clean).await?;
        inserted += 1;
    }

    tx.commit().await?;
    info!(source_id = source.id, "full sync stored {} reviews", inserted);

    update_source_metadata(store, source, fetched).await
}

/// Insert only reviews not already present, by upstream id or, for
/// id-less reviews, by exact author/text content match
pub async fn materialize_incremental(
    store: &Store,
    source: &Source,
    fetched: &crate::types::FetchResult,
) -> Result<Source, SyncError> {
    if fetched.reviews.is_empty() {
        return touch_only(store, source).await;
    }

    // O(1) lookups instead of one query per fetched review
    let existing: Vec<String> = sqlx::query_scalar(
        "SELECT yandex_id FROM reviews WHERE yandex_source_id = ? AND yandex_id IS NOT NULL",
    )
    .bind(source.id)
    .fetch_all(store.pool())
    .await?;
    let mut known_ids: HashSet<String> = existing.into_iter().collect();

    let mut tx = store.pool().begin().await?;
    let mut inserted = 0usize;
    for raw in &fetched.reviews {
        let clean = sanitize_review(raw);
        match &clean.yandex_id {
            Some(id) => {
                if !known_ids.insert(id.clone()) {
                    continue;
                }
            }
            None => {
                let already: bool = sqlx::query_scalar(
                    "SELECT EXISTS(
                         SELECT 1 FROM reviews
                         WHERE yandex_source_id = ? AND author_name = ? AND text IS ?
                     )",
                )
                .bind(source.id)
                .bind(&clean.author)
                .bind(&clean.text)
                .fetch_one(&mut *tx)
                .await?;
                if already {
                    continue;
                }
            }
        }
        insert_review(&mut tx, source.id, &clean).await?;
        inserted += 1;
    }

    tx.commit().await?;
    info!(source_id = source.id, "incremental sync added {} reviews", inserted);

    update_source_metadata(store, source, fetched).await
}

/// Zero-review protection: keep everything, advance only the sync clock
async fn touch_only(store: &Store, source: &Source) -> Result<Source, SyncError> {
    warn!(
        source_id = source.id,
        "upstream returned no reviews; keeping the {} stored ones",
        source.total_reviews
    );
    sqlx::query("UPDATE yandex_sources SET last_synced_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(source.id)
        .execute(store.pool())
        .await?;
    store.source(source.id).await?.ok_or(SyncError::Database(sqlx::Error::RowNotFound))
}

async fn insert_review(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: i64,
    review: &RawReview,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO reviews
            (yandex_source_id, author_name, author_phone, rating, text,
             branch_name, published_at, yandex_id, created_at, updated_at)
        VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_id)
    .bind(&review.author)
    .bind(review.rating.map(i64::from))
    .bind(&review.text)
    .bind(&review.branch)
    .bind(review.published_at)
    .bind(&review.yandex_id)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Refresh the source row after a successful materialization: name (old
/// kept when the fetch brought none), rating (reported, else stored
/// average, else null), exact stored row count, and the sync clock
async fn update_source_metadata(
    store: &Store,
    source: &Source,
    fetched: &crate::types::FetchResult,
) -> Result<Source, SyncError> {
    let stored_count = store.review_count(source.id).await?;

    let organization_name = fetched
        .organization_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| source.organization_name.clone());

    let rating = match fetched.rating {
        Some(reported) => Some(round2(reported)),
        None => sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(rating) FROM reviews WHERE yandex_source_id = ? AND rating IS NOT NULL",
        )
        .bind(source.id)
        .fetch_one(store.pool())
        .await?
        .map(round2),
    };

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE yandex_sources
        SET organization_name = ?, rating = ?, total_reviews = ?,
            last_synced_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&organization_name)
    .bind(rating)
    .bind(stored_count)
    .bind(now)
    .bind(now)
    .bind(source.id)
    .execute(store.pool())
    .await?;

    store.source(source.id).await?.ok_or(SyncError::Database(sqlx::Error::RowNotFound))
}

/// Sanitize one fetched review for persistence
pub fn sanitize_review(raw: &RawReview) -> RawReview {
    let text = raw.text.as_deref().map(sanitize_text).filter(|t| !t.is_empty());

    let author = {
        let trimmed = raw.author.trim();
        if trimmed.is_empty() {
            ANONYMOUS_AUTHOR.to_string()
        } else {
            trimmed.to_string()
        }
    };

    let rating = raw.rating.filter(|r| (1..=5).contains(r));

    let branch = raw
        .branch
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    let yandex_id = raw
        .yandex_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    RawReview {
        yandex_id,
        author,
        rating,
        text,
        branch,
        published_at: raw.published_at,
    }
}

fn sanitize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let fewer_newlines = EXCESS_NEWLINES.replace_all(&unified, "\n\n");
    let spaced = EXCESS_SPACES.replace_all(&fewer_newlines, " ");
    spaced.trim().to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
