//! Core types shared across the acquisition engine and the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author placeholder used when the upstream omits or blanks the name
pub const ANONYMOUS_AUTHOR: &str = "Аноним";

/// Which mirror hostname an organization URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorHost {
    Ru,
    Com,
}

impl MirrorHost {
    /// Short tag as stored/displayed (`ru` / `com`)
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorHost::Ru => "ru",
            MirrorHost::Com => "com",
        }
    }

    /// Full hostname for this mirror
    pub fn hostname(&self) -> &'static str {
        match self {
            MirrorHost::Ru => "yandex.ru",
            MirrorHost::Com => "yandex.com",
        }
    }

    /// Request origin (`https://<hostname>`)
    pub fn origin(&self) -> String {
        format!("https://{}", self.hostname())
    }

    /// Recognize a mirror from a URL hostname; `None` for foreign hosts
    pub fn from_hostname(host: &str) -> Option<Self> {
        let host = host.trim_start_matches("www.");
        if host.ends_with("yandex.com") {
            Some(MirrorHost::Com)
        } else if host.ends_with("yandex.ru") {
            Some(MirrorHost::Ru)
        } else {
            None
        }
    }
}

impl Default for MirrorHost {
    fn default() -> Self {
        MirrorHost::Ru
    }
}

impl fmt::Display for MirrorHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-owned registration of one organization URL for periodic scraping.
///
/// Maps to one row of `yandex_sources`. The mirror host is not persisted
/// separately; it is re-derived from `url` at sync time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub organization_name: Option<String>,
    /// Upstream-reported organization rating, 1.00..5.00
    pub rating: Option<f64>,
    /// Count of review rows currently stored for this source
    pub total_reviews: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored review belonging to a [`Source`]
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub yandex_source_id: i64,
    pub author_name: String,
    /// Reserved; never populated by the engine
    pub author_phone: Option<String>,
    /// Star rating in 1..=5
    pub rating: Option<i64>,
    pub text: Option<String>,
    /// Branch name for multi-branch organizations
    pub branch_name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Upstream-assigned review id; globally unique when present
    pub yandex_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized review as produced by the extraction strategies, prior to
/// sanitization and persistence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReview {
    pub yandex_id: Option<String>,
    pub author: String,
    pub rating: Option<u8>,
    pub text: Option<String>,
    pub branch: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Counters accumulated over one `fetch_reviews` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Pages that returned a parseable payload
    pub pages_fetched: u64,
    /// Requests that produced no usable response (transport or non-2xx)
    pub null_responses: u64,
    /// Parseable pages that contained zero reviews
    pub empty_pages: u64,
    /// Anti-bot challenges encountered
    pub captchas_seen: u64,
    /// Challenges solved by the external service
    pub captchas_solved: u64,
    /// Reviews dropped by id/fingerprint deduplication
    pub duplicates_skipped: u64,
}

/// Everything one fetch pass learned about an organization
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub organization_name: Option<String>,
    /// Upstream-reported rating, 1.00..5.00
    pub rating: Option<f64>,
    /// Highest total review count the upstream reported; never decreases
    /// within one fetch
    pub total_reviews: i64,
    /// Deduplicated reviews in fetch order
    pub reviews: Vec<RawReview>,
    pub stats: FetchStats,
}

impl FetchResult {
    /// True when no strategy produced a single review
    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }

    /// Accept a reported total if it is higher than what we have
    pub fn raise_total(&mut self, reported: i64) {
        if reported > self.total_reviews {
            self.total_reviews = reported;
        }
    }

    /// Fold another pass's organization metadata into this result. Earlier
    /// values win for name and rating; totals only ever rise.
    pub fn merge_metadata(&mut self, other: &FetchResult) {
        if self.organization_name.is_none() {
            self.organization_name = other.organization_name.clone();
        }
        if self.rating.is_none() {
            self.rating = other.rating;
        }
        self.raise_total(other.total_reviews);
    }
}
