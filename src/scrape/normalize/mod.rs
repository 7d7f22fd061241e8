//! Response normalization
//!
//! The upstream answers in three distinct shapes (internal JSON endpoint
//! payloads, state embedded in the page HTML, and the rendered DOM) and
//! drifts within each. All three strategies produce the same `FetchResult`;
//! nothing here depends on static payload types. Extraction is recursive
//! descent over `serde_json::Value` with candidate key lists, exactly as
//! deep and as tolerant as the shapes observed in the wild require.

pub mod author;
pub mod dates;
mod dom;
mod embedded;
mod json;

pub use author::clean_author;
pub use dom::from_document;
pub use embedded::from_page_state;
pub use json::from_endpoint_payload;

use serde_json::Value;

use crate::types::RawReview;

/// Keys whose presence marks an object as review-shaped
const REVIEW_SIGNATURE_KEYS: [&str; 8] = [
    "text", "author", "rating", "reviewId", "comment", "body", "updatedTime", "stars",
];

/// Date keys tried in order on a review object
const DATE_KEYS: [&str; 12] = [
    "updatedTime",
    "time",
    "date",
    "createdTime",
    "publishedTime",
    "created",
    "updated",
    "datePublished",
    "createdAt",
    "publishedAt",
    "dateCreated",
    "timestamp",
];

/// True for a nonempty array whose first element looks like a review
pub(crate) fn is_review_array(value: &Value) -> bool {
    match value.as_array() {
        Some(items) => items.first().is_some_and(|first| {
            first.is_object() && REVIEW_SIGNATURE_KEYS.iter().any(|k| first.get(k).is_some())
        }),
        None => false,
    }
}

/// Normalize one review object from any JSON-carrying strategy.
///
/// Returns `None` only for non-objects; an object with nothing usable still
/// becomes a placeholder-author review and is left to deduplication.
pub(crate) fn normalize_review(value: &Value) -> Option<RawReview> {
    let obj = value.as_object()?;

    let author_raw = obj
        .get("author")
        .and_then(|a| {
            if let Some(name) = a.as_str() {
                return Some(name.to_string());
            }
            ["name", "displayName", "publicName", "login"]
                .iter()
                .find_map(|k| a.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        })
        .or_else(|| {
            ["authorName", "userName", "displayName"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        })
        .unwrap_or_default();
    let author = clean_author(&author_raw);

    let rating = obj
        .get("rating")
        .and_then(review_rating_from_value)
        .or_else(|| {
            ["stars", "score", "mark", "value"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(review_rating_from_value))
        });

    let text = ["text", "comment", "body", "reviewBody"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let branch = ["businessName", "branchName", "orgName"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    let published_at = DATE_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(dates::parse_date_value));

    let yandex_id = ["reviewId", "id"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(value_to_id));

    Some(RawReview {
        yandex_id,
        author,
        rating,
        text,
        branch,
        published_at,
    })
}

/// A per-review rating from a bare number or a `{value|score|stars}` object
fn review_rating_from_value(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => normalize_star_rating(n.as_f64()?),
        Value::Object(map) => ["value", "score", "stars"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_f64))
            .and_then(normalize_star_rating),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(normalize_star_rating),
        _ => None,
    }
}

/// Map a numeric rating onto 1..=5 stars. Values already in range round;
/// values on a 10-point scale halve first; anything else is unusable.
pub(crate) fn normalize_star_rating(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    let scaled = if value > 5.0 && value <= 10.0 {
        value / 2.0
    } else {
        value
    };
    if (1.0..=5.0).contains(&scaled) {
        Some((scaled.round() as u8).clamp(1, 5))
    } else {
        None
    }
}

/// Map an organization rating onto 1.0..=5.0, halving 10-point values
pub(crate) fn normalize_org_rating(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let scaled = if value > 5.0 && value <= 10.0 {
        value / 2.0
    } else {
        value
    };
    (1.0..=5.0).contains(&scaled).then_some(scaled)
}

/// Upstream ids arrive as strings or numbers
fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
