//! JSON endpoint payload normalization
//!
//! The internal endpoints have shipped several envelope shapes; reviews have
//! been observed directly at the top level, under `data`/`result`/`response`
//! containers, and occasionally somewhere else entirely. Known locations are
//! tried first, then a bounded deep scan hunts for anything review-shaped.

use serde_json::Value;
use tracing::debug;

use super::{is_review_array, normalize_org_rating, normalize_review};
use crate::types::FetchResult;

/// Depth bound for the last-resort deep scans
const DEEP_SCAN_DEPTH: usize = 8;

/// Keys that may hold a review array directly
const REVIEW_ARRAY_KEYS: [&str; 4] = ["reviews", "items", "comments", "businessReviews"];

/// Keys that may hold the organization's total review count. The ambiguous
/// `count` is deliberately absent: it often equals the page size.
const TOTAL_KEYS: [&str; 6] = [
    "totalCount",
    "reviewCount",
    "totalReviews",
    "reviewsCount",
    "ratingCount",
    "total",
];

/// Containers checked for nested totals
const TOTAL_CONTAINERS: [&str; 3] = ["pager", "data", "meta"];

/// Normalize one endpoint response
pub fn from_endpoint_payload(payload: &Value) -> FetchResult {
    let mut result = FetchResult::default();

    if let Some(items) = find_review_array(payload) {
        result.reviews = items.iter().filter_map(normalize_review).collect();
    } else {
        debug!("no review array found in endpoint payload");
    }

    result.organization_name = extract_org_name(payload);
    result.rating = extract_org_rating(payload);
    if let Some(total) = extract_total(payload) {
        result.raise_total(total);
    }

    result
}

/// Locate the review array: known paths first, deep scan as last resort
fn find_review_array(payload: &Value) -> Option<&Vec<Value>> {
    for key in &REVIEW_ARRAY_KEYS {
        if let Some(node) = payload.get(*key) {
            if is_review_array(node) {
                return node.as_array();
            }
        }
    }

    for (container, keys) in [
        ("data", &REVIEW_ARRAY_KEYS[..]),
        ("result", &REVIEW_ARRAY_KEYS[..3]),
        ("response", &REVIEW_ARRAY_KEYS[..3]),
    ] {
        if let Some(inner) = payload.get(container) {
            for key in keys {
                if let Some(node) = inner.get(*key) {
                    if is_review_array(node) {
                        return node.as_array();
                    }
                }
            }
        }
    }

    if let Some(data) = payload.get("data") {
        if is_review_array(data) {
            return data.as_array();
        }
    }

    deep_scan_reviews(payload, 0)
}

fn deep_scan_reviews(value: &Value, depth: usize) -> Option<&Vec<Value>> {
    if depth > DEEP_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Array(_) if is_review_array(value) => value.as_array(),
        Value::Array(items) => items
            .iter()
            .find_map(|item| deep_scan_reviews(item, depth + 1)),
        Value::Object(map) => map
            .values()
            .find_map(|inner| deep_scan_reviews(inner, depth + 1)),
        _ => None,
    }
}

fn extract_org_name(payload: &Value) -> Option<String> {
    let keys = ["businessName", "orgName", "name"];
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .or_else(|| {
            payload.get("data").and_then(|data| {
                keys.iter().find_map(|k| data.get(*k).and_then(Value::as_str))
            })
        })
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// The organization rating from `rating` (bare number or
/// `{value|score|average}`), with a deep scan as last resort
fn extract_org_rating(payload: &Value) -> Option<f64> {
    payload
        .get("rating")
        .and_then(rating_node_value)
        .or_else(|| deep_scan_rating(payload, 0))
}

pub(super) fn rating_node_value(node: &Value) -> Option<f64> {
    match node {
        Value::Number(n) => n.as_f64().and_then(normalize_org_rating),
        Value::Object(map) => ["value", "score", "average"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_f64))
            .and_then(normalize_org_rating),
        _ => None,
    }
}

fn deep_scan_rating(value: &Value, depth: usize) -> Option<f64> {
    if depth > DEEP_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => map
            .get("rating")
            .and_then(rating_node_value)
            .or_else(|| {
                map.values()
                    .find_map(|inner| deep_scan_rating(inner, depth + 1))
            }),
        Value::Array(items) => items
            .iter()
            .find_map(|item| deep_scan_rating(item, depth + 1)),
        _ => None,
    }
}

/// The highest total-count the payload reports anywhere plausible
pub(super) fn extract_total(payload: &Value) -> Option<i64> {
    fn consider(best: Option<i64>, candidate: Option<i64>) -> Option<i64> {
        if let Some(v) = candidate {
            if v >= 0 && best.map_or(true, |b| v > b) {
                return Some(v);
            }
        }
        best
    }

    let mut best: Option<i64> = None;
    for key in &TOTAL_KEYS {
        best = consider(best, count_value(payload.get(*key)));
    }
    for container in &TOTAL_CONTAINERS {
        if let Some(inner) = payload.get(*container) {
            for key in &TOTAL_KEYS {
                best = consider(best, count_value(inner.get(*key)));
            }
        }
    }
    best = consider(
        best,
        count_value(payload.get("pagination").and_then(|p| p.get("total"))),
    );

    if best.is_none() {
        best = consider(best, deep_scan_total(payload, 0));
    }
    best
}

fn deep_scan_total(value: &Value, depth: usize) -> Option<i64> {
    if depth > DEEP_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => TOTAL_KEYS
            .iter()
            .find_map(|k| count_value(map.get(*k)))
            .or_else(|| {
                map.values()
                    .find_map(|inner| deep_scan_total(inner, depth + 1))
            }),
        Value::Array(items) => items
            .iter()
            .find_map(|item| deep_scan_total(item, depth + 1)),
        _ => None,
    }
}

fn count_value(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reviews_at_top_level() {
        let payload = json!({
            "reviews": [
                {"reviewId": "1", "author": {"name": "Иван"}, "rating": 5, "text": "Супер"},
                {"reviewId": "2", "authorName": "Мария", "rating": 3, "text": "Нормально"},
            ],
            "totalCount": 137,
            "rating": {"value": 4.5},
            "businessName": "Самое популярное кафе",
        });

        let result = from_endpoint_payload(&payload);
        assert_eq!(result.reviews.len(), 2);
        assert_eq!(result.total_reviews, 137);
        assert_eq!(result.rating, Some(4.5));
        assert_eq!(
            result.organization_name.as_deref(),
            Some("Самое популярное кафе")
        );
    }

    #[test]
    fn reviews_under_data_container() {
        let payload = json!({
            "data": {"businessReviews": [{"text": "ок", "stars": 4}], "totalCount": 9}
        });
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.total_reviews, 9);
    }

    #[test]
    fn data_itself_may_be_the_array() {
        let payload = json!({"data": [{"text": "прямо тут", "rating": 2}]});
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.reviews[0].rating, Some(2));
    }

    #[test]
    fn deep_scan_finds_buried_reviews() {
        let payload = json!({
            "wrapper": {"inner": {"list": [{"comment": "глубоко", "stars": 5}]}}
        });
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.reviews[0].text.as_deref(), Some("глубоко"));
    }

    #[test]
    fn empty_array_is_not_accepted() {
        let payload = json!({"reviews": [], "items": [{"text": "настоящие", "rating": 4}]});
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.reviews.len(), 1, "empty candidate must fall through to items");
    }

    #[test]
    fn non_review_array_is_rejected() {
        let payload = json!({"items": [{"price": 100}]});
        let result = from_endpoint_payload(&payload);
        assert!(result.reviews.is_empty());
    }

    #[test]
    fn total_takes_maximum_across_locations() {
        let payload = json!({
            "reviews": [{"text": "x", "rating": 1}],
            "total": 40,
            "pager": {"totalCount": 620},
            "meta": {"reviewsCount": 500},
        });
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.total_reviews, 620);
    }

    #[test]
    fn ambiguous_count_key_is_ignored() {
        let payload = json!({
            "reviews": [{"text": "x", "rating": 1}],
            "count": 50,
        });
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.total_reviews, 0, "`count` usually equals page size");
    }

    #[test]
    fn pagination_total_is_recognized() {
        let payload = json!({
            "reviews": [{"text": "x", "rating": 1}],
            "pagination": {"total": 314},
        });
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.total_reviews, 314);
    }

    #[test]
    fn total_from_numeric_string() {
        let payload = json!({"reviews": [{"text": "x"}], "totalCount": "137"});
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.total_reviews, 137);
    }

    #[test]
    fn ten_point_org_rating_is_halved() {
        let payload = json!({"reviews": [{"text": "x"}], "rating": 9.0});
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.rating, Some(4.5));
    }

    #[test]
    fn rating_found_by_deep_scan() {
        let payload = json!({
            "reviews": [{"text": "x"}],
            "business": {"summary": {"rating": {"score": 4.2}}},
        });
        let result = from_endpoint_payload(&payload);
        assert_eq!(result.rating, Some(4.2));
    }

    #[test]
    fn shape_drift_yields_empty_result_not_panic() {
        for payload in [json!(null), json!("oops"), json!(42), json!([])] {
            let result = from_endpoint_payload(&payload);
            assert!(result.reviews.is_empty());
            assert_eq!(result.total_reviews, 0);
        }
    }
}
