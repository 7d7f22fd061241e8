//! Embedded page-state extraction
//!
//! The reviews page ships its data as script-level assignments of the form
//! `window.<NAME> = { … };`. The JSON value is carved out by brace counting
//! with string-aware escape tracking; a plain regex cannot do it, because
//! review texts contain braces and strings with escaped quotes. Inside the
//! decoded state, a bounded recursive descent locates the business node and
//! the review array.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use super::{is_review_array, json, normalize_review};
use crate::types::FetchResult;

/// Assignment names tried first, in order
const KNOWN_STATE_NAMES: [&str; 3] =
    ["__PRELOADED_STATE__", "__INITIAL_STATE__", "__INITIAL_DATA__"];

/// Recursive-descent bound inside a decoded state object. Deeper layouts
/// are silently missed.
const DESCENT_DEPTH: usize = 5;

/// Keys that may hold the review array inside a state object
const STATE_REVIEW_KEYS: [&str; 4] = ["reviews", "reviewItems", "businessReviews", "items"];

/// Any other top-level `window.<NAME> = {` assignment
static ANY_STATE_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"window\.([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*\{").expect("static pattern")
});

/// Extract reviews and organization metadata from the page HTML
pub fn from_page_state(html: &str, org_id: &str) -> FetchResult {
    let mut metadata_only: Option<FetchResult> = None;

    for state in candidate_states(html) {
        let result = normalize_state(&state, org_id);
        if !result.reviews.is_empty() {
            return result;
        }
        if metadata_only.is_none()
            && (result.organization_name.is_some()
                || result.rating.is_some()
                || result.total_reviews > 0)
        {
            metadata_only = Some(result);
        }
    }

    metadata_only.unwrap_or_default()
}

/// Decoded state objects in trial order: known names first, then anything
/// else assigned onto `window`
fn candidate_states(html: &str) -> Vec<Value> {
    let mut states = Vec::new();
    let mut seen_names: Vec<String> = Vec::new();

    for name in KNOWN_STATE_NAMES {
        if let Some(state) = extract_named_state(html, name) {
            states.push(state);
        }
        seen_names.push(name.to_string());
    }

    for caps in ANY_STATE_ASSIGNMENT.captures_iter(html) {
        let name = &caps[1];
        if seen_names.iter().any(|seen| seen == name) {
            continue;
        }
        seen_names.push(name.to_string());
        let brace_at = caps.get(0).map(|m| m.end() - 1).unwrap_or(0);
        if let Some(raw) = extract_json_object(html, brace_at) {
            if let Ok(state) = serde_json::from_str::<Value>(raw) {
                states.push(state);
            }
        }
    }

    states
}

fn extract_named_state(html: &str, name: &str) -> Option<Value> {
    let pattern = Regex::new(&format!(r"window\.{}\s*=\s*\{{", regex::escape(name))).ok()?;
    let m = pattern.find(html)?;
    let raw = extract_json_object(html, m.end() - 1)?;
    match serde_json::from_str::<Value>(raw) {
        Ok(state) => Some(state),
        Err(e) => {
            debug!("window.{} holds unparseable JSON: {}", name, e);
            None
        }
    }
}

/// Carve out a balanced `{…}` starting at `start` (which must index a `{`).
/// Tracks string state and backslash escapes so braces inside review texts
/// do not unbalance the count.
fn extract_json_object(source: &str, start: usize) -> Option<&str> {
    let bytes = source.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&source[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn normalize_state(state: &Value, org_id: &str) -> FetchResult {
    let mut result = FetchResult::default();

    if let Some(items) = find_reviews(state, 0) {
        result.reviews = items.iter().filter_map(normalize_review).collect();
    }

    let business = find_business_by_id(state, org_id, 0)
        .or_else(|| find_titled_node(state, 0));
    if let Some(business) = business {
        result.organization_name = ["name", "title"]
            .iter()
            .find_map(|k| business.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        result.rating = business.get("rating").and_then(json::rating_node_value);
        if let Some(total) = json::extract_total(business) {
            result.raise_total(total);
        }
    }
    if result.total_reviews == 0 {
        if let Some(total) = json::extract_total(state) {
            result.raise_total(total);
        }
    }

    result
}

fn find_reviews(value: &Value, depth: usize) -> Option<&Vec<Value>> {
    if depth > DESCENT_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in &STATE_REVIEW_KEYS {
                if let Some(node) = map.get(*key) {
                    if is_review_array(node) {
                        return node.as_array();
                    }
                }
            }
            map.values().find_map(|inner| find_reviews(inner, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|item| find_reviews(item, depth + 1)),
        _ => None,
    }
}

/// The business node whose `id` equals the target organization id
fn find_business_by_id<'a>(value: &'a Value, org_id: &str, depth: usize) -> Option<&'a Value> {
    if depth > DESCENT_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            let id_matches = map.get("id").is_some_and(|id| match id {
                Value::String(s) => s == org_id,
                Value::Number(n) => n.to_string() == org_id,
                _ => false,
            });
            if id_matches {
                return Some(value);
            }
            map.values()
                .find_map(|inner| find_business_by_id(inner, org_id, depth + 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_business_by_id(item, org_id, depth + 1)),
        _ => None,
    }
}

/// Fallback: the first object carrying a `name` or `title` string
fn find_titled_node(value: &Value, depth: usize) -> Option<&Value> {
    if depth > DESCENT_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if ["name", "title"]
                .iter()
                .any(|k| map.get(*k).and_then(Value::as_str).is_some())
            {
                return Some(value);
            }
            map.values().find_map(|inner| find_titled_node(inner, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|item| find_titled_node(item, depth + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carves_balanced_object() {
        let source = r#"window.S = {"a": {"b": 1}, "c": [2, 3]}; other();"#;
        let start = source.find('{').unwrap();
        assert_eq!(
            extract_json_object(source, start),
            Some(r#"{"a": {"b": 1}, "c": [2, 3]}"#)
        );
    }

    #[test]
    fn braces_inside_strings_do_not_unbalance() {
        let source = r#"{"text": "смайлик {не скобка} и \"кавычки\" внутри"}"#;
        assert_eq!(extract_json_object(source, 0), Some(source));
    }

    #[test]
    fn escaped_backslash_before_quote() {
        let source = r#"{"path": "C:\\"}trailing"#;
        assert_eq!(extract_json_object(source, 0), Some(r#"{"path": "C:\\"}"#));
    }

    #[test]
    fn unbalanced_object_yields_none() {
        assert!(extract_json_object(r#"{"open": true"#, 0).is_none());
        assert!(extract_json_object("no brace here", 0).is_none());
    }

    #[test]
    fn preloaded_state_with_reviews() {
        let html = r#"
            <html><script>
            window.__PRELOADED_STATE__ = {"stack": {"business": {"id": "1010501395",
              "name": "Кафе {Скобка}", "rating": {"value": 4.6}, "reviewCount": 320},
              "reviews": [
                {"reviewId": "a1", "author": {"name": "Иван"}, "rating": 5, "text": "С {фигурными} скобками"},
                {"reviewId": "a2", "authorName": "Оля", "rating": 4, "text": "Хорошо"}
              ]}};
            </script></html>"#;

        let result = from_page_state(html, "1010501395");
        assert_eq!(result.reviews.len(), 2);
        assert_eq!(result.reviews[0].text.as_deref(), Some("С {фигурными} скобками"));
        assert_eq!(result.organization_name.as_deref(), Some("Кафе {Скобка}"));
        assert_eq!(result.rating, Some(4.6));
        assert_eq!(result.total_reviews, 320);
    }

    #[test]
    fn falls_back_to_unknown_window_assignment() {
        let html = r#"
            <script>window.__CUSTOM_DATA__ = {"data": {"items": [
              {"text": "из неизвестного стейта", "stars": 3}
            ]}};</script>"#;

        let result = from_page_state(html, "99999");
        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.reviews[0].rating, Some(3));
    }

    #[test]
    fn business_node_matched_by_org_id() {
        let html = r#"<script>window.__INITIAL_STATE__ = {
            "orgs": [
              {"id": "111111", "name": "Другая организация"},
              {"id": "222222", "name": "Наша организация", "totalReviews": 12}
            ],
            "reviews": [{"text": "ок", "rating": 4}]
        };</script>"#;

        let result = from_page_state(html, "222222");
        assert_eq!(result.organization_name.as_deref(), Some("Наша организация"));
        assert_eq!(result.total_reviews, 12);
    }

    #[test]
    fn titled_node_fallback_when_id_differs() {
        let html = r#"<script>window.__INITIAL_STATE__ = {
            "card": {"title": "Безымянный бар"},
            "reviews": [{"text": "ок", "rating": 4}]
        };</script>"#;

        let result = from_page_state(html, "31337");
        assert_eq!(result.organization_name.as_deref(), Some("Безымянный бар"));
    }

    #[test]
    fn page_without_state_is_empty() {
        let result = from_page_state("<html><body>Ничего</body></html>", "1");
        assert!(result.reviews.is_empty());
        assert!(result.organization_name.is_none());
    }

    #[test]
    fn depth_bound_misses_very_deep_reviews() {
        // Seven levels of nesting exceeds the descent bound
        let html = r#"<script>window.__INITIAL_STATE__ =
            {"a":{"b":{"c":{"d":{"e":{"f":{"reviews":[{"text":"глубоко","rating":1}]}}}}}}};
        </script>"#;
        let result = from_page_state(html, "1");
        assert!(result.reviews.is_empty());
    }
}
