//! DOM fallback extraction
//!
//! Last-resort strategy when neither the JSON endpoints nor the embedded
//! state produced reviews: parse the rendered HTML with CSS selectors.
//! Every piece of data has a fallthrough chain of selectors because the
//! upstream renames classes between deploys; chains are tried in order and
//! the first hit wins.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

use super::{author::clean_author, dates, normalize_star_rating};
use crate::types::{FetchResult, RawReview};

/// Organization title candidates; accepted at 2..200 chars
const TITLE_SELECTORS: [&str; 7] = [
    "h1.orgpage-header-view__header",
    "h1.card-title-view__title",
    ".orgpage-header-view__header-title",
    "h1[itemprop='name']",
    ".business-card-title-view__title",
    ".card-title-view__title-link",
    "h1",
];

/// Review block candidates; the first selector yielding any match wins
const REVIEW_BLOCK_SELECTORS: [&str; 8] = [
    ".business-review-view",
    ".business-reviews-card-view__review",
    "[data-review-id]",
    "[itemprop='review']",
    ".reviews-view__review",
    ".review-card",
    ".comment-item",
    ".review",
];

/// Author name candidates within a review block
const AUTHOR_SELECTORS: [&str; 11] = [
    ".business-review-view__author-name",
    "a.business-review-view__user-name",
    ".business-review-view__author span",
    "[itemprop='author'] [itemprop='name']",
    "[itemprop='author']",
    ".author-name",
    ".user-name",
    ".review-author",
    ".review__author",
    ".comment-author",
    ".name",
];

/// Filled-star element candidates (rating strategy 1)
const FILLED_STAR_SELECTORS: [&str; 3] = [
    ".business-rating-badge-view__star._full",
    ".stars-view__star._full",
    ".rating-stars__star._filled",
];

/// Date-bearing class candidates fed to the Russian date parser
const DATE_SELECTORS: [&str; 4] = [
    ".business-review-view__date",
    ".review-date",
    ".comment-date",
    ".date",
];

/// Review body candidates; accepted above 5 chars
const TEXT_SELECTORS: [&str; 8] = [
    ".business-review-view__body-text",
    ".business-review-view__body",
    "[itemprop='reviewBody']",
    ".review-text",
    ".review__text",
    ".comment-text",
    ".spoiler-view__text-container",
    "p",
];

/// `N из 5` / `N/5` inside aria-labels and titles
static RATING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)?)\s*(?:из\s*5|/\s*5)").expect("static pattern")
});

/// Extract whatever the rendered page shows
pub fn from_document(html: &str) -> FetchResult {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut result = FetchResult::default();
    result.organization_name = extract_title(root);

    for selector_str in REVIEW_BLOCK_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let blocks: Vec<ElementRef> = root.select(&selector).collect();
        if blocks.is_empty() {
            continue;
        }
        result.reviews = blocks.iter().map(|block| extract_review(*block)).collect();
        break;
    }

    result
}

fn extract_title(root: ElementRef) -> Option<String> {
    for selector_str in TITLE_SELECTORS {
        if let Some(text) = first_text(root, selector_str) {
            if text.chars().count() >= 2 && text.chars().count() < 200 {
                return Some(text);
            }
        }
    }
    None
}

fn extract_review(block: ElementRef) -> RawReview {
    let author_raw = AUTHOR_SELECTORS
        .iter()
        .find_map(|s| first_text(block, s).filter(|t| t.chars().count() < 100))
        .unwrap_or_default();

    RawReview {
        yandex_id: None,
        author: clean_author(&author_raw),
        rating: extract_rating(block),
        text: extract_text(block),
        branch: None,
        published_at: Some(extract_date(block)),
    }
}

/// Five strategies in order: filled-star count, `N из 5` labels, data-*
/// attributes, schema.org ratingValue, then any `_full`-classed elements
fn extract_rating(block: ElementRef) -> Option<u8> {
    for selector_str in FILLED_STAR_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            let count = block.select(&selector).count();
            if (1..=5).contains(&count) {
                return Some(count as u8);
            }
        }
    }

    if let Some(value) = rating_from_labels(block) {
        return Some(value);
    }

    for attr in ["data-value", "data-rating", "data-score"] {
        if let Some(value) = attr_anywhere(block, attr)
            .and_then(|v| v.trim().replace(',', ".").parse::<f64>().ok())
            .and_then(normalize_star_rating)
        {
            return Some(value);
        }
    }

    if let Ok(selector) = Selector::parse("[itemprop='ratingValue']") {
        if let Some(element) = block.select(&selector).next() {
            let raw = element
                .value()
                .attr("content")
                .map(str::to_string)
                .unwrap_or_else(|| element.text().collect::<String>());
            if let Some(value) = raw
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .and_then(normalize_star_rating)
            {
                return Some(value);
            }
        }
    }

    if let Ok(selector) = Selector::parse("[class*='_full']") {
        let count = block.select(&selector).count();
        if count > 0 {
            return Some(count.clamp(1, 5) as u8);
        }
    }

    None
}

fn rating_from_labels(block: ElementRef) -> Option<u8> {
    let mut candidates: Vec<&str> = Vec::new();
    for attr in ["aria-label", "title"] {
        if let Some(value) = block.value().attr(attr) {
            candidates.push(value);
        }
    }
    if let Ok(all) = Selector::parse("*") {
        for element in block.select(&all) {
            for attr in ["aria-label", "title"] {
                if let Some(value) = element.value().attr(attr) {
                    candidates.push(value);
                }
            }
        }
    }

    candidates.into_iter().find_map(|label| {
        RATING_LABEL
            .captures(label)
            .and_then(|caps| caps[1].replace(',', ".").parse::<f64>().ok())
            .and_then(normalize_star_rating)
    })
}

fn extract_date(block: ElementRef) -> chrono::DateTime<chrono::Utc> {
    if let Ok(selector) = Selector::parse("time[datetime]") {
        if let Some(element) = block.select(&selector).next() {
            if let Some(parsed) = element
                .value()
                .attr("datetime")
                .and_then(dates::parse_date_str)
            {
                return parsed;
            }
        }
    }

    if let Ok(selector) = Selector::parse("[itemprop='datePublished']") {
        if let Some(element) = block.select(&selector).next() {
            let raw = element
                .value()
                .attr("content")
                .map(str::to_string)
                .unwrap_or_else(|| element.text().collect::<String>());
            if let Some(parsed) = dates::parse_date_str(raw.trim()) {
                return parsed;
            }
        }
    }

    for selector_str in DATE_SELECTORS {
        if let Some(text) = first_text(block, selector_str) {
            return dates::parse_human_date(&text);
        }
    }

    chrono::Utc::now()
}

fn extract_text(block: ElementRef) -> Option<String> {
    TEXT_SELECTORS
        .iter()
        .find_map(|s| first_text(block, s).filter(|t| t.chars().count() > 5))
}

/// First nonempty trimmed text under a selector
fn first_text(scope: ElementRef, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    for element in scope.select(&selector) {
        let text = element.text().collect::<String>();
        let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }
    None
}

/// An attribute from the block itself or any descendant
fn attr_anywhere<'a>(block: ElementRef<'a>, attr: &str) -> Option<&'a str> {
    if let Some(value) = block.value().attr(attr) {
        return Some(value);
    }
    let selector = Selector::parse(&format!("[{attr}]")).ok()?;
    block.select(&selector).next().and_then(|el| el.value().attr(attr))
}
