//! Two-level review deduplication
//!
//! The fan-out deliberately re-fetches overlapping subsets (endpoints ×
//! sort orders × rating filters), so the accumulator must drop what it has
//! already seen: first by the upstream-assigned review id, then (for
//! reviews lacking one) by a content fingerprint. Merging is append-only;
//! a later duplicate never replaces an earlier review.

use std::collections::HashSet;

use crate::types::RawReview;

/// `md5(lower(trim(author)) + "|" + lower(trim(text)))`, suppressed when
/// both fields are empty
pub fn fingerprint(author: &str, text: &str) -> Option<String> {
    let author = author.trim().to_lowercase();
    let text = text.trim().to_lowercase();
    if author.is_empty() && text.is_empty() {
        return None;
    }
    let digest = md5::compute(format!("{author}|{text}"));
    Some(format!("{digest:x}"))
}

/// Append-only accumulator with id and fingerprint seen-sets
#[derive(Debug, Default)]
pub struct ReviewAccumulator {
    reviews: Vec<RawReview>,
    seen_ids: HashSet<String>,
    seen_fingerprints: HashSet<String>,
}

impl ReviewAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a review unless its id or fingerprint was already seen.
    /// Returns whether the review was actually appended.
    pub fn push(&mut self, review: RawReview) -> bool {
        if let Some(id) = &review.yandex_id {
            if self.seen_ids.contains(id) {
                return false;
            }
        }

        let fp = fingerprint(&review.author, review.text.as_deref().unwrap_or(""));
        if review.yandex_id.is_none() {
            if let Some(fp) = &fp {
                if self.seen_fingerprints.contains(fp) {
                    return false;
                }
            }
        }

        if let Some(id) = &review.yandex_id {
            self.seen_ids.insert(id.clone());
        }
        if let Some(fp) = fp {
            self.seen_fingerprints.insert(fp);
        }
        self.reviews.push(review);
        true
    }

    /// Add a batch; returns how many were new
    pub fn extend(&mut self, reviews: Vec<RawReview>) -> usize {
        let mut added = 0;
        for review in reviews {
            if self.push(review) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.reviews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }

    /// The accumulated reviews, in fetch order
    pub fn into_reviews(self) -> Vec<RawReview> {
        self.reviews
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(id: Option<&str>, author: &str, text: &str) -> RawReview {
        RawReview {
            yandex_id: id.map(str::to_string),
            author: author.to_string(),
            text: Some(text.to_string()),
            ..RawReview::default()
        }
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        assert_eq!(
            fingerprint("  Иван ", "Отличное место"),
            fingerprint("иван", "  отличное место  ")
        );
    }

    #[test]
    fn fingerprint_differs_on_single_char_change() {
        assert_ne!(
            fingerprint("Иван", "Отличное место"),
            fingerprint("Иван", "Отличное место!")
        );
    }

    #[test]
    fn fingerprint_suppressed_when_both_empty() {
        assert!(fingerprint("", "").is_none());
        assert!(fingerprint("  ", "  ").is_none());
        assert!(fingerprint("Иван", "").is_some());
    }

    #[test]
    fn duplicate_id_is_dropped() {
        let mut acc = ReviewAccumulator::new();
        assert!(acc.push(review(Some("1"), "Иван", "Текст")));
        assert!(!acc.push(review(Some("1"), "Другой Автор", "Другой текст")));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn duplicate_fingerprint_without_id_is_dropped() {
        let mut acc = ReviewAccumulator::new();
        assert!(acc.push(review(None, "Иван", "Текст")));
        assert!(!acc.push(review(None, "иван", "текст")));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn id_bearing_review_passes_fingerprint_collision() {
        // A review with a fresh upstream id is kept even when its content
        // matches something already seen
        let mut acc = ReviewAccumulator::new();
        assert!(acc.push(review(Some("1"), "Иван", "Текст")));
        assert!(acc.push(review(Some("2"), "Иван", "Текст")));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn merge_counts_only_new_reviews() {
        let mut acc = ReviewAccumulator::new();
        let pass_a: Vec<RawReview> = (1..=400)
            .map(|i| review(Some(&i.to_string()), "Автор", &format!("Текст {i}")))
            .collect();
        let pass_b: Vec<RawReview> = (300..=700)
            .map(|i| review(Some(&i.to_string()), "Автор", &format!("Текст {i}")))
            .collect();

        assert_eq!(acc.extend(pass_a), 400);
        assert_eq!(acc.extend(pass_b), 300);
        assert_eq!(acc.len(), 700);
    }

    #[test]
    fn order_is_fetch_order() {
        let mut acc = ReviewAccumulator::new();
        acc.push(review(Some("b"), "Б", "второй"));
        acc.push(review(Some("a"), "А", "первый"));
        let ids: Vec<_> = acc
            .into_reviews()
            .into_iter()
            .map(|r| r.yandex_id.unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn reviews_without_any_identity_are_never_deduped() {
        let mut acc = ReviewAccumulator::new();
        // No id and no fingerprint: nothing to dedup on, append as-is
        assert!(acc.push(RawReview::default()));
        assert!(acc.push(RawReview::default()));
        assert_eq!(acc.len(), 2);
    }
}
