//! Author name cleanup
//!
//! The upstream concatenates profile badges onto author names ("Знаток
//! города 5 уровня", "Активный автор", review/photo counters). The cleaner
//! strips them with whitespace-delimited matches only, so names that merely
//! contain a badge word ("Эксперт-криминалист") survive intact.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::ANONYMOUS_AUTHOR;

/// Badge fragments, each anchored to whitespace or string edges
static BADGES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:^|\s)Знаток города \d+ уровня(?:$|\s)",
        r"(?:^|\s)Активный автор(?:$|\s)",
        r"(?:^|\s)Местный эксперт(?:$|\s)",
        r"(?:^|\s)Эксперт(?:\s+\d+\s+уровня)?(?:$|\s)",
        r"(?:^|\s)Новичок(?:$|\s)",
        r"(?:^|\s)\d+\s*отзыв[а-яё]*(?:$|\s)",
        r"(?:^|\s)\d+\s*оцен[а-яё]*(?:$|\s)",
        r"(?:^|\s)\d+\s*фото[а-яё]*(?:$|\s)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Strip badge text and collapse whitespace. Empty results become the
/// anonymous placeholder.
pub fn clean_author(raw: &str) -> String {
    let mut name = raw.to_string();
    for badge in BADGES.iter() {
        // Replace repeatedly: consecutive badges share their delimiting
        // whitespace, so one pass can leave a second badge at an edge.
        loop {
            let replaced = badge.replace_all(&name, " ").into_owned();
            if replaced == name {
                break;
            }
            name = replaced;
        }
    }

    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        ANONYMOUS_AUTHOR.to_string()
    } else {
        collapsed
    }
}
