//! Review date parsing
//!
//! The upstream emits dates as Unix seconds, Unix milliseconds, ISO strings,
//! or Russian-language human forms ("вчера", "3 дня назад", "5 января
//! 2024"). Everything funnels into `DateTime<Utc>`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// `N <unit> назад` and bare-unit forms ("час назад")
static RELATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)?\s*([а-яё]+)\s+назад$").expect("static pattern"));

/// `<day> <month-name> [year]` with genitive month names
static ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})\s+([а-яё]+)\.?\s*(\d{4})?$").expect("static pattern"));

/// Genitive month names, January first
const MONTHS: [&str; 12] = [
    "января", "февраля", "марта", "апреля", "мая", "июня",
    "июля", "августа", "сентября", "октября", "ноября", "декабря",
];

/// Parse a date carried in a JSON payload. Numbers are Unix seconds, or
/// milliseconds when above 10^12.
pub fn parse_date_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let v = n.as_f64()?;
            if v <= 0.0 {
                return None;
            }
            timestamp_to_datetime(v)
        }
        Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

/// Parse a date string: ISO forms, numeric timestamps, Russian human forms,
/// then a permissive format ladder. `None` when nothing matches.
pub fn parse_date_str(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n > 0.0 {
            return timestamp_to_datetime(n);
        }
    }

    parse_russian_with_now(trimmed, Utc::now()).or_else(|| parse_permissive(trimmed))
}

/// Like [`parse_date_str`] but never empty-handed: unparseable input
/// becomes "now". Used by the DOM fallback where a date-bearing element was
/// positively identified.
pub fn parse_human_date(input: &str) -> DateTime<Utc> {
    parse_date_str(input).unwrap_or_else(Utc::now)
}

/// Russian relative and absolute forms, evaluated against an explicit "now"
pub fn parse_russian_with_now(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = input.trim().to_lowercase();

    let start_of_day = |dt: DateTime<Utc>| -> Option<DateTime<Utc>> {
        dt.date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
    };

    match lower.as_str() {
        "сегодня" => return start_of_day(now),
        "вчера" => return start_of_day(now - Duration::days(1)),
        "позавчера" => return start_of_day(now - Duration::days(2)),
        _ => {}
    }

    if let Some(caps) = RELATIVE.captures(&lower) {
        let n: i64 = caps
            .get(1)
            .map(|m| m.as_str().parse().unwrap_or(1))
            .unwrap_or(1);
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let delta = if unit.starts_with("сек") {
            Duration::seconds(n)
        } else if unit.starts_with("мин") {
            Duration::minutes(n)
        } else if unit.starts_with("час") {
            Duration::hours(n)
        } else if unit.starts_with("дн") || unit.starts_with("ден") {
            Duration::days(n)
        } else if unit.starts_with("недел") {
            Duration::weeks(n)
        } else if unit.starts_with("мес") {
            Duration::days(30 * n)
        } else if unit.starts_with("год") || unit.starts_with("лет") {
            Duration::days(365 * n)
        } else {
            return None;
        };
        return Some(now - delta);
    }

    if let Some(caps) = ABSOLUTE.captures(&lower) {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month_name = caps.get(2)?.as_str();
        let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;

        let year = match caps.get(3) {
            Some(y) => y.as_str().parse().ok()?,
            None => {
                // Current year unless that would land in the future
                let candidate = NaiveDate::from_ymd_opt(now.year(), month, day)?;
                if candidate > now.date_naive() {
                    now.year() - 1
                } else {
                    now.year()
                }
            }
        };

        let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive));
    }

    None
}

fn timestamp_to_datetime(value: f64) -> Option<DateTime<Utc>> {
    // Millisecond timestamps are distinguishable by magnitude
    if value > 1e12 {
        Utc.timestamp_millis_opt(value as i64).single()
    } else {
        Utc.timestamp_opt(value as i64, 0).single()
    }
}

fn parse_permissive(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATE_FORMATS: [&str; 6] = [
        "%Y-%m-%d",
        "%d.%m.%Y",
        "%d/%m/%Y",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for format in &DATE_FORMATS {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
    }
    None
}
