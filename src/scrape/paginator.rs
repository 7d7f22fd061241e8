//! Page walking for one (endpoint, sort order, rating filter) tuple
//!
//! The upstream documents none of its pagination contract, so the walker
//! probes three parameter schemes and caches whichever one the endpoint
//! accepted. Stopping is rule-driven: tolerances for consecutive nulls,
//! empty pages, and all-duplicate pages are wider while the reported total
//! says there is more to fetch.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::scrape::captcha::{CaptchaChallenge, CaptchaSolver};
use crate::scrape::dedup::ReviewAccumulator;
use crate::scrape::normalize;
use crate::scrape::session::Session;
use crate::scrape::signer;
use crate::scrape::{pace, Deadline};
use crate::types::FetchResult;

/// Reviews requested per page
pub const PAGE_SIZE: usize = 50;

/// Hard page cap per pass
pub const MAX_PAGES: u32 = 22;

/// Number of pagination parameter schemes
pub(crate) const VARIANT_COUNT: usize = 3;

/// Internal review endpoints, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    FetchReviews,
    GetBusinessReviews,
    Widget,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [
        Endpoint::FetchReviews,
        Endpoint::GetBusinessReviews,
        Endpoint::Widget,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::FetchReviews => "/maps/api/business/fetchReviews",
            Endpoint::GetBusinessReviews => "/maps/api/business/getBusinessReviews",
            Endpoint::Widget => "/maps-reviews-widget/fetchReviews",
        }
    }

    /// The widget endpoint names the organization differently
    pub fn org_param(&self) -> &'static str {
        match self {
            Endpoint::Widget => "oid",
            _ => "businessId",
        }
    }
}

/// Upstream sort orders; each exposes a partially overlapping subset of the
/// review population
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    ByTime,
    ByRating,
    ByRelevance,
}

impl SortOrder {
    pub const ALL: [SortOrder; 3] = [SortOrder::ByTime, SortOrder::ByRating, SortOrder::ByRelevance];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::ByTime => "by_time",
            SortOrder::ByRating => "by_rating",
            SortOrder::ByRelevance => "by_relevance",
        }
    }
}

/// Everything constant across the pages of one pass
pub struct PassParams<'a> {
    pub origin: &'a str,
    pub org_id: &'a str,
    pub endpoint: Endpoint,
    pub sort: SortOrder,
    pub rating_filter: Option<u8>,
    pub page_delay: Duration,
}

/// Walk one pass, feeding new reviews into the accumulator and
/// organization metadata into the result
pub async fn run_pass(
    params: &PassParams<'_>,
    session: &mut Session,
    solver: &CaptchaSolver,
    deadline: &Deadline,
    acc: &mut ReviewAccumulator,
    result: &mut FetchResult,
) {
    let referer = format!("{}/maps/org/{}/reviews/", params.origin, params.org_id);
    let mut csrf = session
        .csrf_token(params.origin, deadline)
        .await
        .unwrap_or_default();
    let mut captcha_answer: Option<String> = None;
    let mut captcha_retries = 0u32;
    let mut consecutive_nulls = 0u32;
    let mut consecutive_empty = 0u32;
    let mut consecutive_duplicate = 0u32;
    let started_with = acc.len();
    let mut page: u32 = 1;

    while page <= MAX_PAGES {
        if deadline.is_timed_out() {
            debug!("fetch budget exhausted at page {}", page);
            break;
        }

        let payload = fetch_page(
            params,
            session,
            &csrf,
            &referer,
            page,
            captcha_answer.as_deref(),
        )
        .await;

        let Some(payload) = payload else {
            result.stats.null_responses += 1;
            consecutive_nulls += 1;
            if consecutive_nulls >= tolerance(4, 2, acc.len(), result.total_reviews) {
                debug!("stopping after {} consecutive null responses", consecutive_nulls);
                break;
            }
            page += 1;
            pace(params.page_delay, deadline).await;
            continue;
        };
        consecutive_nulls = 0;

        if let Some(challenge) = CaptchaChallenge::from_payload(&payload) {
            result.stats.captchas_seen += 1;
            if captcha_retries >= solver.max_retries() {
                debug!("giving up after {} captcha retries", captcha_retries);
                break;
            }
            captcha_retries += 1;
            match solver.solve(&challenge, &referer, deadline).await {
                Some(token) => {
                    result.stats.captchas_solved += 1;
                    captcha_answer = Some(token);
                }
                None => {
                    // Fresh identity before facing the wall again
                    session.client_mut().rotate_proxy();
                    session.reset();
                    pace(solver.retry_delay(), deadline).await;
                    csrf = session
                        .refresh_csrf_token(params.origin, deadline)
                        .await
                        .unwrap_or_default();
                }
            }
            continue; // same page
        }
        captcha_answer = None;

        let page_result = normalize::from_endpoint_payload(&payload);
        result.merge_metadata(&page_result);

        let page_count = page_result.reviews.len();
        if page_count == 0 {
            result.stats.empty_pages += 1;
            consecutive_empty += 1;
            if consecutive_empty >= tolerance(4, 2, acc.len(), result.total_reviews) {
                debug!("stopping after {} consecutive empty pages", consecutive_empty);
                break;
            }
            page += 1;
            pace(params.page_delay, deadline).await;
            continue;
        }
        consecutive_empty = 0;

        result.stats.pages_fetched += 1;
        let fresh = acc.extend(page_result.reviews);
        result.stats.duplicates_skipped += (page_count - fresh) as u64;
        debug!(
            "page {}: {} reviews, {} new (accumulated {})",
            page,
            page_count,
            fresh,
            acc.len()
        );

        if fresh == 0 {
            consecutive_duplicate += 1;
            if consecutive_duplicate >= tolerance(3, 2, acc.len(), result.total_reviews) {
                debug!("stopping after {} all-duplicate pages", consecutive_duplicate);
                break;
            }
        } else {
            consecutive_duplicate = 0;
        }

        let total = result.total_reviews;
        if total > 0 && acc.len() as i64 >= total {
            break;
        }
        if page_count < PAGE_SIZE && (total <= 0 || acc.len() as i64 >= total) {
            break;
        }

        page += 1;
        pace(params.page_delay, deadline).await;
    }

    info!(
        endpoint = params.endpoint.path(),
        sort = params.sort.as_str(),
        rating = ?params.rating_filter,
        "pass finished: +{} reviews ({} accumulated, {} reported)",
        acc.len() - started_with,
        acc.len(),
        result.total_reviews
    );
}

/// Fetch one page, probing parameter variants until one yields JSON.
/// The accepted variant is cached on the session for the rest of the pass.
async fn fetch_page(
    params: &PassParams<'_>,
    session: &mut Session,
    csrf: &str,
    referer: &str,
    page: u32,
    captcha_answer: Option<&str>,
) -> Option<Value> {
    let base = base_params(params, session, csrf);

    if let Some(variant) = session.working_variant() {
        return request_variant(params, session, &base, referer, page, variant, captcha_answer)
            .await;
    }

    for variant in 0..VARIANT_COUNT {
        if let Some(payload) =
            request_variant(params, session, &base, referer, page, variant, captcha_answer).await
        {
            debug!("pagination variant {} accepted by {}", variant, params.endpoint.path());
            session.set_working_variant(variant);
            return Some(payload);
        }
    }
    None
}

async fn request_variant(
    params: &PassParams<'_>,
    session: &Session,
    base: &[(String, String)],
    referer: &str,
    page: u32,
    variant: usize,
    captcha_answer: Option<&str>,
) -> Option<Value> {
    let mut query = base.to_vec();
    query.extend(variant_params(variant, page));
    if let Some(answer) = captcha_answer {
        query.push(("captchaAnswer".to_string(), answer.to_string()));
    }
    // The signature covers everything else and goes on last
    let signature = signer::sign(&query);
    query.push(("s".to_string(), signature));

    let url = format!("{}{}", params.origin, params.endpoint.path());
    let headers: [(&str, String); 6] = [
        ("Accept", "application/json, text/javascript, */*; q=0.01".to_string()),
        ("X-Requested-With", "XMLHttpRequest".to_string()),
        ("Sec-Fetch-Dest", "empty".to_string()),
        ("Sec-Fetch-Mode", "cors".to_string()),
        ("Sec-Fetch-Site", "same-origin".to_string()),
        ("Referer", referer.to_string()),
    ];

    let response = session.client().get(&url, &query, &headers, None).await?;
    serde_json::from_str(&response.body).ok()
}

/// Parameters shared by every variant, in construction order
fn base_params(params: &PassParams<'_>, session: &Session, csrf: &str) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = vec![
        ("ajax".to_string(), "1".to_string()),
        (
            params.endpoint.org_param().to_string(),
            params.org_id.to_string(),
        ),
        ("csrfToken".to_string(), csrf.to_string()),
        ("locale".to_string(), "ru_RU".to_string()),
        ("ranking".to_string(), params.sort.as_str().to_string()),
    ];
    if let Some(rating) = params.rating_filter {
        query.push(("rating".to_string(), rating.to_string()));
    }
    if let Some(session_id) = session.session_id() {
        query.push(("sessionId".to_string(), session_id.to_string()));
    }
    if let Some(req_id) = session.req_id() {
        query.push(("reqId".to_string(), req_id.to_string()));
    }
    query
}

/// The three pagination schemes: 1-based page, 0-based page, offset/limit
fn variant_params(variant: usize, page: u32) -> [(String, String); 2] {
    match variant {
        0 => [
            ("page".to_string(), page.to_string()),
            ("pageSize".to_string(), PAGE_SIZE.to_string()),
        ],
        1 => [
            ("page".to_string(), page.saturating_sub(1).to_string()),
            ("pageSize".to_string(), PAGE_SIZE.to_string()),
        ],
        _ => [
            (
                "offset".to_string(),
                ((page.saturating_sub(1) as usize) * PAGE_SIZE).to_string(),
            ),
            ("limit".to_string(), PAGE_SIZE.to_string()),
        ],
    }
}

/// Consecutive-failure tolerance: wider while the reported total says more
/// reviews remain
fn tolerance(while_short: u32, otherwise: u32, fetched: usize, total: i64) -> u32 {
    if (fetched as i64) < total {
        while_short
    } else {
        otherwise
    }
}
