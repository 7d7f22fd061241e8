//! Fan-out orchestration
//!
//! One `fetch_reviews` call walks the cross product of endpoints × sort
//! orders, merging everything through the deduplicating accumulator. When
//! the upstream's per-query cap leaves a gap against the reported total,
//! it falls back to per-rating passes that slice the population into
//! star buckets the cap applies to individually. Strictly sequential: the
//! upstream reads parallel fetching as bot behavior and answers with
//! captcha.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::scrape::captcha::CaptchaSolver;
use crate::scrape::client::HttpClient;
use crate::scrape::dedup::ReviewAccumulator;
use crate::scrape::normalize;
use crate::scrape::org_url::{parse_org_url, ParsedOrgUrl};
use crate::scrape::paginator::{self, Endpoint, PassParams, SortOrder};
use crate::scrape::session::Session;
use crate::scrape::{pace, Deadline};
use crate::types::FetchResult;

/// The review acquisition engine.
///
/// Owns all transient upstream-facing state (session, cookies, tokens,
/// proxy position, User-Agent). One instance serves one `fetch_reviews`
/// call; batch syncs hold one instance across sources and reset the
/// session between them, so only the proxy index carries over.
pub struct ReviewFetcher {
    config: EngineConfig,
    session: Session,
    solver: CaptchaSolver,
}

impl ReviewFetcher {
    pub fn new(config: EngineConfig) -> Self {
        let client = HttpClient::new(config.fetch.clone());
        let solver = CaptchaSolver::new(config.captcha.clone());
        Self {
            config,
            session: Session::new(client),
            solver,
        }
    }

    /// Fetch every review the upstream will reveal for the organization
    /// behind `url`, within the global budget. Transport trouble, captchas,
    /// and shape drift shrink the result; only an unparseable URL is an
    /// error.
    pub async fn fetch_reviews(&mut self, url: &str) -> Result<FetchResult, SyncError> {
        let parsed = parse_org_url(url).ok_or_else(|| SyncError::unparseable_url(url))?;
        let origin = self.origin(&parsed);
        let page_url = self.page_url(url, &parsed, &origin);
        let deadline = Deadline::new(Duration::from_secs(self.config.fetch.fetch_budget_secs));
        let page_delay = Duration::from_millis(self.config.fetch.page_delay_ms);

        let mut acc = ReviewAccumulator::new();
        let mut result = FetchResult::default();

        // Bootstrap the session; the page itself often embeds the first
        // review batch.
        match self
            .session
            .initialize(&page_url, &parsed.org_id, &deadline)
            .await
        {
            Some(embedded) => {
                result.merge_metadata(&embedded);
                let found = embedded.reviews.len();
                let fresh = acc.extend(embedded.reviews);
                result.stats.duplicates_skipped += (found - fresh) as u64;
                debug!("embedded page state yielded {} reviews", fresh);
            }
            None => {
                result.stats.null_responses += 1;
                warn!("session init failed; continuing with endpoint passes");
            }
        }

        // Cross product of endpoints × sort orders, stopping as soon as the
        // reported total is covered.
        'cross: for endpoint in Endpoint::ALL {
            for sort in SortOrder::ALL {
                if deadline.is_timed_out() {
                    break 'cross;
                }
                if result.total_reviews > 0 && acc.len() as i64 >= result.total_reviews {
                    break 'cross;
                }
                let params = PassParams {
                    origin: &origin,
                    org_id: &parsed.org_id,
                    endpoint,
                    sort,
                    rating_filter: None,
                    page_delay,
                };
                paginator::run_pass(
                    &params,
                    &mut self.session,
                    &self.solver,
                    &deadline,
                    &mut acc,
                    &mut result,
                )
                .await;
            }
        }

        // The unfiltered result sets are capped upstream; star-bucketed
        // queries are capped individually and, summed, approach the total.
        if result.total_reviews > 0 && (acc.len() as i64) < result.total_reviews {
            info!(
                "gap after cross product ({} of {}); starting per-rating passes",
                acc.len(),
                result.total_reviews
            );
            for stars in 1..=5u8 {
                if deadline.is_timed_out() {
                    break;
                }
                if acc.len() as i64 >= result.total_reviews {
                    break;
                }
                // Filtered queries may accept a different pagination scheme
                self.session.clear_working_variant();
                let params = PassParams {
                    origin: &origin,
                    org_id: &parsed.org_id,
                    endpoint: Endpoint::FetchReviews,
                    sort: SortOrder::ByTime,
                    rating_filter: Some(stars),
                    page_delay,
                };
                paginator::run_pass(
                    &params,
                    &mut self.session,
                    &self.solver,
                    &deadline,
                    &mut acc,
                    &mut result,
                )
                .await;
                if stars < 5 {
                    pace(
                        Duration::from_millis(self.config.fetch.star_pass_delay_ms),
                        &deadline,
                    )
                    .await;
                }
            }
        }

        // DOM fallback: only when nothing else produced a single review
        if acc.is_empty() {
            if let Some(html) = self.session.cached_html() {
                let dom = normalize::from_document(html);
                result.merge_metadata(&dom);
                let fresh = acc.extend(dom.reviews);
                if fresh > 0 {
                    info!("DOM fallback recovered {} reviews", fresh);
                }
            }
        }

        result.reviews = acc.into_reviews();
        info!(
            org_id = %parsed.org_id,
            "fetch finished: {} reviews ({} reported), stats {:?}",
            result.reviews.len(),
            result.total_reviews,
            result.stats
        );
        Ok(result)
    }

    /// Advance the outbound proxy; used between sources in a batch
    pub fn rotate_proxy(&mut self) {
        self.session.client_mut().rotate_proxy();
    }

    /// Wipe all per-source session state
    pub fn reset_session(&mut self) {
        self.session.reset();
    }

    /// Upstream origin: configured override, or the parsed mirror host
    fn origin(&self, parsed: &ParsedOrgUrl) -> String {
        match &self.config.fetch.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => parsed.host.origin(),
        }
    }

    /// The session-init URL: the user's path on the active origin, or the
    /// canonical org path when the input was not a full URL
    fn page_url(&self, raw_url: &str, parsed: &ParsedOrgUrl, origin: &str) -> String {
        if let Ok(user_url) = url::Url::parse(raw_url) {
            if user_url.path().contains("/org/") {
                return format!("{}{}", origin, user_url.path());
            }
        }
        match &parsed.slug {
            Some(slug) => format!("{}/maps/org/{}/{}/", origin, slug, parsed.org_id),
            None => format!("{}/maps/org/{}/", origin, parsed.org_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher_with_base(base: Option<&str>) -> ReviewFetcher {
        let mut config = EngineConfig::default();
        config.fetch.base_url = base.map(str::to_string);
        ReviewFetcher::new(config)
    }

    #[test]
    fn origin_prefers_configured_override() {
        let fetcher = fetcher_with_base(Some("http://127.0.0.1:8080/"));
        let parsed = parse_org_url("https://yandex.ru/maps/org/kafe/1010501395/").unwrap();
        assert_eq!(fetcher.origin(&parsed), "http://127.0.0.1:8080");
    }

    #[test]
    fn origin_follows_mirror_host() {
        let fetcher = fetcher_with_base(None);
        let ru = parse_org_url("https://yandex.ru/maps/org/kafe/1010501395/").unwrap();
        assert_eq!(fetcher.origin(&ru), "https://yandex.ru");
        let com = parse_org_url("https://yandex.com/maps/org/kafe/1010501395/").unwrap();
        assert_eq!(fetcher.origin(&com), "https://yandex.com");
    }

    #[test]
    fn page_url_keeps_user_path_on_active_origin() {
        let fetcher = fetcher_with_base(Some("http://127.0.0.1:9999"));
        let raw = "https://yandex.ru/maps/org/kafe/1010501395/";
        let parsed = parse_org_url(raw).unwrap();
        assert_eq!(
            fetcher.page_url(raw, &parsed, "http://127.0.0.1:9999"),
            "http://127.0.0.1:9999/maps/org/kafe/1010501395/"
        );
    }

    #[test]
    fn page_url_reconstructed_for_bare_inputs() {
        let fetcher = fetcher_with_base(None);
        let parsed = parse_org_url("oid=1010501395").unwrap();
        assert_eq!(
            fetcher.page_url("oid=1010501395", &parsed, "https://yandex.ru"),
            "https://yandex.ru/maps/org/1010501395/"
        );
    }

    #[tokio::test]
    async fn unparseable_url_is_a_validation_error() {
        let mut fetcher = fetcher_with_base(None);
        let err = fetcher.fetch_reviews("https://example.com/nothing").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidUrl(_)));
    }
}
