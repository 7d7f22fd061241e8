//! Upstream session bootstrap and token management
//!
//! One `Session` is the coherent identity presented to the upstream for the
//! duration of a single fetch: cookie jar, CSRF token, session id, request
//! id, User-Agent, and the empirically discovered pagination variant. All of
//! it is wiped together on reset so the next attempt looks like a brand-new
//! visitor.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::scrape::client::HttpClient;
use crate::scrape::normalize;
use crate::scrape::{pace, Deadline};
use crate::types::FetchResult;

/// Session-page fetch attempts before giving up
const INIT_ATTEMPTS: u32 = 3;

/// CSRF-token endpoint fetch attempts
const CSRF_ATTEMPTS: u32 = 3;

/// Candidate patterns for the CSRF token; first match wins. The upstream
/// has shipped several spellings over time and none is documented, so all
/// stay until evidence justifies removal.
static CSRF_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""csrfToken"\s*:\s*"([^"]+)""#,
        r#"csrfToken=([A-Za-z0-9:_\-]+)"#,
        r#"window\.csrfToken\s*=\s*['"]([^'"]+)['"]"#,
        r#"data-csrf(?:-token)?="([^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Candidate patterns for the session id
static SESSION_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""sessionId"\s*:\s*"([^"]+)""#,
        r#""session_id"\s*:\s*"([^"]+)""#,
        r#"sessionId=([0-9_]+)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Candidate patterns for the request id
static REQ_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""reqId"\s*:\s*"([^"]+)""#,
        r#""requestId"\s*:\s*"([^"]+)""#,
        r#"reqId=([A-Za-z0-9_\-]+)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Per-fetch upstream session state
pub struct Session {
    client: HttpClient,
    csrf_token: Option<String>,
    session_id: Option<String>,
    req_id: Option<String>,
    /// Reviews-page HTML from the last successful initialize
    html: Option<String>,
    /// Index of the pagination parameter variant the endpoint accepted
    working_variant: Option<usize>,
}

impl Session {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            csrf_token: None,
            session_id: None,
            req_id: None,
            html: None,
            working_variant: None,
        }
    }

    /// Fetch the organization's reviews page like a navigating browser,
    /// populate the cookie jar, extract tokens, and pull whatever reviews
    /// are embedded in the page state.
    ///
    /// `None` means the page could not be fetched at all; endpoint passes
    /// may still proceed with a token from [`Session::csrf_token`].
    pub async fn initialize(
        &mut self,
        page_url: &str,
        org_id: &str,
        deadline: &Deadline,
    ) -> Option<FetchResult> {
        let url = reviews_url(page_url);
        let headers: [(&str, String); 6] = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8".to_string(),
            ),
            ("Sec-Fetch-Dest", "document".to_string()),
            ("Sec-Fetch-Mode", "navigate".to_string()),
            ("Sec-Fetch-Site", "none".to_string()),
            ("Sec-Fetch-User", "?1".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
        ];

        for attempt in 1..=INIT_ATTEMPTS {
            if let Some(response) = self.client.get(&url, &[], &headers, None).await {
                let html = response.body;
                self.csrf_token = first_capture(&CSRF_PATTERNS, &html);
                self.session_id = first_capture(&SESSION_ID_PATTERNS, &html);
                self.req_id = first_capture(&REQ_ID_PATTERNS, &html);
                debug!(
                    csrf = self.csrf_token.is_some(),
                    session_id = self.session_id.is_some(),
                    req_id = self.req_id.is_some(),
                    "session initialized from {}",
                    url
                );
                let embedded = normalize::from_page_state(&html, org_id);
                self.html = Some(html);
                return Some(embedded);
            }
            if deadline.is_timed_out() {
                break;
            }
            if attempt < INIT_ATTEMPTS {
                pace(Duration::from_secs(u64::from(attempt)), deadline).await;
            }
        }

        warn!("session page {} unreachable after {} attempts", url, INIT_ATTEMPTS);
        None
    }

    /// The CSRF token, fetching it from the dedicated endpoint when the
    /// page extraction produced none
    pub async fn csrf_token(&mut self, origin: &str, deadline: &Deadline) -> Option<String> {
        if self.csrf_token.is_some() {
            return self.csrf_token.clone();
        }

        let url = format!("{}/maps/api/csrf-token", origin.trim_end_matches('/'));
        for attempt in 1..=CSRF_ATTEMPTS {
            if deadline.is_timed_out() {
                return None;
            }
            if let Some(response) = self.client.get(&url, &[], &[], None).await {
                if let Some(token) = parse_csrf_body(&response.body) {
                    self.csrf_token = Some(token.clone());
                    return Some(token);
                }
            }
            if attempt < CSRF_ATTEMPTS {
                pace(Duration::from_secs(u64::from(attempt)), deadline).await;
            }
        }
        None
    }

    /// Drop the cached token and fetch a fresh one
    pub async fn refresh_csrf_token(&mut self, origin: &str, deadline: &Deadline) -> Option<String> {
        self.csrf_token = None;
        self.csrf_token(origin, deadline).await
    }

    /// Wipe cookies, tokens, the cached page, and the working pagination
    /// variant; assume a fresh browser identity
    pub fn reset(&mut self) {
        self.csrf_token = None;
        self.session_id = None;
        self.req_id = None;
        self.html = None;
        self.working_variant = None;
        self.client.reset_identity();
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Reviews-page HTML cached by the last successful initialize
    pub fn cached_html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn req_id(&self) -> Option<&str> {
        self.req_id.as_deref()
    }

    pub fn working_variant(&self) -> Option<usize> {
        self.working_variant
    }

    pub fn set_working_variant(&mut self, variant: usize) {
        self.working_variant = Some(variant);
    }

    /// Forget the discovered variant (filtered queries may use another)
    pub fn clear_working_variant(&mut self) {
        self.working_variant = None;
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut HttpClient {
        &mut self.client
    }
}

/// Normalize an organization URL to its reviews tab
fn reviews_url(page_url: &str) -> String {
    let base = page_url
        .split(['?', '#'])
        .next()
        .unwrap_or(page_url)
        .trim_end_matches('/');
    if base.ends_with("/reviews") {
        format!("{base}/")
    } else {
        format!("{base}/reviews/")
    }
}

fn first_capture(patterns: &[Regex], haystack: &str) -> Option<String> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(haystack) {
            if let Some(m) = caps.get(1) {
                let value = m.as_str().trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// The token endpoint answers either with a bare token or a small JSON
/// object under `token` / `csrfToken`
fn parse_csrf_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(token) = value
            .get("token")
            .or_else(|| value.get("csrfToken"))
            .and_then(|t| t.as_str())
        {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
        if value.is_object() || value.is_array() {
            return None;
        }
    }

    // Bare token: one short line, no markup
    if trimmed.len() < 256 && !trimmed.contains(char::is_whitespace) && !trimmed.contains('<') {
        return Some(trimmed.to_string());
    }
    None
}
