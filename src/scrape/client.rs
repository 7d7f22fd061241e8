//! Browser-identity HTTP client
//!
//! Wraps `reqwest` with the ensemble the upstream expects from a real
//! visitor: a persistent cookie jar, a User-Agent drawn from a curated pool
//! (with client-hint headers kept consistent for Chromium identities), and
//! an optional rotating outbound proxy. Transport failures never escape:
//! every error becomes a logged `None` so the pagination stopping rules can
//! count it.

use rand::seq::SliceRandom;
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// One coherent browser identity. Chromium identities carry matching
/// `Sec-Ch-Ua*` values; Firefox and Safari identities must send none.
#[derive(Debug, Clone, Copy)]
pub struct UaProfile {
    pub user_agent: &'static str,
    pub sec_ch_ua: Option<&'static str>,
    pub sec_ch_ua_platform: Option<&'static str>,
}

impl UaProfile {
    /// Whether this identity sends client-hint headers
    pub fn is_chromium(&self) -> bool {
        self.sec_ch_ua.is_some()
    }
}

/// Curated pool of five modern browser identities
pub const UA_POOL: [UaProfile; 5] = [
    UaProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
        sec_ch_ua: Some("\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"126\", \"Google Chrome\";v=\"126\""),
        sec_ch_ua_platform: Some("\"Windows\""),
    },
    UaProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
        sec_ch_ua: Some("\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"126\", \"Google Chrome\";v=\"126\""),
        sec_ch_ua_platform: Some("\"macOS\""),
    },
    UaProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        sec_ch_ua: Some("\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"125\", \"Google Chrome\";v=\"125\""),
        sec_ch_ua_platform: Some("\"Linux\""),
    },
    UaProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
        sec_ch_ua: None,
        sec_ch_ua_platform: None,
    },
    UaProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
        sec_ch_ua: None,
        sec_ch_ua_platform: None,
    },
];

/// Accept-Language sent on every request
const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

/// A response that made it back over the wire with a 2xx status
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP client holding one browser identity at a time
pub struct HttpClient {
    config: FetchConfig,
    client: reqwest::Client,
    jar: Arc<Jar>,
    ua: UaProfile,
    /// Round-robin position in `config.proxies`; advances on `rotate_proxy`
    proxy_index: usize,
}

impl HttpClient {
    pub fn new(config: FetchConfig) -> Self {
        let ua = pick_user_agent();
        let jar = Arc::new(Jar::default());
        let client = build_client(&config, &jar, proxy_at(&config, 0));
        Self {
            config,
            client,
            jar,
            ua,
            proxy_index: 0,
        }
    }

    /// GET with the base browser headers, optional extra headers, and an
    /// optional timeout override. Any transport error or non-2xx status is
    /// logged and returned as `None`.
    pub async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        extra_headers: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Option<HttpResponse> {
        let mut request = self
            .client
            .get(url)
            .header("User-Agent", self.ua.user_agent)
            .header("Accept-Language", ACCEPT_LANGUAGE);

        if let Some(sec_ch_ua) = self.ua.sec_ch_ua {
            request = request
                .header("Sec-Ch-Ua", sec_ch_ua)
                .header("Sec-Ch-Ua-Mobile", "?0");
            if let Some(platform) = self.ua.sec_ch_ua_platform {
                request = request.header("Sec-Ch-Ua-Platform", platform);
            }
        }

        for (name, value) in extra_headers {
            request = request.header(*name, value.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("GET {} failed: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("GET {} returned {}", url, status);
            return None;
        }

        match response.text().await {
            Ok(body) => Some(HttpResponse {
                status: status.as_u16(),
                body,
            }),
            Err(e) => {
                warn!("GET {}: failed to read body: {}", url, e);
                None
            }
        }
    }

    /// Advance to the next proxy in the configured list and rebuild the
    /// client. A no-op when no proxies are configured.
    pub fn rotate_proxy(&mut self) {
        if self.config.proxies.is_empty() {
            return;
        }
        self.proxy_index += 1;
        debug!(
            "rotating proxy to index {} of {}",
            self.proxy_index % self.config.proxies.len(),
            self.config.proxies.len()
        );
        self.rebuild();
    }

    /// Discard all cookies and assume a fresh random browser identity
    pub fn reset_identity(&mut self) {
        self.ua = pick_user_agent();
        self.jar = Arc::new(Jar::default());
        self.rebuild();
    }

    pub fn user_agent(&self) -> &'static str {
        self.ua.user_agent
    }

    /// Currently selected proxy URL, if any
    pub fn current_proxy(&self) -> Option<&str> {
        proxy_at(&self.config, self.proxy_index).map(String::as_str)
    }

    fn rebuild(&mut self) {
        self.client = build_client(&self.config, &self.jar, proxy_at(&self.config, self.proxy_index));
    }
}

fn pick_user_agent() -> UaProfile {
    *UA_POOL
        .choose(&mut rand::thread_rng())
        .unwrap_or(&UA_POOL[0])
}

fn proxy_at(config: &FetchConfig, index: usize) -> Option<&String> {
    if config.proxies.is_empty() {
        None
    } else {
        config.proxies.get(index % config.proxies.len())
    }
}

fn build_client(config: &FetchConfig, jar: &Arc<Jar>, proxy: Option<&String>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .cookie_provider(Arc::clone(jar))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => warn!("ignoring unusable proxy {}: {}", proxy_url, e),
        }
    }

    match builder.build() {
        Ok(client) => client,
        Err(e) => {
            warn!("failed to build HTTP client, falling back to defaults: {}", e);
            reqwest::Client::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_five_identities() {
        assert_eq!(UA_POOL.len(), 5);
    }

    #[test]
    fn chromium_identities_carry_full_hint_set() {
        for ua in UA_POOL.iter().filter(|ua| ua.is_chromium()) {
            assert!(ua.sec_ch_ua.unwrap().contains("Chromium"));
            assert!(ua.sec_ch_ua_platform.is_some(), "Chromium identity without a platform hint");
        }
    }

    #[test]
    fn gecko_and_webkit_identities_carry_no_hints() {
        let hintless: Vec<_> = UA_POOL.iter().filter(|ua| !ua.is_chromium()).collect();
        assert_eq!(hintless.len(), 2);
        for ua in hintless {
            assert!(ua.sec_ch_ua.is_none());
            assert!(ua.sec_ch_ua_platform.is_none());
        }
    }

    #[test]
    fn proxy_rotation_is_round_robin() {
        let config = FetchConfig {
            proxies: vec![
                "http://proxy-a:8080".to_string(),
                "http://proxy-b:8080".to_string(),
            ],
            ..FetchConfig::default()
        };
        let mut client = HttpClient::new(config);
        assert_eq!(client.current_proxy(), Some("http://proxy-a:8080"));
        client.rotate_proxy();
        assert_eq!(client.current_proxy(), Some("http://proxy-b:8080"));
        client.rotate_proxy();
        assert_eq!(client.current_proxy(), Some("http://proxy-a:8080"));
    }

    #[test]
    fn no_proxies_means_no_proxy() {
        let mut client = HttpClient::new(FetchConfig::default());
        assert!(client.current_proxy().is_none());
        client.rotate_proxy();
        assert!(client.current_proxy().is_none());
    }

    #[test]
    fn reset_identity_picks_from_pool() {
        let mut client = HttpClient::new(FetchConfig::default());
        client.reset_identity();
        assert!(UA_POOL.iter().any(|ua| ua.user_agent == client.user_agent()));
    }
}
