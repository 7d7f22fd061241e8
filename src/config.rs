//! Engine configuration
//!
//! Plain serde structs with defaults matching the upstream's observed
//! tolerances. `EngineConfig::from_env` layers the deployment environment
//! (`YANDEX_PROXIES`, `CAPTCHA_API_KEY`, `CAPTCHA_API_URL`) over the
//! defaults; `validate` collects every problem into one error so the
//! operator can fix everything in one pass.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Default captcha solving service
pub const DEFAULT_CAPTCHA_API_URL: &str = "https://rucaptcha.com";

/// Fetch-side configuration: identity rotation, timeouts, pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Outbound proxy URLs, rotated round-robin; empty disables proxying
    pub proxies: Vec<String>,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Global budget for one `fetch_reviews` call (seconds)
    pub fetch_budget_secs: u64,
    /// Delay between pages of one pass (milliseconds)
    pub page_delay_ms: u64,
    /// Pause between per-rating passes (milliseconds)
    pub star_pass_delay_ms: u64,
    /// Override the upstream origin (`https://<host>`) for all requests.
    /// Intended for tests and alternate mirrors; `None` uses the mirror
    /// host parsed from the organization URL.
    pub base_url: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            request_timeout_secs: 20,
            fetch_budget_secs: 480,
            page_delay_ms: 500,
            star_pass_delay_ms: 2000,
            base_url: None,
        }
    }
}

/// Captcha solving service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// API key for the solving service; `None` makes every challenge fail
    /// immediately
    pub api_key: Option<String>,
    /// Base URL of the solving service
    pub api_url: String,
    /// Interval between solution polls (milliseconds)
    pub poll_interval_ms: u64,
    /// Upper bound on one solve attempt (seconds); further capped by the
    /// remaining global fetch budget
    pub poll_budget_secs: u64,
    /// Wait after a failed challenge before retrying the page (milliseconds)
    pub retry_delay_ms: u64,
    /// Maximum challenge retries within one endpoint pass
    pub max_retries: u32,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_CAPTCHA_API_URL.to_string(),
            poll_interval_ms: 5000,
            poll_budget_secs: 120,
            retry_delay_ms: 5000,
            max_retries: 5,
        }
    }
}

/// Sync coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// TTL of the per-source named lock (seconds)
    pub lock_ttl_secs: u64,
    /// Delay between sources during a batch sync (milliseconds)
    pub between_sources_delay_ms: u64,
    /// Redis connection URL for the distributed lock; `None` falls back to
    /// the in-process backend
    pub redis_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 300,
            between_sources_delay_ms: 2000,
            redis_url: None,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Defaults overlaid with the deployment environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(proxies) = std::env::var("YANDEX_PROXIES") {
            config.fetch.proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(key) = std::env::var("CAPTCHA_API_KEY") {
            if !key.trim().is_empty() {
                config.captcha.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(api_url) = std::env::var("CAPTCHA_API_URL") {
            if !api_url.trim().is_empty() {
                config.captcha.api_url = api_url.trim().to_string();
            }
        }

        config
    }

    /// Validate all fields, collecting every error into one message
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        for proxy in &self.fetch.proxies {
            if url::Url::parse(proxy).is_err() {
                errors.push(format!("invalid proxy URL: {proxy}"));
            }
        }
        if self.fetch.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        if self.fetch.fetch_budget_secs == 0 {
            errors.push("fetch_budget_secs must be positive".to_string());
        }
        if let Some(base) = &self.fetch.base_url {
            if url::Url::parse(base).is_err() {
                errors.push(format!("invalid base_url: {base}"));
            }
        }

        if !self.captcha.api_url.starts_with("http://")
            && !self.captcha.api_url.starts_with("https://")
        {
            errors.push(format!(
                "captcha api_url must carry a scheme: {}",
                self.captcha.api_url
            ));
        }
        if self.captcha.poll_interval_ms == 0 {
            errors.push("captcha poll_interval_ms must be positive".to_string());
        }

        if self.sync.lock_ttl_secs == 0 {
            errors.push("lock_ttl_secs must be positive".to_string());
        }
        if let Some(redis_url) = &self.sync.redis_url {
            if url::Url::parse(redis_url).is_err() {
                errors.push(format!("invalid redis_url: {redis_url}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
