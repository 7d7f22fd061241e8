//! Anti-bot challenge solving via an external service
//!
//! Speaks the rucaptcha-compatible protocol: POST the sitekey to `in.php`,
//! then poll `res.php` for the solved token. Every failure mode collapses
//! to `None`; the orchestrator decides whether to rotate identity and retry
//! or to end the pass.

use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::CaptchaConfig;
use crate::scrape::Deadline;

/// A challenge detected in an endpoint payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub sitekey: String,
    pub captcha_type: Option<String>,
}

impl CaptchaChallenge {
    /// Detect a challenge in a JSON payload: `captchaRequired: true` or
    /// `type: "captcha"`. The sitekey is taken from the first of
    /// `key`/`sitekey`/`captchaKey`/`data-sitekey`, looked up both at the
    /// top level and under a `captcha` object.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let required = payload
            .get("captchaRequired")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || payload.get("type").and_then(Value::as_str) == Some("captcha");
        if !required {
            return None;
        }

        let nested = payload.get("captcha");
        let sitekey = ["key", "sitekey", "captchaKey", "data-sitekey"]
            .iter()
            .find_map(|k| {
                payload
                    .get(*k)
                    .or_else(|| nested.and_then(|n| n.get(*k)))
                    .and_then(Value::as_str)
            })?
            .to_string();

        let captcha_type = payload
            .get("captchaType")
            .or_else(|| nested.and_then(|n| n.get("captchaType")))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self { sitekey, captcha_type })
    }
}

/// Client for the external solving service
pub struct CaptchaSolver {
    config: CaptchaConfig,
    client: reqwest::Client,
}

impl CaptchaSolver {
    pub fn new(config: CaptchaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Maximum challenge retries within one endpoint pass
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Wait applied after a failed challenge before retrying the page
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }

    /// Submit a challenge and poll for the token. The poll budget is the
    /// configured cap further bounded by the remaining global deadline.
    /// `None` on missing API key, solver errors, or budget exhaustion.
    pub async fn solve(
        &self,
        challenge: &CaptchaChallenge,
        page_url: &str,
        deadline: &Deadline,
    ) -> Option<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            warn!("captcha encountered but no CAPTCHA_API_KEY is configured");
            return None;
        };

        let method = solver_method(challenge.captcha_type.as_deref(), page_url);
        let key_param = if method == "yandex" { "sitekey" } else { "googlekey" };

        let submit_url = format!("{}/in.php", self.config.api_url.trim_end_matches('/'));
        let form: [(&str, &str); 5] = [
            ("key", api_key),
            ("method", method),
            (key_param, challenge.sitekey.as_str()),
            ("pageurl", page_url),
            ("json", "1"),
        ];

        let response = match self.client.post(&submit_url).form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("captcha submit failed: {}", e);
                return None;
            }
        };
        let envelope: Value = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("captcha submit returned unparseable body: {}", e);
                return None;
            }
        };
        if envelope.get("status").and_then(Value::as_i64) != Some(1) {
            warn!("captcha submit rejected: {}", envelope);
            return None;
        }
        let task_id = envelope.get("request").and_then(Value::as_str)?.to_string();
        debug!("captcha task {} submitted ({})", task_id, method);

        let poll_budget = Duration::from_secs(self.config.poll_budget_secs).min(deadline.remaining());
        let poll_deadline = Deadline::new(poll_budget);
        let poll_url = format!("{}/res.php", self.config.api_url.trim_end_matches('/'));

        while !poll_deadline.is_timed_out() && !deadline.is_timed_out() {
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;

            let query: [(&str, &str); 4] = [
                ("key", api_key),
                ("action", "get"),
                ("id", task_id.as_str()),
                ("json", "1"),
            ];
            let response = match self.client.get(&poll_url).query(&query).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("captcha poll failed: {}", e);
                    return None;
                }
            };
            let envelope: Value = match response.json().await {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("captcha poll returned unparseable body: {}", e);
                    return None;
                }
            };

            let status = envelope.get("status").and_then(Value::as_i64).unwrap_or(0);
            let request = envelope.get("request").and_then(Value::as_str).unwrap_or("");
            if status == 1 {
                debug!("captcha task {} solved", task_id);
                return Some(request.to_string());
            }
            if request != "CAPCHA_NOT_READY" {
                warn!("captcha task {} failed: {}", task_id, request);
                return None;
            }
        }

        warn!("captcha task {} timed out", task_id);
        None
    }
}

/// `yandex` for SmartCaptcha, `userrecaptcha` otherwise
fn solver_method(captcha_type: Option<&str>, page_url: &str) -> &'static str {
    let type_lower = captcha_type.unwrap_or("").to_ascii_lowercase();
    if type_lower.contains("smart") || page_url.contains("yandex") {
        "yandex"
    } else {
        "userrecaptcha"
    }
}
