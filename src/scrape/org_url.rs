//! Organization URL parsing
//!
//! Pulls the organization id, slug, and mirror host out of whatever URL
//! shape a user pastes. Never touches the network and never panics on
//! malformed input; callers map `None` to a validation error.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::MirrorHost;

/// Recognized path form `/org/<slug>/<digits>`
static ORG_SLUG_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/org/([^/?#]+)/(\d{5,})").expect("static pattern")
});

/// Recognized path form `/org/<digits>`
static ORG_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/org/(\d{5,})").expect("static pattern"));

/// `oid=<digits>` anywhere in the string
static OID_ANYWHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"oid=(\d{5,})").expect("static pattern"));

/// Successfully parsed organization URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOrgUrl {
    /// Upstream organization id: digits, at least five of them
    pub org_id: String,
    pub host: MirrorHost,
    pub slug: Option<String>,
}

/// Parse an organization URL into its id, slug, and mirror host.
///
/// Formats are tried in order: a bare id, `/org/<slug>/<digits>`,
/// `/org/<digits>`, an `oid` query parameter, and finally an `oid=<digits>`
/// substring anywhere. The host tag defaults to `ru` when the URL carries
/// neither mirror.
pub fn parse_org_url(input: &str) -> Option<ParsedOrgUrl> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let host = url::Url::parse(trimmed)
        .ok()
        .and_then(|u| u.host_str().and_then(MirrorHost::from_hostname))
        .unwrap_or_default();

    // Already just an id. Keeps parse(parse(url)) stable.
    if trimmed.len() >= 5 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Some(ParsedOrgUrl {
            org_id: trimmed.to_string(),
            host,
            slug: None,
        });
    }

    if let Some(caps) = ORG_SLUG_ID.captures(trimmed) {
        return Some(ParsedOrgUrl {
            org_id: caps[2].to_string(),
            host,
            slug: caps.get(1).map(|m| m.as_str().to_string()),
        });
    }

    if let Some(caps) = ORG_ID.captures(trimmed) {
        return Some(ParsedOrgUrl {
            org_id: caps[1].to_string(),
            host,
            slug: None,
        });
    }

    if let Ok(parsed) = url::Url::parse(trimmed) {
        for (key, value) in parsed.query_pairs() {
            if key == "oid" && value.len() >= 5 && value.bytes().all(|b| b.is_ascii_digit()) {
                return Some(ParsedOrgUrl {
                    org_id: value.to_string(),
                    host,
                    slug: None,
                });
            }
        }
    }

    OID_ANYWHERE.captures(trimmed).map(|caps| ParsedOrgUrl {
        org_id: caps[1].to_string(),
        host,
        slug: None,
    })
}

/// The organization id alone, or `None` when the input carries none
pub fn parse_organization_id(input: &str) -> Option<String> {
    parse_org_url(input).map(|parsed| parsed.org_id)
}
