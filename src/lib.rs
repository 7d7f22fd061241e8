//! Otzyvy: review acquisition engine for organization pages on Yandex Maps
//!
//! Turns an organization URL into a complete, deduplicated set of reviews in
//! a local relational store, in the presence of an adversarial upstream:
//! - Multi-strategy extraction (internal JSON endpoints, embedded page state,
//!   DOM fallback), each tolerating response-shape drift
//! - Request signing reverse-engineered from the upstream client
//! - Pagination fan-out across endpoints, sort orders, and per-rating
//!   filters to bypass the upstream's per-query result cap
//! - Session, cookie, proxy, and User-Agent rotation with captcha solving
//! - A global fetch budget with inner retry and back-off sub-budgets
//! - Two-level deduplication and transactional materialization that never
//!   destroys locally held data when the upstream yields nothing

pub mod config;
pub mod error;
pub mod scrape;
pub mod store;
pub mod sync;
pub mod types;

pub use config::EngineConfig;
pub use error::SyncError;
pub use scrape::org_url::{parse_org_url, parse_organization_id};
pub use types::{FetchResult, MirrorHost, RawReview, Review, Source};
