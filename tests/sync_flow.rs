//! End-to-end sync scenarios against a local mock upstream
//!
//! Each test stands up an axum server playing the mapping service (and,
//! where needed, the captcha solver), points the engine at it through the
//! origin override, and checks what lands in an in-memory SQLite store.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use otzyvy::config::EngineConfig;
use otzyvy::scrape::ReviewFetcher;
use otzyvy::store::{materializer, Store};
use otzyvy::sync::{SyncCoordinator, SyncLock};
use otzyvy::types::{FetchResult, RawReview};
use otzyvy::SyncError;

const SOURCE_URL: &str = "https://yandex.ru/maps/org/samoye_populyarnoye_kafe/1010501395/reviews/";
const PAGE_ROUTE: &str = "/maps/org/samoye_populyarnoye_kafe/1010501395/reviews/";

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

async fn memory_store() -> Store {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    // One connection only: each pooled connection would otherwise see its
    // own private in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let store = Store::new(pool);
    store.ensure_schema().await.unwrap();
    store
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn engine_config(base: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.fetch.base_url = Some(base.to_string());
    config.fetch.page_delay_ms = 0;
    config.fetch.star_pass_delay_ms = 0;
    config.fetch.fetch_budget_secs = 30;
    config.sync.between_sources_delay_ms = 0;
    config
}

async fn org_page() -> Html<&'static str> {
    Html(
        r#"<html><head><script>var config = {"csrfToken":"csrf-test","sessionId":"1712000000000_111"};</script></head>
        <body><h1 class="orgpage-header-view__header">Самое популярное кафе</h1></body></html>"#,
    )
}

fn review_objects(ids: std::ops::RangeInclusive<i64>) -> Vec<Value> {
    ids.map(|i| {
        json!({
            "reviewId": format!("r-{i}"),
            "author": {"name": format!("Автор {i}")},
            "rating": (i % 5) + 1,
            "text": format!("Отзыв номер {i}, всё понравилось"),
            "updatedTime": 1_704_067_200 + i,
        })
    })
    .collect()
}

/// Slice an inclusive id range into 50-review pages
fn page_of(ids: std::ops::RangeInclusive<i64>, page: i64) -> Vec<Value> {
    let (first, last) = (*ids.start(), *ids.end());
    let start = first + (page - 1) * 50;
    if start > last {
        return Vec::new();
    }
    let end = (start + 49).min(last);
    review_objects(start..=end)
}

fn page_param(q: &HashMap<String, String>) -> i64 {
    q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1)
}

// ---------------------------------------------------------------------
// Scenario: happy path over a single endpoint
// ---------------------------------------------------------------------

#[tokio::test]
async fn happy_path_single_endpoint() {
    let fetch = get(|Query(q): Query<HashMap<String, String>>| async move {
        let page = page_param(&q);
        Json(json!({
            "reviews": page_of(1..=137, page),
            "totalCount": 137,
            "rating": {"value": 4.5},
            "businessName": "Самое популярное кафе",
        }))
    });
    let app = Router::new()
        .route(PAGE_ROUTE, get(org_page))
        .route("/maps/api/business/fetchReviews", fetch);
    let base = serve(app).await;

    let store = memory_store().await;
    let source = store.create_source(1, SOURCE_URL).await.unwrap();
    let mut coordinator = SyncCoordinator::new(store.clone(), engine_config(&base)).unwrap();

    let updated = coordinator.sync_reviews(&source).await.unwrap();

    assert_eq!(updated.total_reviews, 137);
    assert_eq!(store.review_count(source.id).await.unwrap(), 137);
    assert_eq!(updated.rating, Some(4.5));
    assert_eq!(
        updated.organization_name.as_deref(),
        Some("Самое популярное кафе")
    );
    assert!(updated.last_synced_at.is_some());

    // Stored rows carry their upstream ids exactly once
    let reviews = store.reviews_for_source(source.id).await.unwrap();
    let mut ids: Vec<String> = reviews.into_iter().filter_map(|r| r.yandex_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 137);
}

// ---------------------------------------------------------------------
// Scenario: merge across sort orders of one endpoint
// ---------------------------------------------------------------------

#[tokio::test]
async fn cross_sort_merge_combines_overlapping_subsets() {
    let fetch = get(|Query(q): Query<HashMap<String, String>>| async move {
        let page = page_param(&q);
        match q.get("ranking").map(String::as_str) {
            Some("by_time") => Json(json!({
                "reviews": page_of(1..=400, page),
                "totalCount": 600,
            })),
            Some("by_rating") => Json(json!({
                "reviews": page_of(300..=700, page),
                "totalCount": 700,
            })),
            _ => Json(json!({"reviews": []})),
        }
    });
    let app = Router::new()
        .route(PAGE_ROUTE, get(org_page))
        .route("/maps/api/business/fetchReviews", fetch);
    let base = serve(app).await;

    let store = memory_store().await;
    let source = store.create_source(1, SOURCE_URL).await.unwrap();
    let mut coordinator = SyncCoordinator::new(store.clone(), engine_config(&base)).unwrap();

    let updated = coordinator.sync_reviews(&source).await.unwrap();

    assert_eq!(updated.total_reviews, 700, "merged set covers ids 1..=700");
    assert_eq!(store.review_count(source.id).await.unwrap(), 700);
}

// ---------------------------------------------------------------------
// Scenario: per-rating fan-out around the unfiltered cap
// ---------------------------------------------------------------------

#[tokio::test]
async fn rating_filter_fanout_bypasses_result_cap() {
    // Unfiltered queries surface only 600 of 1500; each star bucket holds
    // a disjoint slice of the remainder.
    let fetch = get(|Query(q): Query<HashMap<String, String>>| async move {
        let page = page_param(&q);
        if let Some(stars) = q.get("rating").and_then(|r| r.parse::<i64>().ok()) {
            let first = 600 + (stars - 1) * 180 + 1;
            let last = 600 + stars * 180;
            return Json(json!({
                "reviews": page_of(first..=last, page),
                "totalCount": 1500,
            }));
        }
        Json(json!({
            "reviews": page_of(1..=600, page),
            "totalCount": 1500,
        }))
    });
    let app = Router::new()
        .route(PAGE_ROUTE, get(org_page))
        .route("/maps/api/business/fetchReviews", fetch.clone())
        .route("/maps/api/business/getBusinessReviews", fetch.clone())
        .route("/maps-reviews-widget/fetchReviews", fetch);
    let base = serve(app).await;

    let store = memory_store().await;
    let source = store.create_source(1, SOURCE_URL).await.unwrap();
    let mut coordinator = SyncCoordinator::new(store.clone(), engine_config(&base)).unwrap();

    let updated = coordinator.sync_reviews(&source).await.unwrap();

    assert_eq!(updated.total_reviews, 1500);
    assert_eq!(store.review_count(source.id).await.unwrap(), 1500);
}

// ---------------------------------------------------------------------
// Scenario: a dead upstream never destroys local data
// ---------------------------------------------------------------------

#[tokio::test]
async fn failing_upstream_preserves_existing_reviews() {
    let failing = || async { axum::http::StatusCode::INTERNAL_SERVER_ERROR };
    let app = Router::new()
        .route(PAGE_ROUTE, get(failing))
        .route("/maps/api/csrf-token", get(failing))
        .route("/maps/api/business/fetchReviews", get(failing))
        .route("/maps/api/business/getBusinessReviews", get(failing))
        .route("/maps-reviews-widget/fetchReviews", get(failing));
    let base = serve(app).await;

    let store = memory_store().await;
    let source = store.create_source(1, SOURCE_URL).await.unwrap();

    // 42 reviews already on disk from an earlier, healthier sync
    let seeded = FetchResult {
        reviews: (1..=42)
            .map(|i| RawReview {
                yandex_id: Some(format!("old-{i}")),
                author: format!("Автор {i}"),
                rating: Some(4),
                text: Some(format!("Старый отзыв {i}")),
                ..RawReview::default()
            })
            .collect(),
        ..FetchResult::default()
    };
    let seeded_source = materializer::materialize_full(&store, &source, &seeded)
        .await
        .unwrap();
    assert_eq!(seeded_source.total_reviews, 42);

    let mut config = engine_config(&base);
    config.fetch.fetch_budget_secs = 2;
    let mut coordinator = SyncCoordinator::new(store.clone(), config).unwrap();

    let after = coordinator.sync_reviews(&seeded_source).await.unwrap();

    assert_eq!(store.review_count(source.id).await.unwrap(), 42);
    assert_eq!(after.total_reviews, 42);
    assert!(after.last_synced_at.is_some());
    assert!(after.last_synced_at >= seeded_source.last_synced_at);
}

// ---------------------------------------------------------------------
// Scenario: captcha detection, external solve, retry with the token
// ---------------------------------------------------------------------

#[tokio::test]
async fn captcha_is_solved_and_page_retried() {
    let challenged = Arc::new(AtomicBool::new(false));
    let answer_accepted = Arc::new(AtomicBool::new(false));

    let fetch = {
        let challenged = Arc::clone(&challenged);
        let answer_accepted = Arc::clone(&answer_accepted);
        get(move |Query(q): Query<HashMap<String, String>>| {
            let challenged = Arc::clone(&challenged);
            let answer_accepted = Arc::clone(&answer_accepted);
            async move {
                if let Some(answer) = q.get("captchaAnswer") {
                    assert_eq!(answer, "TKN");
                    answer_accepted.store(true, Ordering::SeqCst);
                } else if !challenged.swap(true, Ordering::SeqCst) {
                    return Json(json!({
                        "captchaRequired": true,
                        "key": "xyz",
                        "captchaType": "smart",
                    }));
                }
                Json(json!({
                    "reviews": page_of(1..=50, page_param(&q)),
                    "totalCount": 50,
                }))
            }
        })
    };
    let app = Router::new()
        .route(PAGE_ROUTE, get(org_page))
        .route("/maps/api/business/fetchReviews", fetch)
        .route(
            "/in.php",
            post(|| async { Json(json!({"status": 1, "request": "task-42"})) }),
        )
        .route(
            "/res.php",
            get(|| async { Json(json!({"status": 1, "request": "TKN"})) }),
        );
    let base = serve(app).await;

    let mut config = engine_config(&base);
    config.captcha.api_key = Some("test-key".to_string());
    config.captcha.api_url = base.clone();
    config.captcha.poll_interval_ms = 10;
    config.captcha.retry_delay_ms = 0;

    let mut fetcher = ReviewFetcher::new(config);
    let result = fetcher.fetch_reviews(SOURCE_URL).await.unwrap();

    assert_eq!(result.reviews.len(), 50);
    assert_eq!(result.stats.captchas_seen, 1);
    assert_eq!(result.stats.captchas_solved, 1);
    assert!(answer_accepted.load(Ordering::SeqCst), "retry must carry captchaAnswer");
}

// ---------------------------------------------------------------------
// Scenario: concurrent syncs of one source contend on the lock
// ---------------------------------------------------------------------

#[tokio::test]
async fn concurrent_syncs_share_one_lock() {
    let fetch = get(|Query(q): Query<HashMap<String, String>>| async move {
        Json(json!({
            "reviews": page_of(1..=1, page_param(&q)),
            "totalCount": 1,
        }))
    });
    let slow_page = get(|| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        org_page().await
    });
    let app = Router::new()
        .route(PAGE_ROUTE, slow_page)
        .route("/maps/api/business/fetchReviews", fetch);
    let base = serve(app).await;

    let store = memory_store().await;
    let source = store.create_source(7, SOURCE_URL).await.unwrap();

    let lock = SyncLock::in_memory();
    let mut first =
        SyncCoordinator::with_lock(store.clone(), engine_config(&base), lock.clone());
    let mut second =
        SyncCoordinator::with_lock(store.clone(), engine_config(&base), lock.clone());

    let source_for_task = source.clone();
    let running = tokio::spawn(async move { first.sync_reviews(&source_for_task).await });

    // Give the first sync time to take the lock and stall on the slow page
    tokio::time::sleep(Duration::from_millis(100)).await;
    let contended = second.sync_new_reviews(&source).await.unwrap_err();
    assert!(matches!(contended, SyncError::AlreadyRunning));

    let first_outcome = running.await.unwrap().unwrap();
    assert_eq!(first_outcome.total_reviews, 1);

    // Lock is free again: the same coordinator may now sync
    let third = second.sync_reviews(&source).await.unwrap();
    assert_eq!(third.total_reviews, 1);
}

// ---------------------------------------------------------------------
// Batch sync across sources
// ---------------------------------------------------------------------

#[tokio::test]
async fn batch_sync_reports_per_source_outcomes() {
    let fetch = get(|Query(q): Query<HashMap<String, String>>| async move {
        Json(json!({
            "reviews": page_of(1..=3, page_param(&q)),
            "totalCount": 3,
        }))
    });
    let app = Router::new()
        .route(PAGE_ROUTE, get(org_page))
        .route("/maps/api/business/fetchReviews", fetch);
    let base = serve(app).await;

    let store = memory_store().await;
    let healthy = store.create_source(1, SOURCE_URL).await.unwrap();
    // A source whose URL carries no organization id at all
    let broken = store
        .create_source(1, "https://example.com/not-a-map")
        .await
        .unwrap();

    let mut config = engine_config(&base);
    config.fetch.fetch_budget_secs = 5;
    let mut coordinator = SyncCoordinator::new(store.clone(), config).unwrap();

    let outcomes = coordinator.sync_all_sources(false).await;
    assert_eq!(outcomes.len(), 2);

    let healthy_outcome = outcomes.iter().find(|o| o.source_id == healthy.id).unwrap();
    assert_eq!(healthy_outcome.result.as_ref().unwrap().total_reviews, 3);

    let broken_outcome = outcomes.iter().find(|o| o.source_id == broken.id).unwrap();
    assert!(matches!(
        broken_outcome.result,
        Err(SyncError::InvalidUrl(_))
    ));
}
