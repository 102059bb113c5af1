// tests/metrics.rs
//
// Installs the global Prometheus recorder (one per test binary), runs the
// pipeline once and checks the exposition.
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use ledge_curator::config::{AppConfig, Secrets};
use ledge_curator::ingest::feed::FixtureFeedFetcher;
use ledge_curator::llm::MockLlm;
use ledge_curator::metrics::Metrics;
use ledge_curator::store::MemoryStore;
use ledge_curator::{router, AppState, Pipeline};

const FEED_URL: &str = "https://alpha.example.com/feed";
const ALPHA: &str = include_str!("fixtures/alpha_rss.xml");

#[tokio::test]
async fn metrics_endpoint_contains_pipeline_series() {
    let metrics = Metrics::init().expect("install recorder");

    let mut cfg = AppConfig::default();
    cfg.pipeline.classify_delay_ms = 0;
    cfg.pipeline.generate_delay_ms = 0;
    let store = Arc::new(MemoryStore::with_sources([("Alpha", FEED_URL)]));
    let fetcher = Arc::new(FixtureFeedFetcher::new().with_feed(FEED_URL, ALPHA));
    let llm = Arc::new(MockLlm::new(|req| {
        Ok(if req.user.starts_with("Classify") {
            r#"{"relevance":7,"primary":"Operator","related":[],"reason":"r","angle_hint":null}"#.to_string()
        } else {
            "not json".to_string()
        })
    }));
    let pipeline = Arc::new(Pipeline::new(store, fetcher, llm, &cfg));
    pipeline.run().await.unwrap();

    let app = router(AppState::new(pipeline, Secrets::default())).merge(metrics.router());
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "pipeline_runs_total{status=\"completed\"} 1",
        "ingest_items_total 5",
        "editorial_skipped_total 5",
        "pipeline_last_run_ts",
    ] {
        assert!(text.contains(needle), "metrics exposition missing '{needle}'\n{text}");
    }
}
