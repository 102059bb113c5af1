// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Finished pipeline runs, by status.");
        describe_counter!("ingest_items_total", "Feed items kept after normalization.");
        describe_counter!("ingest_source_errors_total", "Sources that failed to fetch or parse.");
        describe_counter!("dedup_skipped_total", "Candidates dropped because their URL was already stored.");
        describe_counter!(
            "classify_parse_errors_total",
            "Classifier replies that could not be parsed into a verdict."
        );
        describe_counter!(
            "editorial_skipped_total",
            "Accepted articles for which no commentary could be produced."
        );
        describe_counter!("curated_articles_total", "Curated articles written.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last finished a run.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
