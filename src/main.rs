//! Ledge curation service: binary entrypoint.
//! Opens the datastore, seeds sources, and serves the trigger endpoints.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ledge_curator::config::sources::{load_sources_default, load_sources_from};
use ledge_curator::config::AppConfig;
use ledge_curator::metrics::Metrics;
use ledge_curator::scheduler::{spawn_scheduler, SchedulerCfg};
use ledge_curator::store::{seed_sources, DynStore, SqliteStore};
use ledge_curator::{router, AppState, Pipeline};

/// Compact logs by default, JSON lines when LOG_FORMAT=json.
/// Uses try_init: the host runtime may already have installed a subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ledge_curator=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    tracing::info!(
        database = %cfg.server.database_path,
        threshold = cfg.pipeline.relevance_threshold,
        secrets = ?cfg.secrets,
        "configuration loaded"
    );

    let store: DynStore = Arc::new(SqliteStore::open(&cfg.server.database_path).await?);

    let seeds = match cfg.server.sources_path.as_deref() {
        Some(p) => load_sources_from(Path::new(p))?,
        None => load_sources_default()?,
    };
    let seeded = seed_sources(store.as_ref(), &seeds)
        .await
        .context("seeding feed sources")?;
    tracing::info!(seeded, "feed sources seeded");

    let pipeline = Arc::new(Pipeline::from_config(&cfg, store)?);

    if let Some(interval_secs) = cfg.server.schedule_interval_secs {
        tracing::info!(interval_secs, "in-process scheduler enabled");
        spawn_scheduler(SchedulerCfg { interval_secs }, pipeline.clone());
    }

    let mut app = router(AppState::new(pipeline, cfg.secrets.clone()));
    match Metrics::init() {
        Ok(metrics) => app = app.merge(metrics.router()),
        Err(e) => tracing::warn!(error = %e, "prometheus recorder not installed; /metrics disabled"),
    }

    Ok(app.into())
}
