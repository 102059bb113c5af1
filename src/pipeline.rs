// src/pipeline.rs
//! Batch Orchestrator: ingest → dedup → persist raw → classify → gate →
//! generate → persist curated, then finalize the run record on every exit path.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::classify::Classifier;
use crate::config::{AppConfig, PipelineSettings};
use crate::dedup::deduplicate;
use crate::editorial::EditorialGenerator;
use crate::error::PipelineError;
use crate::ingest::feed::{FeedFetcher, HttpFeedFetcher};
use crate::ingest::FeedIngestor;
use crate::llm::{AnthropicClient, DynLlmClient};
use crate::model::{
    BatchRun, Classification, NewCuratedArticle, PublishStatus, RawArticle, RunStats, RunStatus,
};
use crate::slug::unique_slug;
use crate::store::DynStore;

pub const NO_NEW_ARTICLES: &str = "No new articles";

/// What the trigger endpoints return for a run that did not fail.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    #[serde(flatten)]
    pub stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// State threaded through the stages of one run.
#[derive(Debug)]
struct RunContext {
    run_id: Option<i64>,
    started_at: DateTime<Utc>,
    stats: RunStats,
    message: Option<String>,
}

struct Classified<'a> {
    raw: &'a RawArticle,
    source_name: &'a str,
    verdict: Classification,
}

pub struct Pipeline {
    store: DynStore,
    ingestor: FeedIngestor,
    classifier: Classifier,
    generator: EditorialGenerator,
    settings: PipelineSettings,
    // held for the whole run; one run per process at a time
    gate: Mutex<()>,
}

impl Pipeline {
    pub fn new(store: DynStore, fetcher: Arc<dyn FeedFetcher>, llm: DynLlmClient, cfg: &AppConfig) -> Self {
        let settings = cfg.pipeline.clone();
        Self {
            store,
            ingestor: FeedIngestor::new(fetcher, settings.items_per_source, settings.lead_max_chars),
            classifier: Classifier::new(llm.clone(), &cfg.llm),
            generator: EditorialGenerator::new(llm, &cfg.llm),
            settings,
            gate: Mutex::new(()),
        }
    }

    /// Production wiring: HTTP feed fetcher + Anthropic client.
    pub fn from_config(cfg: &AppConfig, store: DynStore) -> anyhow::Result<Self> {
        let fetcher = HttpFeedFetcher::new(
            &cfg.pipeline.user_agent,
            Duration::from_secs(cfg.pipeline.feed_timeout_secs),
        )?;
        let llm = AnthropicClient::new(&cfg.llm, cfg.secrets.anthropic_api_key.clone())?;
        Ok(Self::new(store, Arc::new(fetcher), Arc::new(llm), cfg))
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Execute one run. Returns `AlreadyRunning` without touching the store when
    /// another run holds the gate.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let _guard = self.gate.try_lock().map_err(|_| PipelineError::AlreadyRunning)?;
        crate::metrics::ensure_described();

        let started_at = Utc::now();
        let run_id = match self.store.create_run(started_at).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not create batch_log row; continuing without run record");
                None
            }
        };
        info!(run_id = ?run_id, "pipeline run started");

        let mut ctx = RunContext {
            run_id,
            started_at,
            stats: RunStats::default(),
            message: None,
        };

        let outcome = self.execute(&mut ctx).await;

        // finally: the run record is closed on every path
        let (status, error_log) = match &outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => {
                ctx.stats.errors.push(e.to_string());
                (RunStatus::Failed, Some(e.to_string()))
            }
        };
        self.finalize(&ctx, status, error_log).await;

        counter!("pipeline_runs_total", "status" => status.as_str()).increment(1);
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);

        match outcome {
            Ok(()) => {
                info!(
                    run_id = ?ctx.run_id,
                    fetched = ctx.stats.articles_fetched,
                    classified = ctx.stats.articles_classified,
                    passed = ctx.stats.articles_passed,
                    curated = ctx.stats.articles_curated,
                    "pipeline run completed"
                );
                Ok(RunReport {
                    success: true,
                    run_id: ctx.run_id,
                    stats: ctx.stats,
                    message: ctx.message,
                })
            }
            Err(e) => {
                error!(run_id = ?ctx.run_id, error = %e, "pipeline run failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        // 1) ingest + dedup
        let sources = self.store.active_sources().await?;
        let ingested = self.ingestor.ingest(&sources).await;
        ctx.stats.articles_fetched = ingested.candidates.len();
        info!(
            sources = sources.len(),
            failed_sources = ingested.failed_sources.len(),
            fetched = ctx.stats.articles_fetched,
            "feeds ingested"
        );

        let fresh = deduplicate(self.store.as_ref(), ingested.candidates).await?;
        info!(
            new = fresh.len(),
            duplicates = ctx.stats.articles_fetched - fresh.len(),
            "deduplicated"
        );
        if fresh.is_empty() {
            info!("no new articles to process");
            ctx.message = Some(NO_NEW_ARTICLES.to_string());
            return Ok(());
        }

        // 2) cap + persist raw
        let total_new = fresh.len();
        let batch: Vec<_> = fresh.into_iter().take(self.settings.batch_size).collect();
        info!(processing = batch.len(), total_new, "processing batch");
        let stored = self.store.insert_raw_articles(&batch).await?;
        let source_names: HashMap<&str, &str> = batch
            .iter()
            .map(|c| (c.url.as_str(), c.source_name.as_str()))
            .collect();

        // 3) classify, in fetch order
        let mut classified: Vec<Classified<'_>> = Vec::with_capacity(stored.len());
        for (i, raw) in stored.iter().enumerate() {
            let source_name = source_names.get(raw.url.as_str()).copied().unwrap_or("Unknown");
            let verdict = match self.classifier.classify(source_name, raw).await {
                Ok(v) => v,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(url = %raw.url, error = %e, "classification request failed");
                    ctx.stats.errors.push(format!("classify {}: {e}", raw.url));
                    Classification::placeholder(format!("Request failed: {e}"))
                }
            };

            self.store.insert_classification(raw.id, &verdict).await?;
            self.store.mark_processed(raw.id).await?;
            ctx.stats.articles_classified += 1;
            classified.push(Classified {
                raw,
                source_name,
                verdict,
            });

            if i + 1 < stored.len() {
                pause(self.settings.classify_delay_ms).await;
            }
        }

        // 4) relevance gate
        let threshold = self.settings.relevance_threshold;
        let passed: Vec<&Classified<'_>> = classified.iter().filter(|c| c.verdict.passes(threshold)).collect();
        ctx.stats.articles_passed = passed.len();
        info!(passed = passed.len(), threshold, "relevance gate applied");

        // 5) generate + persist curated, in classification order
        for (i, item) in passed.iter().enumerate() {
            self.curate(ctx, item).await?;
            if i + 1 < passed.len() {
                pause(self.settings.generate_delay_ms).await;
            }
        }
        Ok(())
    }

    async fn curate(&self, ctx: &mut RunContext, item: &Classified<'_>) -> Result<(), PipelineError> {
        let Some(primary) = item.verdict.primary else {
            return Ok(());
        };
        let raw = item.raw;

        let commentary = match self.generator.generate(item.source_name, raw, &item.verdict).await {
            Ok(Some(c)) => c,
            Ok(None) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(url = %raw.url, error = %e, "leadership angle request failed; skipping article");
                counter!("editorial_skipped_total").increment(1);
                ctx.stats.errors.push(format!("generate {}: {e}", raw.url));
                return Ok(());
            }
        };

        let slug = unique_slug(self.store.as_ref(), &raw.title, &raw.url).await?;
        let article = NewCuratedArticle {
            raw_article_id: raw.id,
            title: raw.title.clone(),
            lead: raw.lead.clone(),
            source_name: item.source_name.to_string(),
            article_url: raw.url.clone(),
            image_url: raw.image_url.clone(),
            published_at: raw.published_at,
            primary,
            related: item.verdict.related.clone(),
            relevance: item.verdict.relevance,
            leadership_angle: commentary.leadership_angle,
            data_source: commentary.data_source,
            tone_check: commentary.tone_check,
            tags: commentary.tags,
            slug,
            status: PublishStatus::Published,
        };
        self.store.insert_curated(&article).await?;

        ctx.stats.articles_curated += 1;
        counter!("curated_articles_total").increment(1);
        if !article.data_source.is_empty() {
            ctx.stats.used_data_sources.push(article.data_source);
        }
        Ok(())
    }

    async fn finalize(&self, ctx: &RunContext, status: RunStatus, error_log: Option<String>) {
        let Some(id) = ctx.run_id else {
            warn!(status = status.as_str(), "no run record to finalize");
            return;
        };
        let run = BatchRun {
            id,
            started_at: ctx.started_at,
            finished_at: Some(Utc::now()),
            status,
            stats: ctx.stats.clone(),
            error_log,
        };
        if let Err(e) = self.store.finalize_run(&run).await {
            warn!(run_id = id, error = %e, "failed to finalize batch_log row");
        }
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
