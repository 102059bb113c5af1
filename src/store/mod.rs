// src/store/mod.rs
//! Datastore seam. Every persistence operation is one atomic call; nothing
//! spans stages, so progress inside a run is durable as soon as it happens.
pub mod memory;
pub mod sqlite;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::sources::SourceSeed;
use crate::model::{
    ArticleCandidate, BatchRun, Classification, CuratedArticle, NewCuratedArticle, RawArticle,
    Source,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("no {table} row with id {id}")]
    NotFound { table: &'static str, id: i64 },

    #[error("url already stored: {0}")]
    DuplicateUrl(String),
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // --- sources ---
    async fn active_sources(&self) -> Result<Vec<Source>, StoreError>;
    /// Insert or update by feed URL; returns the source id.
    async fn upsert_source(&self, name: &str, feed_url: &str, active: bool) -> Result<i64, StoreError>;

    // --- raw articles ---
    /// Which of `urls` are already present. One round trip regardless of input size.
    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError>;
    /// Store candidates unprocessed, in input order.
    async fn insert_raw_articles(&self, items: &[ArticleCandidate]) -> Result<Vec<RawArticle>, StoreError>;
    async fn mark_processed(&self, raw_id: i64) -> Result<(), StoreError>;
    async fn raw_articles(&self) -> Result<Vec<RawArticle>, StoreError>;

    // --- classifications ---
    async fn insert_classification(&self, raw_id: i64, c: &Classification) -> Result<(), StoreError>;
    async fn classification_for(&self, raw_id: i64) -> Result<Option<Classification>, StoreError>;

    // --- curated ---
    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError>;
    async fn insert_curated(&self, article: &NewCuratedArticle) -> Result<i64, StoreError>;
    async fn curated_articles(&self) -> Result<Vec<CuratedArticle>, StoreError>;

    // --- batch log ---
    /// New run row in `running` state.
    async fn create_run(&self, started_at: DateTime<Utc>) -> Result<i64, StoreError>;
    /// Write the final status, counts and error log of `run.id`.
    async fn finalize_run(&self, run: &BatchRun) -> Result<(), StoreError>;
    async fn latest_run(&self) -> Result<Option<BatchRun>, StoreError>;
}

pub type DynStore = Arc<dyn Store>;

/// Upsert every seed by feed URL; returns how many were written.
pub async fn seed_sources(store: &dyn Store, seeds: &[SourceSeed]) -> Result<usize, StoreError> {
    for seed in seeds {
        store.upsert_source(&seed.name, &seed.feed_url, seed.active).await?;
    }
    Ok(seeds.len())
}
