// src/store/memory.rs
//! In-process store used by tests and dry runs. Individual operations can be
//! switched to fail so run-level error handling can be exercised.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{Store, StoreError};
use crate::model::{
    ArticleCandidate, BatchRun, Classification, CuratedArticle, NewCuratedArticle, RawArticle,
    RunStats, RunStatus, Source,
};

/// Operations that can be made to fail with [`MemoryStore::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ActiveSources,
    ExistingUrls,
    InsertRaw,
    MarkProcessed,
    InsertClassification,
    InsertCurated,
    CreateRun,
    FinalizeRun,
}

#[derive(Default)]
struct Inner {
    sources: Vec<Source>,
    raw: Vec<RawArticle>,
    classifications: Vec<(i64, Classification)>,
    curated: Vec<CuratedArticle>,
    runs: Vec<BatchRun>,
    failing: HashSet<StoreOp>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed sources directly (ids assigned in order, starting at 1).
    pub fn with_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut g = store.inner.lock();
            for (name, url) in sources {
                let id = g.sources.len() as i64 + 1;
                g.sources.push(Source {
                    id,
                    name: name.into(),
                    feed_url: url.into(),
                    active: true,
                });
            }
        }
        store
    }

    pub fn fail_on(&self, op: StoreOp) {
        self.inner.lock().failing.insert(op);
    }

    pub fn recover(&self, op: StoreOp) {
        self.inner.lock().failing.remove(&op);
    }

    pub fn runs(&self) -> Vec<BatchRun> {
        self.inner.lock().runs.clone()
    }

    fn check(inner: &Inner, op: StoreOp) -> Result<(), StoreError> {
        if inner.failing.contains(&op) {
            return Err(StoreError::Unavailable(format!("{op:?} failed")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn active_sources(&self) -> Result<Vec<Source>, StoreError> {
        let g = self.inner.lock();
        Self::check(&g, StoreOp::ActiveSources)?;
        Ok(g.sources.iter().filter(|s| s.active).cloned().collect())
    }

    async fn upsert_source(&self, name: &str, feed_url: &str, active: bool) -> Result<i64, StoreError> {
        let mut g = self.inner.lock();
        if let Some(s) = g.sources.iter_mut().find(|s| s.feed_url == feed_url) {
            s.name = name.to_string();
            s.active = active;
            return Ok(s.id);
        }
        let id = g.sources.len() as i64 + 1;
        g.sources.push(Source {
            id,
            name: name.to_string(),
            feed_url: feed_url.to_string(),
            active,
        });
        Ok(id)
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        let g = self.inner.lock();
        Self::check(&g, StoreOp::ExistingUrls)?;
        let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
        Ok(g.raw
            .iter()
            .filter(|r| wanted.contains(r.url.as_str()))
            .map(|r| r.url.clone())
            .collect())
    }

    async fn insert_raw_articles(&self, items: &[ArticleCandidate]) -> Result<Vec<RawArticle>, StoreError> {
        let mut g = self.inner.lock();
        Self::check(&g, StoreOp::InsertRaw)?;

        // all-or-nothing, like a single multi-row INSERT
        let mut seen: HashSet<&str> = g.raw.iter().map(|r| r.url.as_str()).collect();
        for it in items {
            if !seen.insert(it.url.as_str()) {
                return Err(StoreError::DuplicateUrl(it.url.clone()));
            }
        }

        let mut out = Vec::with_capacity(items.len());
        for it in items {
            let raw = RawArticle {
                id: g.raw.len() as i64 + 1,
                source_id: it.source_id,
                title: it.title.clone(),
                lead: it.lead.clone(),
                url: it.url.clone(),
                image_url: it.image_url.clone(),
                published_at: it.published_at,
                processed: false,
            };
            g.raw.push(raw.clone());
            out.push(raw);
        }
        Ok(out)
    }

    async fn mark_processed(&self, raw_id: i64) -> Result<(), StoreError> {
        let mut g = self.inner.lock();
        Self::check(&g, StoreOp::MarkProcessed)?;
        let raw = g
            .raw
            .iter_mut()
            .find(|r| r.id == raw_id)
            .ok_or(StoreError::NotFound { table: "raw_articles", id: raw_id })?;
        raw.processed = true;
        Ok(())
    }

    async fn raw_articles(&self) -> Result<Vec<RawArticle>, StoreError> {
        Ok(self.inner.lock().raw.clone())
    }

    async fn insert_classification(&self, raw_id: i64, c: &Classification) -> Result<(), StoreError> {
        let mut g = self.inner.lock();
        Self::check(&g, StoreOp::InsertClassification)?;
        if g.classifications.iter().any(|(id, _)| *id == raw_id) {
            return Err(StoreError::Unavailable(format!(
                "classification for raw article {raw_id} already exists"
            )));
        }
        g.classifications.push((raw_id, c.clone()));
        Ok(())
    }

    async fn classification_for(&self, raw_id: i64) -> Result<Option<Classification>, StoreError> {
        let g = self.inner.lock();
        Ok(g.classifications
            .iter()
            .find(|(id, _)| *id == raw_id)
            .map(|(_, c)| c.clone()))
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().curated.iter().any(|c| c.article.slug == slug))
    }

    async fn insert_curated(&self, article: &NewCuratedArticle) -> Result<i64, StoreError> {
        let mut g = self.inner.lock();
        Self::check(&g, StoreOp::InsertCurated)?;
        let id = g.curated.len() as i64 + 1;
        g.curated.push(CuratedArticle {
            id,
            article: article.clone(),
        });
        Ok(id)
    }

    async fn curated_articles(&self) -> Result<Vec<CuratedArticle>, StoreError> {
        Ok(self.inner.lock().curated.clone())
    }

    async fn create_run(&self, started_at: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut g = self.inner.lock();
        Self::check(&g, StoreOp::CreateRun)?;
        let id = g.runs.len() as i64 + 1;
        g.runs.push(BatchRun {
            id,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            stats: RunStats::default(),
            error_log: None,
        });
        Ok(id)
    }

    async fn finalize_run(&self, run: &BatchRun) -> Result<(), StoreError> {
        let mut g = self.inner.lock();
        Self::check(&g, StoreOp::FinalizeRun)?;
        let slot = g
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or(StoreError::NotFound { table: "batch_log", id: run.id })?;
        *slot = run.clone();
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<BatchRun>, StoreError> {
        Ok(self.inner.lock().runs.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(url: &str) -> ArticleCandidate {
        ArticleCandidate {
            source_id: 1,
            source_name: "S".into(),
            title: "T".into(),
            lead: String::new(),
            url: url.into(),
            image_url: None,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn existing_urls_reports_only_stored() {
        let store = MemoryStore::new();
        store.insert_raw_articles(&[cand("https://a"), cand("https://b")]).await.unwrap();
        let found = store
            .existing_urls(&["https://b".into(), "https://c".into()])
            .await
            .unwrap();
        assert_eq!(found, HashSet::from(["https://b".to_string()]));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_whole() {
        let store = MemoryStore::new();
        store.insert_raw_articles(&[cand("https://a")]).await.unwrap();
        let err = store
            .insert_raw_articles(&[cand("https://z"), cand("https://a")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUrl(u) if u == "https://a"));
        assert_eq!(store.raw_articles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_op_can_recover() {
        let store = MemoryStore::new();
        store.fail_on(StoreOp::CreateRun);
        assert!(store.create_run(Utc::now()).await.is_err());
        store.recover(StoreOp::CreateRun);
        assert_eq!(store.create_run(Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_source_updates_by_url() {
        let store = MemoryStore::new();
        let a = store.upsert_source("A", "https://f", true).await.unwrap();
        let b = store.upsert_source("A2", "https://f", false).await.unwrap();
        assert_eq!(a, b);
        assert!(store.active_sources().await.unwrap().is_empty());
    }
}
