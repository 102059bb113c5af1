// src/store/sqlite.rs
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::{Store, StoreError};
use crate::model::{
    ArticleCandidate, BatchRun, Classification, CuratedArticle, Dimension, NewCuratedArticle,
    RawArticle, RunStats, RunStatus, Source,
};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    rss_url TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS raw_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    title TEXT NOT NULL,
    lead TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL UNIQUE,
    og_image_url TEXT,
    published_at TEXT,
    is_processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_raw_articles_processed ON raw_articles(is_processed);

CREATE TABLE IF NOT EXISTS classified_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_article_id INTEGER NOT NULL UNIQUE REFERENCES raw_articles(id),
    relevance_score INTEGER NOT NULL,
    primary_dimension TEXT,
    related_dimensions TEXT NOT NULL DEFAULT '[]',
    reason TEXT NOT NULL DEFAULT '',
    angle_hint TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS curated_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_article_id INTEGER NOT NULL REFERENCES raw_articles(id),
    title TEXT NOT NULL,
    lead TEXT NOT NULL DEFAULT '',
    source_name TEXT NOT NULL,
    article_url TEXT NOT NULL,
    og_image_url TEXT,
    published_at TEXT,
    primary_dimension TEXT NOT NULL,
    related_dimensions TEXT NOT NULL DEFAULT '[]',
    relevance_score INTEGER NOT NULL,
    leadership_angle TEXT NOT NULL,
    data_source TEXT NOT NULL DEFAULT '',
    tone_check TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    slug TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'published',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_curated_articles_slug ON curated_articles(slug);

CREATE TABLE IF NOT EXISTS batch_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    articles_fetched INTEGER NOT NULL DEFAULT 0,
    articles_classified INTEGER NOT NULL DEFAULT 0,
    articles_passed INTEGER NOT NULL DEFAULT 0,
    articles_curated INTEGER NOT NULL DEFAULT 0,
    used_data_sources TEXT NOT NULL DEFAULT '[]',
    errors TEXT NOT NULL DEFAULT '[]',
    error_log TEXT
);
"#;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories as needed.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

// ---------- row helpers ----------

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_label<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.parse::<T>().map_err(|e| conversion_err(idx, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| conversion_err(idx, e))
}

fn to_json<T: serde::Serialize>(v: &T) -> rusqlite::Result<String> {
    serde_json::to_string(v).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn ts_text(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|d| d.to_rfc3339())
}

fn source_from_row(row: &Row) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        feed_url: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
    })
}

const RAW_COLUMNS: &str =
    "id, source_id, title, lead, url, og_image_url, published_at, is_processed";

fn raw_from_row(row: &Row) -> rusqlite::Result<RawArticle> {
    Ok(RawArticle {
        id: row.get(0)?,
        source_id: row.get(1)?,
        title: row.get(2)?,
        lead: row.get(3)?,
        url: row.get(4)?,
        image_url: row.get(5)?,
        published_at: parse_ts(6, row.get(6)?)?,
        processed: row.get::<_, i64>(7)? != 0,
    })
}

fn classification_from_row(row: &Row) -> rusqlite::Result<Classification> {
    let primary: Option<String> = row.get(1)?;
    let related: String = row.get(2)?;
    Ok(Classification {
        relevance: row.get(0)?,
        primary: primary.map(|p| parse_label::<Dimension>(1, &p)).transpose()?,
        related: parse_json(2, &related)?,
        reason: row.get(3)?,
        angle_hint: row.get(4)?,
    })
}

const CURATED_COLUMNS: &str = "id, raw_article_id, title, lead, source_name, article_url, og_image_url, published_at, \
     primary_dimension, related_dimensions, relevance_score, leadership_angle, data_source, tone_check, tags, slug, status";

fn curated_from_row(row: &Row) -> rusqlite::Result<CuratedArticle> {
    let primary: String = row.get(8)?;
    let related: String = row.get(9)?;
    let tone: String = row.get(13)?;
    let tags: String = row.get(14)?;
    let status: String = row.get(16)?;
    Ok(CuratedArticle {
        id: row.get(0)?,
        article: NewCuratedArticle {
            raw_article_id: row.get(1)?,
            title: row.get(2)?,
            lead: row.get(3)?,
            source_name: row.get(4)?,
            article_url: row.get(5)?,
            image_url: row.get(6)?,
            published_at: parse_ts(7, row.get(7)?)?,
            primary: parse_label(8, &primary)?,
            related: parse_json(9, &related)?,
            relevance: row.get(10)?,
            leadership_angle: row.get(11)?,
            data_source: row.get(12)?,
            tone_check: parse_label(13, &tone)?,
            tags: parse_json(14, &tags)?,
            slug: row.get(15)?,
            status: parse_label(16, &status)?,
        },
    })
}

const RUN_COLUMNS: &str = "id, started_at, finished_at, status, articles_fetched, articles_classified, \
     articles_passed, articles_curated, used_data_sources, errors, error_log";

fn run_from_row(row: &Row) -> rusqlite::Result<BatchRun> {
    let started: String = row.get(1)?;
    let status: String = row.get(3)?;
    let cited: String = row.get(8)?;
    let errors: String = row.get(9)?;
    Ok(BatchRun {
        id: row.get(0)?,
        started_at: parse_ts(1, Some(started))?.unwrap_or_else(Utc::now),
        finished_at: parse_ts(2, row.get(2)?)?,
        status: parse_label::<RunStatus>(3, &status)?,
        stats: RunStats {
            articles_fetched: row.get::<_, i64>(4)? as usize,
            articles_classified: row.get::<_, i64>(5)? as usize,
            articles_passed: row.get::<_, i64>(6)? as usize,
            articles_curated: row.get::<_, i64>(7)? as usize,
            used_data_sources: parse_json(8, &cited)?,
            errors: parse_json(9, &errors)?,
        },
        error_log: row.get(10)?,
    })
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn active_sources(&self) -> Result<Vec<Source>, StoreError> {
        let sources = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, rss_url, is_active FROM sources WHERE is_active = 1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], source_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(sources)
    }

    async fn upsert_source(&self, name: &str, feed_url: &str, active: bool) -> Result<i64, StoreError> {
        let (name, feed_url) = (name.to_string(), feed_url.to_string());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO sources (name, rss_url, is_active) VALUES (?1, ?2, ?3)
                       ON CONFLICT(rss_url) DO UPDATE SET name = excluded.name, is_active = excluded.is_active"#,
                    params![name, feed_url, active as i64],
                )?;
                let id = conn.query_row(
                    "SELECT id FROM sources WHERE rss_url = ?1",
                    params![feed_url],
                    |r| r.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let urls = urls.to_vec();
        let found = self
            .conn
            .call(move |conn| {
                let mut found = HashSet::new();
                // stay under SQLITE_MAX_VARIABLE_NUMBER on old builds
                for chunk in urls.chunks(500) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!("SELECT url FROM raw_articles WHERE url IN ({placeholders})");
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| r.get::<_, String>(0))?;
                    for url in rows {
                        found.insert(url?);
                    }
                }
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    async fn insert_raw_articles(&self, items: &[ArticleCandidate]) -> Result<Vec<RawArticle>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let items = items.to_vec();
        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut out = Vec::with_capacity(items.len());
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO raw_articles (source_id, title, lead, url, og_image_url, published_at, is_processed)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)"#,
                    )?;
                    for it in items {
                        stmt.execute(params![
                            it.source_id,
                            it.title,
                            it.lead,
                            it.url,
                            it.image_url,
                            ts_text(it.published_at),
                        ])?;
                        out.push(RawArticle {
                            id: tx.last_insert_rowid(),
                            source_id: it.source_id,
                            title: it.title,
                            lead: it.lead,
                            url: it.url,
                            image_url: it.image_url,
                            published_at: it.published_at,
                            processed: false,
                        });
                    }
                }
                tx.commit()?;
                Ok(out)
            })
            .await?;
        Ok(stored)
    }

    async fn mark_processed(&self, raw_id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE raw_articles SET is_processed = 1 WHERE id = ?1",
                    params![raw_id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound { table: "raw_articles", id: raw_id });
        }
        Ok(())
    }

    async fn raw_articles(&self) -> Result<Vec<RawArticle>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("SELECT {RAW_COLUMNS} FROM raw_articles ORDER BY id"))?;
                let rows = stmt
                    .query_map([], raw_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn insert_classification(&self, raw_id: i64, c: &Classification) -> Result<(), StoreError> {
        let c = c.clone();
        self.conn
            .call(move |conn| {
                let related = to_json(&c.related)?;
                conn.execute(
                    r#"INSERT INTO classified_articles
                         (raw_article_id, relevance_score, primary_dimension, related_dimensions, reason, angle_hint)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        raw_id,
                        c.relevance,
                        c.primary.map(Dimension::label),
                        related,
                        c.reason,
                        c.angle_hint,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn classification_for(&self, raw_id: i64) -> Result<Option<Classification>, StoreError> {
        let c = self
            .conn
            .call(move |conn| {
                let c = conn
                    .query_row(
                        r#"SELECT relevance_score, primary_dimension, related_dimensions, reason, angle_hint
                           FROM classified_articles WHERE raw_article_id = ?1"#,
                        params![raw_id],
                        classification_from_row,
                    )
                    .optional()?;
                Ok(c)
            })
            .await?;
        Ok(c)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError> {
        let slug = slug.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM curated_articles WHERE slug = ?1",
                    params![slug],
                    |r| r.get(0),
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(exists)
    }

    async fn insert_curated(&self, article: &NewCuratedArticle) -> Result<i64, StoreError> {
        let a = article.clone();
        let id = self
            .conn
            .call(move |conn| {
                let related = to_json(&a.related)?;
                let tags = to_json(&a.tags)?;
                conn.execute(
                    r#"INSERT INTO curated_articles
                         (raw_article_id, title, lead, source_name, article_url, og_image_url, published_at,
                          primary_dimension, related_dimensions, relevance_score, leadership_angle, data_source,
                          tone_check, tags, slug, status)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
                    params![
                        a.raw_article_id,
                        a.title,
                        a.lead,
                        a.source_name,
                        a.article_url,
                        a.image_url,
                        ts_text(a.published_at),
                        a.primary.label(),
                        related,
                        a.relevance,
                        a.leadership_angle,
                        a.data_source,
                        a.tone_check.as_str(),
                        tags,
                        a.slug,
                        a.status.as_str(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    async fn curated_articles(&self) -> Result<Vec<CuratedArticle>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {CURATED_COLUMNS} FROM curated_articles ORDER BY id"))?;
                let rows = stmt
                    .query_map([], curated_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn create_run(&self, started_at: DateTime<Utc>) -> Result<i64, StoreError> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO batch_log (started_at, status) VALUES (?1, ?2)",
                    params![started_at.to_rfc3339(), RunStatus::Running.as_str()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    async fn finalize_run(&self, run: &BatchRun) -> Result<(), StoreError> {
        let run = run.clone();
        let run_id = run.id;
        let changed = self
            .conn
            .call(move |conn| {
                let cited = to_json(&run.stats.used_data_sources)?;
                let errors = to_json(&run.stats.errors)?;
                Ok(conn.execute(
                    r#"UPDATE batch_log SET
                         finished_at = ?2, status = ?3,
                         articles_fetched = ?4, articles_classified = ?5,
                         articles_passed = ?6, articles_curated = ?7,
                         used_data_sources = ?8, errors = ?9, error_log = ?10
                       WHERE id = ?1"#,
                    params![
                        run.id,
                        ts_text(run.finished_at),
                        run.status.as_str(),
                        run.stats.articles_fetched as i64,
                        run.stats.articles_classified as i64,
                        run.stats.articles_passed as i64,
                        run.stats.articles_curated as i64,
                        cited,
                        errors,
                        run.error_log,
                    ],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound { table: "batch_log", id: run_id });
        }
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<BatchRun>, StoreError> {
        let run = self
            .conn
            .call(|conn| {
                let run = conn
                    .query_row(
                        &format!("SELECT {RUN_COLUMNS} FROM batch_log ORDER BY id DESC LIMIT 1"),
                        [],
                        run_from_row,
                    )
                    .optional()?;
                Ok(run)
            })
            .await?;
        Ok(run)
    }
}
