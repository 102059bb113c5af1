// src/model.rs
//! Data model shared by every pipeline stage: feed sources, ingested articles,
//! classification verdicts, curated output, and batch-run bookkeeping.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External feed descriptor. The pipeline only ever reads active ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub feed_url: String,
    pub active: bool,
}

/// One normalized feed item, not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleCandidate {
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub lead: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A candidate after it has been stored in `raw_articles`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub lead: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub processed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label `{label}`")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

/// Lowercase ASCII alphanumerics only, so "Tech-Savvy", "tech_savvy" and
/// "TECH SAVVY" all compare equal.
fn fold_label(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// The eight leadership dimensions an article can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Dimension {
    MeaningMaker,
    Strategist,
    TechSavvy,
    Operator,
    RelationshipWeaver,
    CultureArchitect,
    SelfAwareness,
    Transformator,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::MeaningMaker,
        Dimension::Strategist,
        Dimension::TechSavvy,
        Dimension::Operator,
        Dimension::RelationshipWeaver,
        Dimension::CultureArchitect,
        Dimension::SelfAwareness,
        Dimension::Transformator,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::MeaningMaker => "Meaning-Maker",
            Dimension::Strategist => "Strategist",
            Dimension::TechSavvy => "Tech-Savvy",
            Dimension::Operator => "Operator",
            Dimension::RelationshipWeaver => "Relationship-Weaver",
            Dimension::CultureArchitect => "Culture-Architect",
            Dimension::SelfAwareness => "Self-Awareness",
            Dimension::Transformator => "Transformator",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Dimension {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = fold_label(s);
        Dimension::ALL
            .into_iter()
            .find(|d| fold_label(d.label()) == folded)
            .ok_or_else(|| UnknownLabel {
                kind: "dimension",
                label: s.to_string(),
            })
    }
}

impl From<Dimension> for String {
    fn from(d: Dimension) -> Self {
        d.label().to_string()
    }
}

impl TryFrom<String> for Dimension {
    type Error = UnknownLabel;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Relevance verdict for one raw article. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    /// 1..=10 for real verdicts, 0 for the placeholder.
    pub relevance: u8,
    /// `None` only on the placeholder produced for a malformed reply.
    pub primary: Option<Dimension>,
    pub related: Vec<Dimension>,
    pub reason: String,
    pub angle_hint: Option<String>,
}

impl Classification {
    /// Zero-relevance stand-in used when the classifier reply can't be trusted.
    pub fn placeholder(reason: impl Into<String>) -> Self {
        Self {
            relevance: 0,
            primary: None,
            related: Vec::new(),
            reason: reason.into(),
            angle_hint: None,
        }
    }

    pub fn passes(&self, threshold: u8) -> bool {
        self.primary.is_some() && self.relevance >= threshold
    }

    pub fn primary_label(&self) -> &'static str {
        self.primary.map(Dimension::label).unwrap_or("Unknown")
    }
}

/// Tone label the editorial generator attaches to its commentary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    GentleProvocation,
    PlayfulReframe,
    DataDrivenInsight,
    ExistentialHonesty,
    CreativeConnection,
}

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::GentleProvocation,
        Tone::PlayfulReframe,
        Tone::DataDrivenInsight,
        Tone::ExistentialHonesty,
        Tone::CreativeConnection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::GentleProvocation => "gentle_provocation",
            Tone::PlayfulReframe => "playful_reframe",
            Tone::DataDrivenInsight => "data_driven_insight",
            Tone::ExistentialHonesty => "existential_honesty",
            Tone::CreativeConnection => "creative_connection",
        }
    }
}

impl FromStr for Tone {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = fold_label(s);
        Tone::ALL
            .into_iter()
            .find(|t| fold_label(t.as_str()) == folded)
            .ok_or_else(|| UnknownLabel {
                kind: "tone",
                label: s.to_string(),
            })
    }
}

/// Parsed editorial payload for one article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commentary {
    pub leadership_angle: String,
    pub data_source: String,
    pub tone_check: Tone,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    #[default]
    Published,
    Draft,
}

impl PublishStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishStatus::Published => "published",
            PublishStatus::Draft => "draft",
        }
    }
}

impl FromStr for PublishStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(PublishStatus::Published),
            "draft" => Ok(PublishStatus::Draft),
            other => Err(UnknownLabel {
                kind: "publish status",
                label: other.to_string(),
            }),
        }
    }
}

/// Curated record ready to be inserted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCuratedArticle {
    pub raw_article_id: i64,
    pub title: String,
    pub lead: String,
    pub source_name: String,
    pub article_url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub primary: Dimension,
    pub related: Vec<Dimension>,
    pub relevance: u8,
    pub leadership_angle: String,
    pub data_source: String,
    pub tone_check: Tone,
    pub tags: Vec<String>,
    pub slug: String,
    pub status: PublishStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CuratedArticle {
    pub id: i64,
    #[serde(flatten)]
    pub article: NewCuratedArticle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(UnknownLabel {
                kind: "run status",
                label: other.to_string(),
            }),
        }
    }
}

/// Running tallies for one run; also the counts written to `batch_log`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub articles_fetched: usize,
    pub articles_classified: usize,
    pub articles_passed: usize,
    pub articles_curated: usize,
    pub used_data_sources: Vec<String>,
    pub errors: Vec<String>,
}

/// One `batch_log` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(flatten)]
    pub stats: RunStats,
    pub error_log: Option<String>,
}
