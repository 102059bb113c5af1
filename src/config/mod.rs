// src/config/mod.rs
//! Service configuration: a TOML file for tunables plus environment variables
//! for secrets and deployment paths.

pub mod sources;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

pub const ENV_API_KEY: &str = crate::llm::API_KEY_ENV;
pub const ENV_PIPELINE_SECRET: &str = "PIPELINE_SECRET";
pub const ENV_CRON_SECRET: &str = "CRON_SECRET";
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
pub const ENV_SOURCES_PATH: &str = "SOURCES_PATH";
pub const ENV_INTERVAL_SECS: &str = "PIPELINE_INTERVAL_SECS";
pub const ENV_RELEVANCE_THRESHOLD: &str = "RELEVANCE_THRESHOLD";

/// Knobs for one batch run. Defaults match the production values.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    pub feed_timeout_secs: u64,
    pub items_per_source: usize,
    pub lead_max_chars: usize,
    pub batch_size: usize,
    pub relevance_threshold: u8,
    pub classify_delay_ms: u64,
    pub generate_delay_ms: u64,
    pub user_agent: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            feed_timeout_secs: 10,
            items_per_source: 10,
            lead_max_chars: 500,
            batch_size: 10,
            relevance_threshold: 7,
            classify_delay_ms: 200,
            generate_delay_ms: 500,
            user_agent: "Ledge-Bot/1.0 (leadership intelligence platform)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmSettings {
    pub api_url: String,
    pub classifier_model: String,
    pub classifier_max_tokens: u32,
    pub generator_model: String,
    pub generator_max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            classifier_model: "claude-haiku-4-5-20251001".to_string(),
            classifier_max_tokens: 300,
            generator_model: "claude-sonnet-4-5-20250929".to_string(),
            generator_max_tokens: 600,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub database_path: String,
    pub sources_path: Option<String>,
    /// When set, an in-process scheduler triggers a run every N seconds.
    pub schedule_interval_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            database_path: "data/ledge.db".to_string(),
            sources_path: None,
            schedule_interval_secs: None,
        }
    }
}

/// Env-only values; never read from the TOML file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub anthropic_api_key: Option<String>,
    pub pipeline_secret: Option<String>,
    pub cron_secret: Option<String>,
}

// Keep secrets out of logs.
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|k| k.len()))
            .field("pipeline_secret", &self.pipeline_secret.is_some())
            .field("cron_secret", &self.cron_secret.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineSettings,
    pub llm: LlmSettings,
    pub server: ServerSettings,
    #[serde(skip)]
    pub secrets: Secrets,
}

impl AppConfig {
    /// Resolve the config file, parse it, then layer the process environment on top.
    ///
    /// 1) $PIPELINE_CONFIG_PATH (must exist)
    /// 2) config/pipeline.toml (optional; defaults when absent)
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::from_path(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
                if pb.exists() {
                    Self::from_path(&pb)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config at {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Apply env overrides through `lookup` (the process env in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        self.secrets.anthropic_api_key = get(ENV_API_KEY);
        self.secrets.pipeline_secret = get(ENV_PIPELINE_SECRET);
        self.secrets.cron_secret = get(ENV_CRON_SECRET);

        if let Some(p) = get(ENV_DATABASE_PATH) {
            self.server.database_path = p;
        }
        if let Some(p) = get(ENV_SOURCES_PATH) {
            self.server.sources_path = Some(p);
        }
        if let Some(secs) = get(ENV_INTERVAL_SECS).and_then(|v| v.parse::<u64>().ok()) {
            self.server.schedule_interval_secs = Some(secs);
        }
        if let Some(t) = get(ENV_RELEVANCE_THRESHOLD).and_then(|v| v.parse::<u8>().ok()) {
            self.pipeline.relevance_threshold = t;
        }
        self.sanitize();
    }

    fn sanitize(&mut self) {
        let p = &mut self.pipeline;
        p.relevance_threshold = p.relevance_threshold.clamp(1, 10);
        p.batch_size = p.batch_size.max(1);
        p.items_per_source = p.items_per_source.max(1);
        p.feed_timeout_secs = p.feed_timeout_secs.max(1);
        if self.server.schedule_interval_secs == Some(0) {
            self.server.schedule_interval_secs = None;
        }
    }
}
