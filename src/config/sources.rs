// src/config/sources.rs
//! Feed source list used to seed the store at startup.
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::ENV_SOURCES_PATH;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceSeed {
    pub name: String,
    pub feed_url: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Load sources from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceSeed>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load sources using env var + fallbacks:
/// 1) $SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_sources_default() -> Result<Vec<SourceSeed>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("SOURCES_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceSeed>> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported sources format"))
}

fn parse_toml(s: &str) -> Result<Vec<SourceSeed>> {
    #[derive(Deserialize)]
    struct TomlSources {
        sources: Vec<SourceSeed>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(clean_list(v.sources))
}

fn parse_json(s: &str) -> Result<Vec<SourceSeed>> {
    let v: Vec<SourceSeed> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim fields, drop entries without a URL, keep the first entry per URL.
fn clean_list(items: Vec<SourceSeed>) -> Vec<SourceSeed> {
    let mut out: Vec<SourceSeed> = Vec::with_capacity(items.len());
    for mut it in items {
        it.name = it.name.trim().to_string();
        it.feed_url = it.feed_url.trim().to_string();
        if it.feed_url.is_empty() || out.iter().any(|o| o.feed_url == it.feed_url) {
            continue;
        }
        if it.name.is_empty() {
            it.name = it.feed_url.clone();
        }
        out.push(it);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn toml_and_json_formats_work() {
        let toml = r#"
[[sources]]
name = " HBR "
feed_url = "https://hbr.org/feed"

[[sources]]
name = "Dup"
feed_url = "https://hbr.org/feed"

[[sources]]
name = "Paused"
feed_url = "https://example.com/rss"
active = false
"#;
        let out = parse_toml(toml).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "HBR");
        assert!(out[0].active);
        assert!(!out[1].active);

        let json = r#"[{"name":"","feed_url":" https://a.example/feed "},{"name":"x","feed_url":""}]"#;
        let out = parse_json(json).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "https://a.example/feed");
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_SOURCES_PATH);

        assert!(load_sources_default().unwrap().is_empty());

        let p_json = tmp.path().join("sources.json");
        fs::write(&p_json, r#"[{"name":"X","feed_url":"https://x.example/rss"}]"#).unwrap();
        env::set_var(ENV_SOURCES_PATH, p_json.display().to_string());
        let v = load_sources_default().unwrap();
        assert_eq!(v[0].name, "X");

        env::set_var(ENV_SOURCES_PATH, tmp.path().join("missing.toml"));
        assert!(load_sources_default().is_err());
        env::remove_var(ENV_SOURCES_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
