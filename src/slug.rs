// src/slug.rs
use sha2::{Digest, Sha256};

use crate::store::{Store, StoreError};

const MAX_SLUG_CHARS: usize = 80;

/// Lowercase, keep `[a-z0-9 -]`, whitespace runs become `-`, cut to 80 chars,
/// trailing dashes trimmed. Falls back to `article` when nothing is left.
pub fn slugify(title: &str) -> String {
    let mut dashed = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_space {
                dashed.push('-');
                in_space = true;
            }
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            dashed.push(c);
            in_space = false;
        }
        // anything else is dropped without ending a whitespace run
    }

    let cut: String = dashed.chars().take(MAX_SLUG_CHARS).collect();
    let slug = cut.trim_end_matches('-');
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug.to_string()
    }
}

/// First 8 hex chars of SHA-256(url).
pub fn url_suffix(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Slug for `title`, disambiguated with a URL hash when the store already has it.
pub async fn unique_slug(store: &dyn Store, title: &str, url: &str) -> Result<String, StoreError> {
    let base = slugify(title);
    if !store.slug_exists(&base).await? {
        return Ok(base);
    }
    Ok(format!("{base}-{}", url_suffix(url)))
}
