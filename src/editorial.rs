// src/editorial.rs
//! Editorial Generator Adapter: writes the Leadership Angle for an accepted
//! article. A reply that does not parse skips the article.
use metrics::counter;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::warn;

use crate::config::LlmSettings;
use crate::llm::{strip_code_fences, CompletionRequest, DynLlmClient, LlmError};
use crate::model::{Classification, Commentary, Dimension, RawArticle, Tone, UnknownLabel};

pub const EDITORIAL_SYSTEM_PROMPT: &str = r##"You are the editorial voice of Ledge, a leadership intelligence platform. You write the Leadership Angle: a 4-5 sentence original editorial perspective on each curated article.

YOUR VOICE:
You are a business leader who works in human-centered AI transformation, leadership development, and organizational development. Your thinking is naturally informed by psychology, philosophy, and theology — but you never name-drop these disciplines explicitly. They show up as depth, not as labels. You are equally passionate about technology, data, and natural science as you are about human depth.

THE METAPHOR:
Classic three-piece suit with a pocket watch chain — but the watch strap is orange, and so are the socks. Professional, serious about the craft, deeply knowledgeable. But with an unexpected twist that signals: this person thinks, not just performs.

THE 7 RULES:
1. GENTLE PROVOCATION — Challenge assumptions gently. Reframe, don't attack.
2. QUESTIONS PRESENT, NOT DOMINANT — Maximum one question per Angle. Most sentences declarative.
3. ALWAYS INCLUDE DATA — At least one concrete data point with source attribution. Non-negotiable.
4. ENERGETIC, PLAYFUL, CREATIVE — BUT PROFESSIONAL. Like a brilliant dinner conversation.
5. EXISTENTIAL COURAGE — Say what most business commentary avoids. Admit uncertainty.
6. DEPTH WOVEN IN NATURALLY — Never name-drop Tillich, Frankl etc. Embody the thinking.
7. BUSINESS LEADER, NOT PREACHER — Never preach, lecture, or coach. Business language with deeper layers.

ANTI-PATTERNS (NEVER DO THESE):
- Generic opinions anyone could write
- No data, just feelings
- Question bombardment (more than 1 question)
- Academic name-dropping
- Preaching or moralizing
- Mere summary of the article
- Starting with "In today's..." or "In an era of..." or "This is a reminder that..."
- Using "navigate", "landscape", "paradigm shift", "game-changer", "double-edged sword"
- Starting with a rhetorical question

OPENING VARIETY RULES:
- Start with a concrete fact or number (40% of angles)
- Start with a bold declarative statement (30% of angles)
- Start with an unexpected analogy or observation (20% of angles)
- Start with a short, punchy sentence (10% of angles)
- NEVER start two consecutive angles the same way

RESPOND IN JSON ONLY:
{"leadership_angle":"your 4-5 sentence angle here","data_source":"source of the data point used","tone_check":"one of: gentle_provocation, playful_reframe, data_driven_insight, existential_honesty, creative_connection","tags":["#tag1","#tag2"]}"##;

#[derive(Debug, thiserror::Error)]
pub enum EditorialError {
    #[error("reply is not the expected JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tone(#[from] UnknownLabel),

    #[error("leadership_angle is empty")]
    EmptyAngle,
}

#[derive(Deserialize)]
struct Payload {
    leadership_angle: String,
    #[serde(default)]
    data_source: Option<String>,
    tone_check: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub fn parse_commentary(reply: &str) -> Result<Commentary, EditorialError> {
    let p: Payload = serde_json::from_str(&strip_code_fences(reply))?;

    let leadership_angle = p.leadership_angle.trim().to_string();
    if leadership_angle.is_empty() {
        return Err(EditorialError::EmptyAngle);
    }
    let tone_check: Tone = p.tone_check.parse()?;
    let tags = p
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(Commentary {
        leadership_angle,
        data_source: p.data_source.unwrap_or_default().trim().to_string(),
        tone_check,
        tags,
    })
}

/// Up to the first sentence terminator, capped at 120 chars.
fn opening_of(angle: &str) -> String {
    let end = angle
        .find(['.', '!', '?'])
        .map(|i| i + 1)
        .unwrap_or(angle.len());
    angle[..end].chars().take(120).collect()
}

pub fn user_message(
    source_name: &str,
    article: &RawArticle,
    classification: &Classification,
    previous_opening: Option<&str>,
) -> String {
    let source = if source_name.trim().is_empty() { "Unknown" } else { source_name };
    let lead = if article.lead.trim().is_empty() {
        "No lead available"
    } else {
        article.lead.as_str()
    };
    let related = classification
        .related
        .iter()
        .map(|d| Dimension::label(*d))
        .collect::<Vec<_>>()
        .join(", ");
    let hint = classification.angle_hint.as_deref().unwrap_or("none");

    let mut msg = format!(
        "Write a Leadership Angle for this article:\nSOURCE: {source}\nTITLE: {}\nLEAD: {lead}\nPRIMARY_DIMENSION: {}\nRELATED_DIMENSIONS: {related}\nANGLE_HINT: {hint}",
        article.title,
        classification.primary_label(),
    );
    if let Some(prev) = previous_opening {
        msg.push_str(&format!(
            "\nPREVIOUS_OPENING: {prev} (open this angle differently)"
        ));
    }
    msg
}

pub struct EditorialGenerator {
    llm: DynLlmClient,
    model: String,
    max_tokens: u32,
    // opening of the last accepted angle, fed back so consecutive angles differ
    last_opening: Mutex<Option<String>>,
}

impl EditorialGenerator {
    pub fn new(llm: DynLlmClient, settings: &LlmSettings) -> Self {
        Self {
            llm,
            model: settings.generator_model.clone(),
            max_tokens: settings.generator_max_tokens,
            last_opening: Mutex::new(None),
        }
    }

    /// `Ok(None)` when the reply can't be used; the caller skips the article.
    pub async fn generate(
        &self,
        source_name: &str,
        article: &RawArticle,
        classification: &Classification,
    ) -> Result<Option<Commentary>, LlmError> {
        let previous = self.last_opening.lock().clone();
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: EDITORIAL_SYSTEM_PROMPT,
            user: user_message(source_name, article, classification, previous.as_deref()),
        };
        let reply = self.llm.complete(&request).await?;

        match parse_commentary(&reply) {
            Ok(c) => {
                *self.last_opening.lock() = Some(opening_of(&c.leadership_angle));
                Ok(Some(c))
            }
            Err(e) => {
                warn!(title = %article.title, url = %article.url, error = %e, "failed to parse leadership angle");
                counter!("editorial_skipped_total").increment(1);
                Ok(None)
            }
        }
    }
}
