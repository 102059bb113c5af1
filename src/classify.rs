// src/classify.rs
//! Classifier Adapter: asks the language model for a relevance verdict and
//! validates it against the closed dimension set.
use metrics::counter;
use serde::Deserialize;
use tracing::warn;

use crate::config::LlmSettings;
use crate::llm::{strip_code_fences, CompletionRequest, DynLlmClient, LlmError};
use crate::model::{Classification, Dimension, RawArticle, UnknownLabel};

pub const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"You are the classification engine for Ledge, a leadership intelligence platform. Your job is to evaluate incoming content and determine:
1. Is this relevant to leadership practice? (relevance score 1-10)
2. Which primary dimension does it belong to?
3. Which related dimensions does it connect to?

RELEVANCE THRESHOLD: Only content scoring 8 or above is worth surfacing.
Be selective. A score of 8 means: a senior leader would stop scrolling to read this. It offers actionable insight, a strategic pattern, a provocation, or a decision-relevant data point.

THE 8 DIMENSIONS:
1. MEANING-MAKER — The "Why?" Purpose, meaning, values, vision, mission, North Star.
2. STRATEGIST — "How do we achieve the vision?" Strategy, planning, tactics, patterns.
3. TECH-SAVVY — The tool dimension. AI, robotics, tech ecosystems, human-machine relationship.
4. OPERATOR — "How does it become reality?" Processes, execution, lean, agile.
5. RELATIONSHIP-WEAVER — Personal connections. Conflict, influence, negotiation, networks.
6. CULTURE-ARCHITECT — Community dimension. Org culture, org design, collaboration.
7. SELF-AWARENESS — Leader's inner world. True Self, resilience, mindset.
8. TRANSFORMATOR — Time dimension. Change, transformation, M&A, innovation cycles.

CLASSIFICATION RULES:
- Assign exactly ONE primary dimension
- Assign 0-2 related dimensions
- AI/intelligent machines integration is relevant across ALL dimensions
- If inner work serves a strategic goal → Strategist (primary)
- If content is about execution methodology → Operator

RESPOND IN JSON ONLY. No explanation, no preamble. Format:
{"relevance":9,"primary":"Strategist","related":["Tech-Savvy"],"reason":"brief reason","angle_hint":"one-sentence editorial hook or null"}"#;

pub const PARSE_ERROR_REASON: &str = "Parse error";
const MAX_RELATED: usize = 2;

/// Why a classifier reply was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("reply is not the expected JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relevance must be an integer in 1..=10, got {0}")]
    Relevance(serde_json::Value),

    #[error(transparent)]
    Label(#[from] UnknownLabel),
}

#[derive(Deserialize)]
struct Verdict {
    relevance: serde_json::Value,
    primary: String,
    #[serde(default)]
    related: Option<Vec<String>>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    angle_hint: Option<String>,
}

fn parse_relevance(v: &serde_json::Value) -> Option<u8> {
    let n = v.as_f64()?;
    if n.fract() != 0.0 || !(1.0..=10.0).contains(&n) {
        return None;
    }
    Some(n as u8)
}

/// Parse and validate one reply. Related categories are de-duplicated, stripped
/// of the primary and cut to two.
pub fn parse_classification(reply: &str) -> Result<Classification, ClassifyError> {
    let verdict: Verdict = serde_json::from_str(&strip_code_fences(reply))?;

    let relevance =
        parse_relevance(&verdict.relevance).ok_or_else(|| ClassifyError::Relevance(verdict.relevance.clone()))?;
    let primary: Dimension = verdict.primary.parse()?;

    let mut related: Vec<Dimension> = Vec::new();
    for label in verdict.related.unwrap_or_default() {
        let d: Dimension = label.parse()?;
        if d != primary && !related.contains(&d) {
            related.push(d);
        }
    }
    related.truncate(MAX_RELATED);

    let angle_hint = verdict
        .angle_hint
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case("null"));

    Ok(Classification {
        relevance,
        primary: Some(primary),
        related,
        reason: verdict.reason.unwrap_or_default().trim().to_string(),
        angle_hint,
    })
}

pub fn user_message(source_name: &str, article: &RawArticle) -> String {
    let source = if source_name.trim().is_empty() { "Unknown" } else { source_name };
    let lead = if article.lead.trim().is_empty() {
        "No lead available"
    } else {
        article.lead.as_str()
    };
    format!(
        "Classify this content:\nSOURCE: {source}\nTITLE: {}\nLEAD: {lead}\nTYPE: article",
        article.title
    )
}

pub struct Classifier {
    llm: DynLlmClient,
    model: String,
    max_tokens: u32,
}

impl Classifier {
    pub fn new(llm: DynLlmClient, settings: &LlmSettings) -> Self {
        Self {
            llm,
            model: settings.classifier_model.clone(),
            max_tokens: settings.classifier_max_tokens,
        }
    }

    /// One model call. A malformed reply becomes the zero-relevance placeholder;
    /// only transport/credential failures are returned as errors.
    pub async fn classify(&self, source_name: &str, article: &RawArticle) -> Result<Classification, LlmError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: CLASSIFICATION_SYSTEM_PROMPT,
            user: user_message(source_name, article),
        };
        let reply = self.llm.complete(&request).await?;

        match parse_classification(&reply) {
            Ok(c) => Ok(c),
            Err(e) => {
                warn!(title = %article.title, url = %article.url, error = %e, "failed to parse classification");
                counter!("classify_parse_errors_total").increment(1);
                Ok(Classification::placeholder(PARSE_ERROR_REASON))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use std::sync::Arc;

    fn article() -> RawArticle {
        RawArticle {
            id: 1,
            source_id: 1,
            title: "Boards rethink AI oversight".into(),
            lead: String::new(),
            url: "https://x.example/a".into(),
            image_url: None,
            published_at: None,
            processed: false,
        }
    }

    #[test]
    fn parses_fenced_reply() {
        let reply = "```json\n{\"relevance\":9,\"primary\":\"Strategist\",\"related\":[\"Tech-Savvy\"],\"reason\":\"r\",\"angle_hint\":null}\n```";
        let c = parse_classification(reply).unwrap();
        assert_eq!(c.relevance, 9);
        assert_eq!(c.primary, Some(Dimension::Strategist));
        assert_eq!(c.related, vec![Dimension::TechSavvy]);
        assert_eq!(c.angle_hint, None);
    }

    #[test]
    fn related_is_cleaned_and_capped() {
        let reply = r#"{"relevance":8,"primary":"Operator","related":["operator","Strategist","strategist","Tech-Savvy","Transformator"],"reason":"r","angle_hint":"null"}"#;
        let c = parse_classification(reply).unwrap();
        assert_eq!(c.related, vec![Dimension::Strategist, Dimension::TechSavvy]);
        assert!(!c.related.contains(&Dimension::Operator));
        assert_eq!(c.angle_hint, None);
    }

    #[test]
    fn out_of_set_or_out_of_range_is_malformed() {
        assert!(matches!(
            parse_classification(r#"{"relevance":9,"primary":"Visionary","related":[]}"#),
            Err(ClassifyError::Label(_))
        ));
        assert!(matches!(
            parse_classification(r#"{"relevance":9,"primary":"Operator","related":["Guru"]}"#),
            Err(ClassifyError::Label(_))
        ));
        assert!(matches!(
            parse_classification(r#"{"relevance":11,"primary":"Operator"}"#),
            Err(ClassifyError::Relevance(_))
        ));
        assert!(matches!(
            parse_classification(r#"{"relevance":7.5,"primary":"Operator"}"#),
            Err(ClassifyError::Relevance(_))
        ));
        assert!(matches!(parse_classification("Sure! Here you go"), Err(ClassifyError::Json(_))));
    }

    #[test]
    fn user_message_fills_defaults() {
        let msg = user_message("", &article());
        assert!(msg.contains("SOURCE: Unknown"));
        assert!(msg.contains("LEAD: No lead available"));
        assert!(msg.ends_with("TYPE: article"));
    }

    #[tokio::test]
    async fn unparsable_reply_degrades_to_placeholder() {
        let mock = Arc::new(MockLlm::fixed("I think this is a 9"));
        let classifier = Classifier::new(mock.clone(), &LlmSettings::default());
        let c = classifier.classify("HBR", &article()).await.unwrap();
        assert_eq!(c, Classification::placeholder(PARSE_ERROR_REASON));

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, LlmSettings::default().classifier_model);
        assert_eq!(calls[0].max_tokens, 300);
        assert_eq!(calls[0].system, CLASSIFICATION_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn transport_error_is_returned() {
        let mock = Arc::new(MockLlm::new(|_| {
            Err(LlmError::Status {
                status: 529,
                body: "overloaded".into(),
            })
        }));
        let classifier = Classifier::new(mock, &LlmSettings::default());
        let err = classifier.classify("HBR", &article()).await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
