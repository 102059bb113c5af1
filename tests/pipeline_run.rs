// tests/pipeline_run.rs
//
// End-to-end runs of the orchestrator with in-memory collaborators:
// fixture feeds, a scripted language model and the memory store.

use std::sync::Arc;

use ledge_curator::classify::CLASSIFICATION_SYSTEM_PROMPT;
use ledge_curator::config::AppConfig;
use ledge_curator::ingest::feed::FixtureFeedFetcher;
use ledge_curator::llm::{CompletionRequest, LlmError, MockLlm, API_KEY_ENV};
use ledge_curator::model::{Dimension, RunStatus};
use ledge_curator::pipeline::{Pipeline, RunReport, NO_NEW_ARTICLES};
use ledge_curator::store::memory::{MemoryStore, StoreOp};
use ledge_curator::store::Store;
use ledge_curator::PipelineError;

const ALPHA: &str = include_str!("fixtures/alpha_rss.xml");
const BETA: &str = include_str!("fixtures/beta_atom.xml");
const BROKEN: &str = include_str!("fixtures/malformed.xml");

const ALPHA_URL: &str = "https://alpha.example.com/feed";
const BETA_URL: &str = "https://beta.example.org/atom";
const GAMMA_URL: &str = "https://gamma.example.net/rss";

const GOOD_VERDICT: &str = r#"{"relevance":9,"primary":"Strategist","related":["Tech-Savvy"],"reason":"pattern","angle_hint":null}"#;
const GOOD_ANGLE: &str = r##"{"leadership_angle":"62% of offsites change nothing. The agenda is the tell.","data_source":"Bain 2024","tone_check":"gentle_provocation","tags":["#strategy"]}"##;

fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.pipeline.classify_delay_ms = 0;
    cfg.pipeline.generate_delay_ms = 0;
    cfg
}

fn three_sources() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_sources([
        ("Alpha", ALPHA_URL),
        ("Beta", BETA_URL),
        ("Gamma", GAMMA_URL),
    ]))
}

fn fixture_feeds() -> Arc<FixtureFeedFetcher> {
    Arc::new(
        FixtureFeedFetcher::new()
            .with_feed(ALPHA_URL, ALPHA)
            .with_feed(BETA_URL, BETA)
            .with_feed(GAMMA_URL, BROKEN),
    )
}

fn title_of(req: &CompletionRequest) -> String {
    req.user
        .lines()
        .find_map(|l| l.strip_prefix("TITLE: "))
        .unwrap_or_default()
        .to_string()
}

/// Classifier and generator replies chosen per title.
fn scripted<C, G>(classify: C, generate: G) -> Arc<MockLlm>
where
    C: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    G: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
{
    Arc::new(MockLlm::new(move |req| {
        let title = title_of(req);
        if req.system == CLASSIFICATION_SYSTEM_PROMPT {
            classify(&title)
        } else {
            generate(&title)
        }
    }))
}

fn happy_llm() -> Arc<MockLlm> {
    scripted(|_| Ok(GOOD_VERDICT.to_string()), |_| Ok(GOOD_ANGLE.to_string()))
}

fn pipeline(store: &Arc<MemoryStore>, llm: &Arc<MockLlm>, cfg: &AppConfig) -> Pipeline {
    Pipeline::new(store.clone(), fixture_feeds(), llm.clone(), cfg)
}

fn assert_counts_ordered(r: &RunReport) {
    let s = &r.stats;
    assert!(
        s.articles_fetched >= s.articles_classified
            && s.articles_classified >= s.articles_passed
            && s.articles_passed >= s.articles_curated,
        "count ordering violated: {s:?}"
    );
}

#[tokio::test]
async fn malformed_source_is_skipped_and_run_completes() {
    let store = three_sources();
    let llm = happy_llm();
    let report = pipeline(&store, &llm, &fast_config()).run().await.expect("run ok");

    assert!(report.success);
    assert_eq!(report.stats.articles_fetched, 9);
    assert_eq!(report.stats.articles_classified, 9);
    assert_eq!(report.stats.articles_passed, 9);
    assert_eq!(report.stats.articles_curated, 9);
    assert!(report.stats.errors.is_empty());
    assert_eq!(report.stats.used_data_sources.len(), 9);
    assert_counts_ordered(&report);

    let curated = store.curated_articles().await.unwrap();
    assert!(curated.iter().all(|c| c.article.source_name == "Alpha" || c.article.source_name == "Beta"));
    assert!(curated.iter().any(|c| c.article.source_name == "Beta"));

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert!(runs[0].finished_at.is_some());
    assert_eq!(runs[0].stats, report.stats);
}

#[tokio::test]
async fn raw_articles_keep_feed_fields() {
    let store = three_sources();
    let llm = happy_llm();
    pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    let raw = store.raw_articles().await.unwrap();
    assert!(raw.iter().all(|r| r.processed));

    let first = &raw[0];
    assert_eq!(first.url, "https://alpha.example.com/articles/1");
    assert_eq!(first.image_url.as_deref(), Some("https://alpha.example.com/img/1.jpg"));
    assert!(first.lead.starts_with("Lead paragraph for \"Why strategy offsites fail\""));
    assert!(!first.lead.contains('<'));
    assert!(first.published_at.is_some());

    let atom = raw.iter().find(|r| r.url == "https://beta.example.org/posts/2").unwrap();
    assert_eq!(atom.image_url.as_deref(), Some("https://beta.example.org/img/2.png"));
}

#[tokio::test]
async fn second_run_finds_nothing_new() {
    let store = three_sources();
    let llm = happy_llm();
    let p = pipeline(&store, &llm, &fast_config());

    p.run().await.unwrap();
    let calls_after_first = llm.call_count();
    let second = p.run().await.unwrap();

    assert_eq!(second.stats.articles_fetched, 9);
    assert_eq!(second.stats.articles_classified, 0);
    assert_eq!(second.stats.articles_curated, 0);
    assert_eq!(second.message.as_deref(), Some(NO_NEW_ARTICLES));
    assert_eq!(llm.call_count(), calls_after_first, "no model calls on an empty run");
    assert_eq!(store.raw_articles().await.unwrap().len(), 9);

    let runs = store.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].status, RunStatus::Completed);
}

#[tokio::test]
async fn low_relevance_is_not_curated() {
    let store = three_sources();
    let llm = scripted(
        |title| {
            if title == "Lean rituals that stick" {
                Ok(r#"{"relevance":5,"primary":"Operator","related":[],"reason":"generic","angle_hint":null}"#.into())
            } else {
                Ok(GOOD_VERDICT.into())
            }
        },
        |_| Ok(GOOD_ANGLE.into()),
    );
    let report = pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    assert_eq!(report.stats.articles_classified, 9);
    assert_eq!(report.stats.articles_passed, 8);
    assert_eq!(report.stats.articles_curated, 8);
    assert_counts_ordered(&report);

    let curated = store.curated_articles().await.unwrap();
    assert!(curated.iter().all(|c| c.article.title != "Lean rituals that stick"));

    let raw = store.raw_articles().await.unwrap();
    let lean = raw.iter().find(|r| r.title == "Lean rituals that stick").unwrap();
    let verdict = store.classification_for(lean.id).await.unwrap().unwrap();
    assert_eq!(verdict.relevance, 5);
    assert_eq!(verdict.primary, Some(Dimension::Operator));

    // every curated article cleared the gate
    for c in &curated {
        let v = store.classification_for(c.article.raw_article_id).await.unwrap().unwrap();
        assert!(v.relevance >= 7);
        assert_eq!(v.primary, Some(c.article.primary));
    }
}

#[tokio::test]
async fn unparsable_commentary_skips_only_that_item() {
    let store = three_sources();
    let llm = scripted(
        |_| Ok(GOOD_VERDICT.into()),
        |title| {
            if title == "Org design after the merger" {
                Ok("Sorry, I can't format that as JSON.".into())
            } else {
                Ok(GOOD_ANGLE.into())
            }
        },
    );
    let report = pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    assert!(report.success);
    assert_eq!(report.stats.articles_passed, 9);
    assert_eq!(report.stats.articles_curated, 8);
    assert!(report.stats.errors.is_empty());
    assert_eq!(store.runs()[0].status, RunStatus::Completed);
    let curated = store.curated_articles().await.unwrap();
    assert!(curated.iter().all(|c| c.article.title != "Org design after the merger"));
}

#[tokio::test]
async fn malformed_verdict_degrades_to_placeholder() {
    let store = three_sources();
    let llm = scripted(
        |title| match title {
            "The quiet power of purpose" => Ok("relevance: high".into()),
            "AI copilots in the boardroom" => Ok(
                r#"{"relevance":9,"primary":"Futurist","related":[],"reason":"x","angle_hint":null}"#.into(),
            ),
            _ => Ok(GOOD_VERDICT.into()),
        },
        |_| Ok(GOOD_ANGLE.into()),
    );
    let report = pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    assert_eq!(report.stats.articles_classified, 9);
    assert_eq!(report.stats.articles_passed, 7);
    assert!(report.stats.errors.is_empty());

    let raw = store.raw_articles().await.unwrap();
    for title in ["The quiet power of purpose", "AI copilots in the boardroom"] {
        let r = raw.iter().find(|r| r.title == title).unwrap();
        assert!(r.processed);
        let v = store.classification_for(r.id).await.unwrap().unwrap();
        assert_eq!(v.relevance, 0);
        assert_eq!(v.primary, None);
        assert_eq!(v.reason, "Parse error");
    }
}

#[tokio::test]
async fn category_invariant_holds_for_stored_verdicts() {
    let store = three_sources();
    let llm = scripted(
        |_| Ok(r#"{"relevance":8,"primary":"Culture-Architect","related":["culture architect","Operator","Strategist","Operator"],"reason":"r","angle_hint":"Culture eats plans"}"#.into()),
        |_| Ok(GOOD_ANGLE.into()),
    );
    pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    for raw in store.raw_articles().await.unwrap() {
        let v = store.classification_for(raw.id).await.unwrap().expect("processed => classified");
        let primary = v.primary.expect("valid verdict has a primary");
        assert!(v.related.len() <= 2);
        assert!(!v.related.contains(&primary));
        assert_eq!(v.related, vec![Dimension::Operator, Dimension::Strategist]);
    }
}

#[tokio::test]
async fn transport_failure_is_item_level() {
    let store = three_sources();
    let llm = scripted(
        |title| {
            if title == "Five data points on hybrid culture" {
                Err(LlmError::Status {
                    status: 529,
                    body: "overloaded".into(),
                })
            } else {
                Ok(GOOD_VERDICT.into())
            }
        },
        |title| {
            if title == "Negotiating across silos" {
                Err(LlmError::Status {
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(GOOD_ANGLE.into())
            }
        },
    );
    let report = pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    assert_eq!(report.stats.articles_classified, 9);
    assert_eq!(report.stats.articles_passed, 8);
    assert_eq!(report.stats.articles_curated, 7);
    assert_eq!(report.stats.errors.len(), 2);
    assert_eq!(store.runs()[0].status, RunStatus::Completed);

    let raw = store.raw_articles().await.unwrap();
    let failed = raw.iter().find(|r| r.title == "Five data points on hybrid culture").unwrap();
    let v = store.classification_for(failed.id).await.unwrap().unwrap();
    assert!(v.reason.starts_with("Request failed"));
}

#[tokio::test]
async fn missing_api_key_fails_the_run() {
    let store = three_sources();
    let llm = Arc::new(MockLlm::new(|_| Err(LlmError::MissingApiKey(API_KEY_ENV))));
    let err = pipeline(&store, &llm, &fast_config()).run().await.unwrap_err();

    assert!(matches!(&err, PipelineError::MissingConfig(m) if m == "Missing ANTHROPIC_API_KEY"));
    let runs = store.runs();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].error_log.as_deref(), Some(err.to_string().as_str()));
    assert_eq!(runs[0].stats.articles_fetched, 9);
    assert_eq!(runs[0].stats.articles_classified, 0);
    assert!(store.curated_articles().await.unwrap().is_empty());
}

#[tokio::test]
async fn store_outage_mid_run_is_recorded_as_failed() {
    let store = three_sources();
    store.fail_on(StoreOp::InsertCurated);
    let llm = happy_llm();
    let err = pipeline(&store, &llm, &fast_config()).run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Store(_)));
    let run = &store.runs()[0];
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_log.is_some());
    assert_eq!(run.stats.articles_classified, 9);
    assert_eq!(run.stats.articles_curated, 0);
    assert_eq!(run.stats.errors.len(), 1);
}

#[tokio::test]
async fn run_without_record_still_completes() {
    let store = three_sources();
    store.fail_on(StoreOp::CreateRun);
    let llm = happy_llm();
    let report = pipeline(&store, &llm, &fast_config()).run().await.unwrap();

    assert_eq!(report.run_id, None);
    assert_eq!(report.stats.articles_curated, 9);
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn batch_cap_spreads_work_across_runs() {
    let store = three_sources();
    let llm = happy_llm();
    let mut cfg = fast_config();
    cfg.pipeline.batch_size = 4;
    let p = pipeline(&store, &llm, &cfg);

    let classified: Vec<usize> = {
        let mut v = Vec::new();
        for _ in 0..3 {
            v.push(p.run().await.unwrap().stats.articles_classified);
        }
        v
    };
    assert_eq!(classified, vec![4, 4, 1]);

    let last = p.run().await.unwrap();
    assert_eq!(last.message.as_deref(), Some(NO_NEW_ARTICLES));
    assert_eq!(store.curated_articles().await.unwrap().len(), 9);
}

#[tokio::test]
async fn empty_source_list_is_a_normal_run() {
    let store = Arc::new(MemoryStore::new());
    let llm = happy_llm();
    let report = pipeline(&store, &llm, &fast_config()).run().await.unwrap();
    assert_eq!(report.stats.articles_fetched, 0);
    assert_eq!(report.message.as_deref(), Some(NO_NEW_ARTICLES));
    assert_eq!(store.runs()[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn repeated_titles_get_distinct_slugs() {
    let feed = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://d.example</link><description>d</description>
<item><title>Leading Through Ambiguity</title><link>https://d.example/1</link></item>
<item><title>Leading through ambiguity!</title><link>https://d.example/2</link></item>
</channel></rss>"#;
    let store = Arc::new(MemoryStore::with_sources([("Dup", "https://d.example/feed")]));
    let fetcher = Arc::new(FixtureFeedFetcher::new().with_feed("https://d.example/feed", feed));
    let llm = happy_llm();
    let p = Pipeline::new(store.clone(), fetcher, llm, &fast_config());
    p.run().await.unwrap();

    let curated = store.curated_articles().await.unwrap();
    assert_eq!(curated.len(), 2);
    assert_eq!(curated[0].article.slug, "leading-through-ambiguity");
    let second = &curated[1].article.slug;
    assert!(second.starts_with("leading-through-ambiguity-"));
    assert_eq!(second.len(), "leading-through-ambiguity-".len() + 8);
}

#[tokio::test]
async fn concurrent_trigger_is_rejected() {
    let store = three_sources();
    let llm = happy_llm();
    let mut cfg = fast_config();
    cfg.pipeline.classify_delay_ms = 150;
    let p = Arc::new(pipeline(&store, &llm, &cfg));

    let first = {
        let p = p.clone();
        tokio::spawn(async move { p.run().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(p.is_running());
    assert!(matches!(p.run().await, Err(PipelineError::AlreadyRunning)));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.stats.articles_curated, 9);
    assert_eq!(store.runs().len(), 1, "rejected trigger must not create a run");
}
