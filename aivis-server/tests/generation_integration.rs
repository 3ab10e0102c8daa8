//! Query generation integration tests against `MemoryStore` with scripted
//! chat backends. The PAA test mocks SerpAPI with wiremock.

use aivis_core::llm::{ChatBackend, ChatCompletion, ChatRequest, LlmError};
use aivis_core::ranking::RankingLimits;
use aivis_core::serp::{SerpApiClient, SerpClientConfig};
use aivis_core::{CircuitBreaker, MemoryStore};
use aivis_server::subsystems::generate::{GenerationContext, GenerationSettings, QueryGenerator};
use aivis_server::subsystems::paa::PaaService;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ScriptedBackend {
    name: String,
    reply: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn ok(name: &str, reply: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Some(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(name: &str, reply: serde_json::Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Some(reply.to_string()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn raw(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Some(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Some(content) => Ok(ChatCompletion {
                content: content.clone(),
                tokens_in: None,
                tokens_out: None,
            }),
            None => Err(LlmError::EmptyResponse),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn settings(total_cap: usize, persona_slice: usize) -> GenerationSettings {
    GenerationSettings {
        limits: RankingLimits {
            per_provider_cap: 3,
            min_branded: 1,
            branded_bonus: 150,
        },
        total_cap,
        persona_slice,
        budget: Duration::from_secs(30),
        cooldown: chrono::Duration::minutes(10),
        weights_limit: 500,
        weights_property: None,
        paa_max_calls: 6,
        paa_max_questions_per_seed: 4,
        paa_score: 40,
    }
}

fn store_with_topic(personas: usize) -> (Arc<MemoryStore>, i64) {
    let store = Arc::new(MemoryStore::new());
    store.add_brand("acme", "Acme", &["Acme", "Acme Bet"]);
    store.add_brand("globex", "Globex", &["Globex"]);
    let topic = store.add_topic("Sports betting", "sportsbook", "en", "us");
    for i in 0..personas {
        store.add_persona(topic, &format!("Persona {i}"), "Bets on weekends", Some("acme"));
    }
    (store, topic)
}

fn generator(
    store: &Arc<MemoryStore>,
    providers: Vec<Arc<ScriptedBackend>>,
    breaker: CircuitBreaker,
    paa: Option<Arc<PaaService>>,
    settings: GenerationSettings,
) -> QueryGenerator {
    let providers = providers
        .into_iter()
        .map(|p| p as Arc<dyn ChatBackend>)
        .collect();
    QueryGenerator::new(store.clone(), providers, breaker, paa, settings)
}

// ===========================================================================
// TEST 1: selection is balanced across providers and preseeds branded queries
// ===========================================================================
#[tokio::test]
async fn test_balanced_selection_across_providers() {
    let (store, topic) = store_with_topic(1);
    let alpha = ScriptedBackend::ok(
        "alpha",
        serde_json::json!({
            "generic": ["best sportsbook", "nfl odds today", "parlay tips"],
            "branded": ["acme promo code", "acme bet review"]
        }),
    );
    let beta = ScriptedBackend::ok(
        "beta",
        serde_json::json!({
            "generic": ["Best Sportsbook", "live betting apps"],
            "branded": ["acme login"]
        }),
    );
    let generator = generator(
        &store,
        vec![alpha, beta],
        CircuitBreaker::in_memory(3, 300),
        None,
        settings(4, 4),
    );

    let mut ctx = generator.new_context();
    let batch = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(batch.processed_personas, 1);
    assert_eq!(batch.generated, 4);
    assert!(batch.done);

    let suggestions = store.suggestions();
    let texts: HashSet<&str> = suggestions.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(
        texts,
        HashSet::from(["acme promo code", "acme login", "best sportsbook", "live betting apps"])
    );

    let sources: HashSet<&str> = suggestions.iter().map(|s| s.source.as_str()).collect();
    assert_eq!(
        sources,
        HashSet::from(["alpha-branded", "beta-branded", "alpha-generic", "beta-generic"])
    );

    for s in &suggestions {
        let expected = if s.source.ends_with("branded") { 65 } else { 60 };
        assert_eq!(s.score_auto, expected, "score for {}", s.text);
        assert_eq!(s.category, "sportsbook");
    }
}

// ===========================================================================
// TEST 2: failing provider is skipped and its breaker opens
// ===========================================================================
#[tokio::test]
async fn test_failing_provider_skipped_and_breaker_opens() {
    let (store, topic) = store_with_topic(2);
    let alpha = ScriptedBackend::failing("alpha");
    let beta = ScriptedBackend::ok(
        "beta",
        serde_json::json!({"generic": ["live betting apps"], "branded": ["acme login"]}),
    );
    let generator = generator(
        &store,
        vec![alpha.clone(), beta.clone()],
        CircuitBreaker::in_memory(1, 300),
        None,
        settings(4, 4),
    );

    let mut ctx = generator.new_context();
    let batch = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(batch.processed_personas, 2);
    assert_eq!(alpha.calls(), 1, "breaker open after the first failure");
    assert_eq!(beta.calls(), 2);
    assert!(store.suggestions().iter().all(|s| s.source.starts_with("beta-")));
    assert_eq!(batch.generated, 4);
}

// ===========================================================================
// TEST 3: an expired deadline does no work
// ===========================================================================
#[tokio::test]
async fn test_expired_deadline_processes_nothing() {
    let (store, topic) = store_with_topic(3);
    let alpha = ScriptedBackend::ok("alpha", serde_json::json!({"generic": ["q"]}));
    let generator = generator(
        &store,
        vec![alpha.clone()],
        CircuitBreaker::in_memory(3, 300),
        None,
        settings(4, 4),
    );

    let mut ctx = GenerationContext::new(Duration::ZERO, 0);
    let batch = generator.process_topic_personas(topic, 1, &mut ctx).await.unwrap();
    assert_eq!(batch.processed_personas, 0);
    assert_eq!(batch.generated, 0);
    assert_eq!(batch.next_persona, 1);
    assert!(!batch.done);
    assert_eq!(alpha.calls(), 0);
}

// ===========================================================================
// TEST 4: slices, full-topic generation, cooldown and force
// ===========================================================================
#[tokio::test]
async fn test_slices_cooldown_and_force() {
    let (store, topic) = store_with_topic(3);
    let alpha = ScriptedBackend::ok(
        "alpha",
        serde_json::json!({"generic": ["live betting apps"], "branded": ["acme login"]}),
    );
    let generator = generator(
        &store,
        vec![alpha.clone()],
        CircuitBreaker::in_memory(3, 300),
        None,
        settings(4, 2),
    );

    let mut ctx = generator.new_context();
    let first = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(first.processed_personas, 2);
    assert_eq!(first.next_persona, 2);
    assert!(!first.done);
    assert!(store.topic(topic).unwrap().last_generated_at.is_none());

    let summary = generator.generate_topic(topic, false).await.unwrap();
    assert!(summary.completed);
    assert_eq!(summary.processed_personas, 3);
    assert_eq!(summary.generated, 2, "only the third persona is new");
    assert!(store.topic(topic).unwrap().last_generated_at.is_some());
    let calls_after_full = alpha.calls();

    let cooling = generator.generate_topic(topic, false).await.unwrap();
    assert!(!cooling.completed);
    assert!(cooling.cooldown_remaining_secs.unwrap() > 0);
    assert_eq!(alpha.calls(), calls_after_full);

    let forced = generator.generate_topic(topic, true).await.unwrap();
    assert!(forced.completed);
    assert_eq!(forced.generated, 0, "suggestions are insert-or-ignore");
    assert_eq!(alpha.calls(), calls_after_full + 3);
}

// ===========================================================================
// TEST 5: unparsable provider output contributes nothing
// ===========================================================================
#[tokio::test]
async fn test_unparsable_output_contributes_nothing() {
    let (store, topic) = store_with_topic(2);
    let alpha = ScriptedBackend::raw("alpha", "Sorry, I can't help with that.");
    let generator = generator(
        &store,
        vec![alpha],
        CircuitBreaker::in_memory(5, 300),
        None,
        settings(4, 4),
    );

    let mut ctx = generator.new_context();
    let batch = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(batch.processed_personas, 2);
    assert_eq!(batch.generated, 0);
    assert!(batch.done);
    assert!(store.suggestions().is_empty());
}

// ===========================================================================
// TEST 6: fenced JSON replies are accepted
// ===========================================================================
#[tokio::test]
async fn test_fenced_json_reply() {
    let (store, topic) = store_with_topic(1);
    let alpha = ScriptedBackend::raw(
        "alpha",
        "```json\n{\"generic\": [\"nfl odds today\"], \"branded\": []}\n```",
    );
    let generator = generator(
        &store,
        vec![alpha],
        CircuitBreaker::in_memory(3, 300),
        None,
        settings(4, 4),
    );

    let mut ctx = generator.new_context();
    let batch = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(batch.generated, 1);
    assert_eq!(store.suggestions()[0].source, "alpha-generic");
}

// ===========================================================================
// TEST 7: PAA questions are filtered by seed kind and stored at score 40
// ===========================================================================
#[tokio::test]
async fn test_paa_enrichment_filters_questions() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "related_questions": [
                {"question": "Is acme legit?"},
                {"question": "acme vs globex bonus"},
                {"question": "how do betting odds work"}
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let serp = SerpApiClient::new(SerpClientConfig::new(Some("k".to_string()), server.uri())).unwrap();
    let paa = Arc::new(PaaService::new(Arc::new(serp)));

    let (store, topic) = store_with_topic(1);
    let alpha = ScriptedBackend::ok(
        "alpha",
        serde_json::json!({"generic": ["betting odds explained"], "branded": ["acme bonus"]}),
    );
    let generator = generator(
        &store,
        vec![alpha],
        CircuitBreaker::in_memory(3, 300),
        Some(paa),
        settings(2, 4),
    );

    let mut ctx = generator.new_context();
    let batch = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(batch.generated, 4);

    let suggestions = store.suggestions();
    let branded_q = suggestions.iter().find(|s| s.text == "Is acme legit?").unwrap();
    assert_eq!(branded_q.source, "paa-serpapi-branded");
    assert_eq!(branded_q.score_auto, 40);
    let generic_q = suggestions
        .iter()
        .find(|s| s.text == "how do betting odds work")
        .unwrap();
    assert_eq!(generic_q.source, "paa-serpapi");
    assert!(suggestions.iter().all(|s| s.text != "acme vs globex bonus"));
}

// ===========================================================================
// TEST 8: a call started before the deadline runs to completion
// ===========================================================================
#[tokio::test]
async fn test_started_call_outlives_deadline() {
    let (store, topic) = store_with_topic(2);
    let alpha = ScriptedBackend::slow(
        "alpha",
        serde_json::json!({"generic": ["live betting apps"], "branded": ["acme login"]}),
        Duration::from_millis(300),
    );
    let breaker = CircuitBreaker::in_memory(1, 300);
    let generator = generator(&store, vec![alpha.clone()], breaker.clone(), None, settings(4, 4));

    let mut ctx = GenerationContext::new(Duration::from_millis(100), 0);
    let batch = generator.process_topic_personas(topic, 0, &mut ctx).await.unwrap();
    assert_eq!(batch.processed_personas, 1);
    assert_eq!(batch.generated, 2, "the slow reply is still stored");
    assert_eq!(batch.next_persona, 1);
    assert!(!batch.done, "the second persona was never started");
    assert_eq!(alpha.calls(), 1);
    assert!(breaker.allow("alpha").await, "running past the deadline is not a failure");
    assert_eq!(store.suggestions().len(), 2);
}
