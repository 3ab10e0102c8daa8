//! People-Also-Ask lookups for generated seeds.
//!
//! Lookups are cached per `(query, locale)` for the life of the process and
//! gated by the per-request call budget and deadline in `GenerationContext`.

use crate::subsystems::generate::GenerationContext;
use aivis_core::normalize;
use aivis_core::serp::SerpApiClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct PaaService {
    client: Arc<SerpApiClient>,
    cache: Mutex<HashMap<(String, String), Vec<String>>>,
}

impl PaaService {
    pub fn new(client: Arc<SerpApiClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(query: &str, hl: &str, gl: &str) -> (String, String) {
        (normalize::normalize(query), format!("{hl}-{gl}"))
    }

    fn cached(&self, key: &(String, String)) -> Option<Vec<String>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Related questions for `query`. Budget exhaustion, an expired deadline
    /// and provider failures all yield an empty list. A lookup that has
    /// started is not cut off by the deadline.
    pub async fn questions(&self, query: &str, hl: &str, gl: &str, ctx: &mut GenerationContext) -> Vec<String> {
        let key = Self::cache_key(query, hl, gl);
        if let Some(hit) = self.cached(&key) {
            return hit;
        }
        if ctx.expired() {
            return Vec::new();
        }
        if !ctx.take_paa_call() {
            tracing::debug!(query, "PAA call budget exhausted");
            return Vec::new();
        }

        match self.client.related_questions(query, hl, gl).await {
            Ok(questions) => {
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.insert(key, questions.clone());
                questions
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "PAA lookup failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aivis_core::serp::SerpClientConfig;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(server: &MockServer) -> PaaService {
        let config = SerpClientConfig::new(Some("k".to_string()), server.uri());
        PaaService::new(Arc::new(SerpApiClient::new(config).unwrap()))
    }

    async fn mount_questions(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "related_questions": [{"question": "Is acme legit?"}]
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network_and_budget() {
        let server = MockServer::start().await;
        mount_questions(&server, 1).await;
        let paa = service(&server).await;
        let mut ctx = GenerationContext::new(Duration::from_secs(30), 1);

        let first = paa.questions("acme review", "en", "us", &mut ctx).await;
        let second = paa.questions("Acme review!", "en", "us", &mut ctx).await;
        assert_eq!(first, vec!["Is acme legit?"]);
        assert_eq!(second, first);
        assert_eq!(paa.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_budget_limits_calls() {
        let server = MockServer::start().await;
        mount_questions(&server, 1).await;
        let paa = service(&server).await;
        let mut ctx = GenerationContext::new(Duration::from_secs(30), 1);

        assert_eq!(paa.questions("one", "en", "us", &mut ctx).await.len(), 1);
        assert!(paa.questions("two", "en", "us", &mut ctx).await.is_empty());
    }

    #[tokio::test]
    async fn test_locale_is_part_of_cache_key() {
        let server = MockServer::start().await;
        mount_questions(&server, 2).await;
        let paa = service(&server).await;
        let mut ctx = GenerationContext::new(Duration::from_secs(30), 5);

        paa.questions("acme", "en", "us", &mut ctx).await;
        paa.questions("acme", "es", "mx", &mut ctx).await;
        assert_eq!(paa.cache_len(), 2);
    }

    #[tokio::test]
    async fn test_expired_deadline_makes_no_call() {
        let server = MockServer::start().await;
        mount_questions(&server, 0).await;
        let paa = service(&server).await;
        let mut ctx = GenerationContext::new(Duration::ZERO, 5);

        assert!(paa.questions("acme", "en", "us", &mut ctx).await.is_empty());
    }
}
