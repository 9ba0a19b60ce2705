//! # tether-kb
//!
//! Knowledge-base fan-out search: one query, many third-party retrieval
//! providers, one merged result list.
//!
//! [`KbSearcher::search`] fans the query out across the given references
//! under a bounded-parallelism gate with a per-item timeout, merges the
//! hits, re-sorts by score descending, and truncates to the requested
//! bound. A provider that fails or times out degrades to an empty partial
//! result — one slow knowledge base never sinks the whole search.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default cap on concurrent provider queries.
pub const DEFAULT_MAX_PARALLEL: usize = 4;
/// Default per-provider timeout.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(10);

/// Reference to one knowledge base a search should consult.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeBaseRef {
    /// Display name, attached to every hit it produces.
    pub name: String,
    /// Provider search endpoint.
    pub endpoint: String,
    /// Bearer token, when the provider requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-base result bound; defaults to the overall search bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

/// One retrieval hit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    /// Provider-reported relevance score; higher is better.
    pub score: f64,
    /// Retrieved passage.
    pub content: String,
    /// Provider-reported source (document id, URL, ...).
    pub source: String,
    /// Name of the knowledge base that produced the hit.
    #[serde(default)]
    pub kb_name: String,
}

/// Errors from a single provider query.
#[derive(Debug, Error)]
pub enum KbError {
    /// The request could not be performed.
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("provider returned status {0}")]
    Status(u16),

    /// The provider's body did not decode.
    #[error("provider response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A retrieval provider that can answer one knowledge-base query.
#[async_trait]
pub trait KbProvider: Send + Sync {
    /// Query one knowledge base for hits.
    async fn query(
        &self,
        kb: &KnowledgeBaseRef,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, KbError>;
}

/// HTTP provider speaking the conventional retrieval contract:
/// `POST endpoint {query, top_k}` → `{results: [{score, content, source}]}`.
#[derive(Clone, Debug)]
pub struct HttpKbProvider {
    http: reqwest::Client,
}

impl HttpKbProvider {
    /// Create a provider with a dedicated HTTP client.
    pub fn new() -> Result<Self, KbError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl KbProvider for HttpKbProvider {
    async fn query(
        &self,
        kb: &KnowledgeBaseRef,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, KbError> {
        let mut request = self
            .http
            .post(&kb.endpoint)
            .json(&json!({"query": query, "top_k": top_k}));
        if let Some(api_key) = &kb.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KbError::Status(status.as_u16()));
        }
        let body: Value = serde_json::from_str(&response.text().await?)?;
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let hits = results
            .into_iter()
            .map(|raw| SearchHit {
                score: raw.get("score").and_then(Value::as_f64).unwrap_or(0.0),
                content: raw
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                source: raw
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                kb_name: kb.name.clone(),
            })
            .collect();
        Ok(hits)
    }
}

/// Fan-out searcher over a set of knowledge bases.
pub struct KbSearcher {
    provider: Arc<dyn KbProvider>,
    max_parallel: usize,
    item_timeout: Duration,
}

impl KbSearcher {
    /// Create a searcher with the default gate and timeout.
    pub fn new(provider: Arc<dyn KbProvider>) -> Self {
        Self {
            provider,
            max_parallel: DEFAULT_MAX_PARALLEL,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }

    /// Override the parallelism gate and per-item timeout.
    #[must_use]
    pub fn with_limits(mut self, max_parallel: usize, item_timeout: Duration) -> Self {
        self.max_parallel = max_parallel.max(1);
        self.item_timeout = item_timeout;
        self
    }

    /// Search every referenced knowledge base and merge the results.
    ///
    /// Returns at most `limit` hits, sorted by score descending.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        refs: &[KnowledgeBaseRef],
    ) -> Vec<SearchHit> {
        let gate = Arc::new(Semaphore::new(self.max_parallel));
        let lookups = refs.iter().map(|kb| {
            let gate = Arc::clone(&gate);
            let provider = Arc::clone(&self.provider);
            let timeout = self.item_timeout;
            async move {
                // A closed semaphore is impossible here; treat it as empty.
                let Ok(_permit) = gate.acquire().await else {
                    return Vec::new();
                };
                match tokio::time::timeout(timeout, provider.query(kb, query, kb.top_k.unwrap_or(limit))).await {
                    Ok(Ok(hits)) => {
                        debug!(kb = %kb.name, count = hits.len(), "knowledge base answered");
                        hits
                    }
                    Ok(Err(error)) => {
                        warn!(kb = %kb.name, %error, "knowledge base query failed");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(kb = %kb.name, ?timeout, "knowledge base query timed out");
                        Vec::new()
                    }
                }
            }
        });

        let mut hits: Vec<SearchHit> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kb(name: &str) -> KnowledgeBaseRef {
        KnowledgeBaseRef {
            name: name.into(),
            endpoint: format!("http://kb.invalid/{name}"),
            api_key: None,
            top_k: None,
        }
    }

    fn hit(score: f64, content: &str, kb_name: &str) -> SearchHit {
        SearchHit {
            score,
            content: content.into(),
            source: format!("doc://{content}"),
            kb_name: kb_name.into(),
        }
    }

    /// Provider serving canned hits per base, with optional per-base delay.
    struct StubProvider {
        delay_for: Option<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                delay_for: None,
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn with_delay(name: &str, delay: Duration) -> Self {
            Self {
                delay_for: Some(name.into()),
                delay,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl KbProvider for StubProvider {
        async fn query(
            &self,
            kb: &KnowledgeBaseRef,
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<SearchHit>, KbError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.delay_for.as_deref() == Some(kb.name.as_str()) {
                tokio::time::sleep(self.delay).await;
            } else {
                // A small stall so concurrent queries overlap.
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match kb.name.as_str() {
                "alpha" => Ok(vec![hit(0.9, "a1", "alpha"), hit(0.3, "a2", "alpha")]),
                "beta" => Ok(vec![hit(0.7, "b1", "beta")]),
                "broken" => Err(KbError::Status(500)),
                _ => Ok(vec![hit(0.5, "c1", &kb.name)]),
            }
        }
    }

    #[tokio::test]
    async fn merges_sorts_and_truncates() {
        let searcher = KbSearcher::new(Arc::new(StubProvider::new()));
        let hits = searcher
            .search("q", 3, &[kb("alpha"), kb("beta"), kb("gamma")])
            .await;

        let contents: Vec<&str> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "b1", "c1"]);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn failed_provider_degrades_to_partial_results() {
        let searcher = KbSearcher::new(Arc::new(StubProvider::new()));
        let hits = searcher.search("q", 10, &[kb("alpha"), kb("broken")]).await;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.kb_name == "alpha"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_is_timed_out_not_awaited() {
        let provider = StubProvider::with_delay("beta", Duration::from_secs(3600));
        let searcher = KbSearcher::new(Arc::new(provider))
            .with_limits(4, Duration::from_secs(10));
        let hits = searcher.search("q", 10, &[kb("alpha"), kb("beta")]).await;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.kb_name == "alpha"));
    }

    #[tokio::test]
    async fn parallelism_is_bounded_by_the_gate() {
        let provider = Arc::new(StubProvider::new());
        let searcher = KbSearcher::new(Arc::clone(&provider) as Arc<dyn KbProvider>)
            .with_limits(2, Duration::from_secs(10));

        let refs: Vec<KnowledgeBaseRef> =
            (0..8).map(|index| kb(&format!("kb{index}"))).collect();
        let hits = searcher.search("q", 50, &refs).await;
        assert_eq!(hits.len(), 8);
        assert!(
            provider.max_in_flight.load(Ordering::SeqCst) <= 2,
            "gate must cap concurrent queries at 2, saw {}",
            provider.max_in_flight.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn empty_refs_is_empty_result() {
        let searcher = KbSearcher::new(Arc::new(StubProvider::new()));
        let hits = searcher.search("q", 10, &[]).await;
        assert!(hits.is_empty());
    }

    // -- HTTP provider --

    #[tokio::test]
    async fn http_provider_decodes_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_json(serde_json::json!({"query": "volume", "top_k": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"score": 0.82, "content": "set the volume", "source": "doc://manual/3"},
                    {"score": 0.4, "content": "mute", "source": "doc://manual/9"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpKbProvider::new().unwrap();
        let base = KnowledgeBaseRef {
            name: "manual".into(),
            endpoint: format!("{}/search", server.uri()),
            api_key: None,
            top_k: None,
        };
        let hits = provider.query(&base, "volume", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "set the volume");
        assert_eq!(hits[0].kb_name, "manual");
        assert!((hits[0].score - 0.82).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn http_provider_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;

        let provider = HttpKbProvider::new().unwrap();
        let base = KnowledgeBaseRef {
            name: "private".into(),
            endpoint: format!("{}/search", server.uri()),
            api_key: Some("sekrit".into()),
            top_k: None,
        };
        let hits = provider.query(&base, "q", 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn http_provider_non_2xx_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = HttpKbProvider::new().unwrap();
        let base = KnowledgeBaseRef {
            name: "limited".into(),
            endpoint: format!("{}/search", server.uri()),
            api_key: None,
            top_k: None,
        };
        let result = provider.query(&base, "q", 3).await;
        assert!(matches!(result, Err(KbError::Status(429))));
    }

    #[tokio::test]
    async fn ref_serde_defaults_optional_fields() {
        let base: KnowledgeBaseRef = serde_json::from_str(
            r#"{"name": "manual", "endpoint": "http://kb.invalid/search"}"#,
        )
        .unwrap();
        assert!(base.api_key.is_none());
        assert!(base.top_k.is_none());
    }
}
