use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;
use websift_core::{Error, Result, SnippetQuery, SnippetResponse, SnippetSource, SourceRecord};

fn timeout_ms_from_query(q: &SnippetQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    // Keep a conservative cap even if callers pass something huge.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

fn brave_api_key_from_env() -> Option<String> {
    std::env::var("WEBSIFT_BRAVE_API_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            std::env::var("BRAVE_SEARCH_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}

fn brave_endpoint_from_env() -> Option<String> {
    std::env::var("WEBSIFT_BRAVE_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct BraveSnippetSource {
    client: reqwest::Client,
    api_key: String,
}

impl BraveSnippetSource {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = brave_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing WEBSIFT_BRAVE_API_KEY (or BRAVE_SEARCH_API_KEY)".to_string(),
            )
        })?;
        Ok(Self { client, api_key })
    }

    fn endpoint() -> String {
        // Docs: https://api.search.brave.com/res/v1/web/search
        brave_endpoint_from_env()
            .unwrap_or_else(|| "https://api.search.brave.com/res/v1/web/search".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct BraveWebSearchResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    url: String,
    title: Option<String>,
    description: Option<String>,
    age: Option<String>,
    extra_snippets: Option<Vec<String>>,
}

fn records_from_brave(parsed: BraveWebSearchResponse) -> Vec<SourceRecord> {
    let mut out = Vec::new();
    let Some(results) = parsed.web.and_then(|w| w.results) else {
        return out;
    };
    for r in results {
        // A record without a parseable URL cannot be cited downstream.
        if url::Url::parse(&r.url).is_err() {
            continue;
        }
        let mut snippets = Vec::new();
        if let Some(d) = r.description {
            if !d.trim().is_empty() {
                snippets.push(d);
            }
        }
        snippets.extend(r.extra_snippets.unwrap_or_default());
        out.push(SourceRecord {
            title: r.title.unwrap_or_default(),
            url: r.url,
            age: r.age,
            snippets,
        });
    }
    out
}

#[async_trait::async_trait]
impl SnippetSource for BraveSnippetSource {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn fetch_snippets(&self, q: &SnippetQuery) -> Result<SnippetResponse> {
        let query = q.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidParams("query must be non-empty".to_string()));
        }

        let t0 = Instant::now();
        let timeout_ms = timeout_ms_from_query(q);

        let mut req = self
            .client
            .get(Self::endpoint())
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("extra_snippets", "true")]);

        if let Some(n) = q.count {
            // Brave uses `count` for result count.
            req = req.query(&[("count", n.to_string())]);
        }

        let resp = req
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("brave search HTTP {status}")));
        }

        let parsed: BraveWebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let records = records_from_brave(parsed);

        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());
        debug!(
            records = records.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "brave snippet fetch complete"
        );

        Ok(SnippetResponse {
            records,
            provider: "brave".to_string(),
            timings_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::get, Router};
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    #[test]
    fn empty_api_keys_are_treated_as_missing() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("WEBSIFT_BRAVE_API_KEY", "");
        let _g2 = EnvGuard::set("BRAVE_SEARCH_API_KEY", "   ");
        // These should behave the same as "unset".
        assert!(brave_api_key_from_env().is_none());
        assert!(BraveSnippetSource::from_env(reqwest::Client::new()).is_err());
    }

    #[test]
    fn parses_minimal_brave_shape() {
        let js = r#"
        {
          "web": {
            "results": [
              {"url":"https://example.com","title":"Example","description":"Hello"}
            ]
          }
        }
        "#;
        let parsed: BraveWebSearchResponse = serde_json::from_str(js).unwrap();
        let web = parsed.web.unwrap();
        let rs = web.results.unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].url, "https://example.com");
        assert_eq!(rs[0].title.as_deref(), Some("Example"));
        assert_eq!(rs[0].description.as_deref(), Some("Hello"));
        assert!(rs[0].age.is_none());
        assert!(rs[0].extra_snippets.is_none());
    }

    #[test]
    fn records_keep_description_first_then_extra_snippets() {
        let js = r#"
        {
          "web": {
            "results": [
              {"url":"https://a.test/","title":"A","description":"lead","age":"2 days ago",
               "extra_snippets":["more one","more two"]},
              {"url":"https://b.test/","title":"B","description":"   "}
            ]
          }
        }
        "#;
        let parsed: BraveWebSearchResponse = serde_json::from_str(js).unwrap();
        let records = records_from_brave(parsed);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].snippets, vec!["lead", "more one", "more two"]);
        assert_eq!(records[0].age.as_deref(), Some("2 days ago"));
        // Whitespace-only descriptions contribute nothing.
        assert!(records[1].snippets.is_empty());
    }

    #[test]
    fn records_skip_results_with_unparsable_urls() {
        let js = r#"
        {
          "web": {
            "results": [
              {"url":"not a url","title":"bad"},
              {"url":"https://ok.test/","title":"good","description":"fine"}
            ]
          }
        }
        "#;
        let parsed: BraveWebSearchResponse = serde_json::from_str(js).unwrap();
        let records = records_from_brave(parsed);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://ok.test/");
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn rejects_blank_queries_before_any_request() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("WEBSIFT_BRAVE_API_KEY", "test-key");

        let src = BraveSnippetSource::from_env(reqwest::Client::new()).unwrap();
        let err = src
            .fetch_snippets(&SnippetQuery {
                query: "   ".to_string(),
                count: None,
                timeout_ms: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn fetches_and_parses_brave_shaped_fixture() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let app = Router::new().route(
            "/res/v1/web/search",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"web":{"results":[
                        {"url":"https://example.com/a","title":"A","description":"first snippet",
                         "age":"2 days ago","extra_snippets":["second snippet"]},
                        {"url":"not a url","title":"bad","description":"skipped"}
                    ]}}"#,
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let _g1 = EnvGuard::set("WEBSIFT_BRAVE_API_KEY", "test-key");
        let endpoint = format!("http://{addr}/res/v1/web/search");
        let _g2 = EnvGuard::set("WEBSIFT_BRAVE_ENDPOINT", &endpoint);

        let src = BraveSnippetSource::from_env(reqwest::Client::new()).unwrap();
        let resp = src
            .fetch_snippets(&SnippetQuery {
                query: "bananas".to_string(),
                count: Some(8),
                timeout_ms: Some(2_000),
            })
            .await
            .unwrap();

        assert_eq!(resp.provider, "brave");
        assert_eq!(resp.records.len(), 1);
        assert_eq!(resp.records[0].url, "https://example.com/a");
        assert_eq!(resp.records[0].age.as_deref(), Some("2 days ago"));
        assert_eq!(resp.records[0].snippets, vec!["first snippet", "second snippet"]);
        assert!(resp.timings_ms.contains_key("search"));
    }
}
