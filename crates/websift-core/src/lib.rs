use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One retrieved page: title, URL, optional freshness label, and the raw
/// snippet strings the search backend returned for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub title: String,
    pub url: String,
    /// Freshness label as reported by the backend (e.g. "2 days ago").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(default)]
    pub snippets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Filtered, deduplicated, budget-bounded context for model consumption.
    Compact,
    /// Unfiltered passthrough of every record's raw snippets.
    Full,
}

impl ResponseMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceMode {
    Disabled,
    Strict,
    Lenient,
    Balanced,
}

impl RelevanceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "strict" => Some(Self::Strict),
            "lenient" => Some(Self::Lenient),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Strict => "strict",
            Self::Lenient => "lenient",
            Self::Balanced => "balanced",
        }
    }

    /// Minimum score a candidate must reach to survive selection.
    ///
    /// A single matched query term contributes >= 1.0 to a score while the
    /// length bonus stays below 0.3, so `Strict` means "at least one term
    /// matched" and the middle modes gate only on very short snippets.
    pub fn min_score(self) -> f64 {
        match self {
            Self::Disabled => 0.0,
            Self::Lenient => 0.05,
            Self::Balanced => 0.2,
            Self::Strict => 1.0,
        }
    }
}

/// Caller-supplied limit overrides; `None` means "use the profile value".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedLimits {
    pub count: Option<usize>,
    pub max_urls: Option<usize>,
    pub max_tokens: Option<usize>,
    pub max_snippets: Option<usize>,
    pub max_tokens_per_url: Option<usize>,
    pub max_snippets_per_url: Option<usize>,
    pub max_snippet_chars: Option<usize>,
    pub max_output_chars: Option<usize>,
}

/// Fully resolved operating limits for one invocation.
///
/// In compact mode every numeric field is clamped to its compact-profile
/// default even when the caller asks for more; in full mode the caller's
/// values pass through and the profile only fills gaps. The token fields are
/// resolved like the rest so the clamping law holds uniformly, but the
/// compact pipeline budgets in characters and snippet counts; tokens are
/// advisory for callers that meter them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveLimits {
    pub count: usize,
    pub max_urls: usize,
    pub max_tokens: usize,
    pub max_snippets: usize,
    pub max_tokens_per_url: usize,
    pub max_snippets_per_url: usize,
    pub max_snippet_chars: usize,
    pub max_output_chars: usize,
    pub relevance_mode: RelevanceMode,
}

impl EffectiveLimits {
    /// Compact-profile defaults; also the compact-mode ceilings.
    pub const COMPACT: EffectiveLimits = EffectiveLimits {
        count: 8,
        max_urls: 8,
        max_tokens: 2048,
        max_snippets: 16,
        max_tokens_per_url: 512,
        max_snippets_per_url: 2,
        max_snippet_chars: 400,
        max_output_chars: 8000,
        relevance_mode: RelevanceMode::Strict,
    };

    /// Full-mode upper bounds, enforced by the request schema layer rather
    /// than by the pipeline. They double as full-mode defaults.
    pub const FULL: EffectiveLimits = EffectiveLimits {
        count: 20,
        max_urls: 20,
        max_tokens: 8192,
        max_snippets: 64,
        max_tokens_per_url: 2048,
        max_snippets_per_url: 8,
        max_snippet_chars: 2000,
        max_output_chars: 50_000,
        relevance_mode: RelevanceMode::Disabled,
    };

    pub fn resolve(
        requested: &RequestedLimits,
        mode: ResponseMode,
        relevance: Option<RelevanceMode>,
    ) -> Self {
        fn capped(requested: Option<usize>, ceiling: usize) -> usize {
            requested.unwrap_or(ceiling).min(ceiling)
        }

        match mode {
            ResponseMode::Compact => {
                let d = Self::COMPACT;
                EffectiveLimits {
                    count: capped(requested.count, d.count),
                    max_urls: capped(requested.max_urls, d.max_urls),
                    max_tokens: capped(requested.max_tokens, d.max_tokens),
                    max_snippets: capped(requested.max_snippets, d.max_snippets),
                    max_tokens_per_url: capped(requested.max_tokens_per_url, d.max_tokens_per_url),
                    max_snippets_per_url: capped(
                        requested.max_snippets_per_url,
                        d.max_snippets_per_url,
                    ),
                    max_snippet_chars: capped(requested.max_snippet_chars, d.max_snippet_chars),
                    max_output_chars: capped(requested.max_output_chars, d.max_output_chars),
                    relevance_mode: relevance.unwrap_or(d.relevance_mode),
                }
            }
            ResponseMode::Full => {
                let b = Self::FULL;
                EffectiveLimits {
                    count: requested.count.unwrap_or(b.count),
                    max_urls: requested.max_urls.unwrap_or(b.max_urls),
                    max_tokens: requested.max_tokens.unwrap_or(b.max_tokens),
                    max_snippets: requested.max_snippets.unwrap_or(b.max_snippets),
                    max_tokens_per_url: requested
                        .max_tokens_per_url
                        .unwrap_or(b.max_tokens_per_url),
                    max_snippets_per_url: requested
                        .max_snippets_per_url
                        .unwrap_or(b.max_snippets_per_url),
                    max_snippet_chars: requested.max_snippet_chars.unwrap_or(b.max_snippet_chars),
                    max_output_chars: requested.max_output_chars.unwrap_or(b.max_output_chars),
                    relevance_mode: relevance.unwrap_or(b.relevance_mode),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetQuery {
    pub query: String,
    pub count: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetResponse {
    pub records: Vec<SourceRecord>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

/// Supplies per-URL snippet records for a query. The compaction pipeline
/// never fetches anything itself; this is its only upstream seam.
#[async_trait::async_trait]
pub trait SnippetSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_snippets(&self, q: &SnippetQuery) -> Result<SnippetResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_mode_clamps_every_field_to_profile_default() {
        let req = RequestedLimits {
            count: Some(100),
            max_urls: Some(100),
            max_tokens: Some(1_000_000),
            max_snippets: Some(100),
            max_tokens_per_url: Some(1_000_000),
            max_snippets_per_url: Some(100),
            max_snippet_chars: Some(1_000_000),
            max_output_chars: Some(1_000_000),
        };
        let eff = EffectiveLimits::resolve(&req, ResponseMode::Compact, None);
        assert_eq!(eff, EffectiveLimits::COMPACT);
    }

    #[test]
    fn compact_mode_keeps_requests_below_the_ceiling() {
        let req = RequestedLimits {
            max_snippets_per_url: Some(1),
            max_output_chars: Some(140),
            ..RequestedLimits::default()
        };
        let eff = EffectiveLimits::resolve(&req, ResponseMode::Compact, None);
        assert_eq!(eff.max_snippets_per_url, 1);
        assert_eq!(eff.max_output_chars, 140);
        // Unset fields fall back to the profile.
        assert_eq!(eff.max_snippets, EffectiveLimits::COMPACT.max_snippets);
        assert_eq!(eff.relevance_mode, RelevanceMode::Strict);
    }

    #[test]
    fn full_mode_passes_requested_limits_through() {
        let req = RequestedLimits {
            max_output_chars: Some(123_456),
            ..RequestedLimits::default()
        };
        let eff = EffectiveLimits::resolve(&req, ResponseMode::Full, None);
        assert_eq!(eff.max_output_chars, 123_456);
        assert_eq!(eff.count, EffectiveLimits::FULL.count);
    }

    #[test]
    fn mode_parsing_is_case_insensitive_and_strict_on_unknowns() {
        assert_eq!(ResponseMode::parse(" Compact "), Some(ResponseMode::Compact));
        assert_eq!(ResponseMode::parse("FULL"), Some(ResponseMode::Full));
        assert_eq!(ResponseMode::parse("verbose"), None);
        assert_eq!(RelevanceMode::parse("balanced"), Some(RelevanceMode::Balanced));
        assert_eq!(RelevanceMode::parse(""), None);
    }

    #[test]
    fn relevance_thresholds_keep_single_term_match_above_strict_gate() {
        // One matched term always contributes >= 1.0; the length bonus alone
        // cannot reach it.
        assert!(RelevanceMode::Strict.min_score() <= 1.0);
        assert!(RelevanceMode::Balanced.min_score() < 1.0);
        assert!(RelevanceMode::Lenient.min_score() < RelevanceMode::Balanced.min_score());
        assert_eq!(RelevanceMode::Disabled.min_score(), 0.0);
    }

    #[test]
    fn source_record_serializes_without_null_age() {
        let rec = SourceRecord {
            title: "Example".to_string(),
            url: "https://example.com".to_string(),
            age: None,
            snippets: vec!["hello".to_string()],
        };
        let js = serde_json::to_string(&rec).expect("serialize");
        assert!(!js.contains("age"));
        let back: SourceRecord = serde_json::from_str(&js).expect("roundtrip");
        assert_eq!(back.url, rec.url);
    }
}
