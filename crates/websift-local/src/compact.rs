//! The context-compaction pipeline.
//!
//! Turns raw per-URL snippet records into a small, deduplicated,
//! relevance-ranked block of text that fits a character budget. The whole
//! pipeline is a pure function of its inputs: no I/O, no shared state, same
//! output for the same records and limits every time.

use crate::rank::{dedup_exact, query_terms, select_for_source, Candidate};
use crate::sanitize::{is_noise, sanitize_snippet};
use serde_json::Value;
use tracing::debug;
use websift_core::{EffectiveLimits, ResponseMode, SourceRecord};

/// A full-mode snippet: either a cleanly parsed JSON payload or plain text.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SnippetValue {
    Structured(Value),
    Text(String),
}

impl SnippetValue {
    /// Parse failure is not an error; the snippet stays as trimmed text.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(v) => SnippetValue::Structured(v),
            Err(_) => SnippetValue::Text(raw.trim().to_string()),
        }
    }
}

/// Sentence returned instead of structured lines when nothing survives.
pub fn empty_context_message(query: &str, url_filter: Option<&str>) -> String {
    match url_filter {
        Some(url) => {
            format!("No context snippets found for URL \"{url}\" with query \"{query}\"")
        }
        None => format!("No context snippets found for query \"{query}\""),
    }
}

/// Render retrieved source records as model-facing context text.
///
/// Compact mode runs the full filtering and budgeting pipeline. Full mode
/// emits one line per record with every raw snippet passed through, parsing
/// each as JSON where possible.
pub fn render_context(
    query: &str,
    url_filter: Option<&str>,
    records: &[SourceRecord],
    mode: ResponseMode,
    limits: &EffectiveLimits,
) -> String {
    match mode {
        ResponseMode::Full => render_full(query, records),
        ResponseMode::Compact => render_compact(query, url_filter, records, limits),
    }
}

fn record_line(rec: &SourceRecord, snippets: &[String]) -> String {
    let mut line = serde_json::json!({
        "title": rec.title,
        "url": rec.url,
        "snippets": snippets,
    });
    if let (Some(obj), Some(age)) = (line.as_object_mut(), rec.age.as_deref()) {
        obj.insert("age".to_string(), Value::String(age.to_string()));
    }
    line.to_string()
}

fn full_record_line(rec: &SourceRecord) -> String {
    let snippets: Vec<SnippetValue> = rec.snippets.iter().map(|s| SnippetValue::parse(s)).collect();
    let mut line = serde_json::json!({
        "title": rec.title,
        "url": rec.url,
        "snippets": snippets,
    });
    if let (Some(obj), Some(age)) = (line.as_object_mut(), rec.age.as_deref()) {
        obj.insert("age".to_string(), Value::String(age.to_string()));
    }
    line.to_string()
}

fn render_full(query: &str, records: &[SourceRecord]) -> String {
    if records.is_empty() {
        return empty_context_message(query, None);
    }
    let lines: Vec<String> = records.iter().map(full_record_line).collect();
    lines.join("\n")
}

fn render_compact(
    query: &str,
    url_filter: Option<&str>,
    records: &[SourceRecord],
    limits: &EffectiveLimits,
) -> String {
    let matched: Vec<&SourceRecord> = match url_filter {
        // Exact, case-sensitive match; no URL normalization.
        Some(url) => records.iter().filter(|r| r.url == url).collect(),
        None => records.iter().collect(),
    };
    let kept = &matched[..matched.len().min(limits.max_urls)];

    let terms = query_terms(query);
    // With no usable query terms every candidate would fall below the strict
    // gate, so the relevance threshold only applies when terms exist.
    let min_score = if terms.is_empty() {
        0.0
    } else {
        limits.relevance_mode.min_score()
    };

    let mut ranked: Vec<(&SourceRecord, Vec<String>)> = Vec::new();
    for rec in kept {
        let mut candidates = Vec::new();
        for raw in &rec.snippets {
            let text = sanitize_snippet(raw);
            if text.is_empty() || is_noise(&text) {
                continue;
            }
            candidates.push(Candidate::new(text, &terms));
        }
        let selected = select_for_source(
            dedup_exact(candidates),
            min_score,
            limits.max_snippets_per_url,
            limits.max_snippet_chars,
        );
        if !selected.is_empty() {
            ranked.push((rec, selected));
        }
    }

    // Ordered greedy walk: sources are visited in their original relative
    // order, and the walk ends at the first source that contributes nothing.
    let mut lines: Vec<String> = Vec::new();
    let mut output_chars = 0usize;
    let mut snippet_count = 0usize;
    for (rec, snippets) in &ranked {
        let allowed = limits.max_snippets.saturating_sub(snippet_count);
        if allowed == 0 {
            break;
        }
        let take_max = snippets.len().min(allowed);
        let separator = usize::from(!lines.is_empty());

        let mut fitted: Option<(String, usize, usize)> = None;
        for n in 1..=take_max {
            let line = record_line(rec, &snippets[..n]);
            let line_chars = line.chars().count();
            if output_chars + separator + line_chars > limits.max_output_chars {
                break;
            }
            fitted = Some((line, line_chars, n));
        }
        let Some((line, line_chars, taken)) = fitted else {
            break;
        };
        lines.push(line);
        output_chars += separator + line_chars;
        snippet_count += taken;
    }

    debug!(
        sources_in = records.len(),
        sources_out = lines.len(),
        snippets = snippet_count,
        chars = output_chars,
        "compact context assembled"
    );

    if lines.is_empty() {
        return empty_context_message(query, url_filter);
    }
    lines.join("\n")
}
