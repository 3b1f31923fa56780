//! Duplicate detection, lexical relevance scoring, and per-source selection.

use std::collections::HashSet;

/// Shorter of two normalized snippets must reach this many characters before
/// substring containment counts as a near-duplicate.
const NEAR_DUP_CONTAINMENT_FLOOR: usize = 80;

/// Query tokens shorter than this carry no relevance signal.
const MIN_TERM_CHARS: usize = 3;

/// The length bonus saturates here so long snippets cannot out-score a
/// single matched term.
const LENGTH_BONUS_CAP: usize = 300;

/// A sanitized snippet that survived classification, with ranking metadata.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    /// Normalized comparison form of the untruncated text.
    pub norm: String,
    pub score: f64,
    /// Length in characters, used as the sort tiebreak.
    pub chars: usize,
}

impl Candidate {
    pub fn new(text: String, terms: &[String]) -> Self {
        let norm = normalize_for_dedup(&text);
        let score = score_snippet(&text, terms);
        let chars = text.chars().count();
        Self {
            text,
            norm,
            score,
            chars,
        }
    }
}

/// Comparison form for duplicate detection: lowercased, every run of
/// non-alphanumeric characters squeezed to one space, ends trimmed.
pub fn normalize_for_dedup(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut in_gap = false;
    for ch in lower.chars() {
        if ch.is_alphanumeric() {
            if in_gap && !out.is_empty() {
                out.push(' ');
            }
            in_gap = false;
            out.push(ch);
        } else {
            in_gap = true;
        }
    }
    out
}

/// Near-duplicate test over normalized forms: identical, or the shorter one
/// is long enough to be meaningful and contained in the longer.
pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() >= NEAR_DUP_CONTAINMENT_FLOOR && long.contains(short)
}

/// Unique lowercased query terms, split on runs of non-word characters
/// (word = alphanumeric or `_`), keeping only terms of three or more
/// characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for tok in lower.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if tok.chars().count() < MIN_TERM_CHARS {
            continue;
        }
        if !terms.iter().any(|t| t == tok) {
            terms.push(tok.to_string());
        }
    }
    terms
}

/// Matched-term count plus a sub-unit length bonus. The bonus tops out below
/// 0.3, so any snippet matching a term outranks every snippet matching none.
pub fn score_snippet(text: &str, terms: &[String]) -> f64 {
    let lower = text.to_lowercase();
    let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    let bonus = text.chars().count().min(LENGTH_BONUS_CAP) as f64 / 1000.0;
    matched as f64 + bonus
}

/// Drop candidates whose normalized form repeats an earlier one. The first
/// occurrence wins and input order is preserved.
pub fn dedup_exact(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(candidates.len());
    for c in candidates {
        if seen.insert(c.norm.clone()) {
            out.push(c);
        }
    }
    out
}

/// Cap a snippet at `max_chars` characters, ending clipped text with `...`.
/// Caps too small to hold the ellipsis clip without it.
pub fn truncate_snippet(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars < 4 {
        return s.chars().take(max_chars).collect();
    }
    let kept: String = s.chars().take(max_chars - 3).collect();
    let mut out = kept.trim_end().to_string();
    out.push_str("...");
    out
}

/// Pick a source's final snippets: gate on `min_score`, sort by score with a
/// longer-text tiebreak, reject near-duplicates of already kept snippets,
/// truncate each survivor, and stop at `max_snippets`.
pub fn select_for_source(
    mut candidates: Vec<Candidate>,
    min_score: f64,
    max_snippets: usize,
    max_snippet_chars: usize,
) -> Vec<String> {
    candidates.retain(|c| c.score >= min_score);
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.chars.cmp(&a.chars))
    });

    let mut kept_norms: Vec<String> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    for cand in candidates {
        if out.len() >= max_snippets {
            break;
        }
        if kept_norms.iter().any(|n| is_near_duplicate(n, &cand.norm)) {
            continue;
        }
        out.push(truncate_snippet(&cand.text, max_snippet_chars));
        kept_norms.push(cand.norm);
    }
    out
}
