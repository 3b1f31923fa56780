//! Snippet cleanup and noise classification.
//!
//! Search backends return snippet strings polluted with markdown artifacts,
//! HTML entities, and the occasional embedded JSON-LD or navigation fragment.
//! Everything here is a total function over arbitrary strings.

/// Quoted key signatures that mark a snippet as a JSON-LD payload.
const STRUCTURED_KEY_SIGNATURES: [&str; 3] = ["\"@graph\"", "\"@context\"", "\"@type\""];

/// A `{`/`[`-prefixed snippet longer than this is treated as an embedded
/// structured blob even without a recognized key signature.
const STRUCTURED_PREFIX_MIN_CHARS: usize = 160;

/// Fixed phrases that mark navigation/sharing boilerplate rather than content.
const BOILERPLATE_SIGNALS: [&str; 11] = [
    "table of contents",
    "related posts",
    "related videos",
    "recommended video",
    "share on facebook",
    "tweet on twitter",
    "pin on pinterest",
    "terms and privacy policy",
    "privacy policy",
    "home »",
    "sources:",
];

fn strip_image_placeholders(s: &str) -> String {
    // Removes single-line `![alt](target)` spans. An unterminated or
    // line-spanning span is left untouched rather than eating real text.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    loop {
        let Some(start) = rest.find("![") else {
            out.push_str(rest);
            return out;
        };
        let (head, tail) = rest.split_at(start);
        let after = &tail[2..];
        let span_end = after.find("](").and_then(|alt_end| {
            after[alt_end + 2..]
                .find(')')
                .map(|close| alt_end + 2 + close + 1)
        });
        match span_end {
            Some(end) if !after[..end].contains('\n') => {
                out.push_str(head);
                rest = &after[end..];
            }
            _ => {
                out.push_str(head);
                out.push('!');
                rest = &tail[1..];
            }
        }
    }
}

fn strip_heading_markers(s: &str) -> String {
    // Markdown headings are one to six `#` at line start followed by
    // whitespace; seven or more, or a bare `#wordeven`, are left alone.
    s.lines()
        .map(|line| {
            let hashes = line.len() - line.trim_start_matches('#').len();
            let rest = &line[hashes..];
            if (1..=6).contains(&hashes) && rest.starts_with(|c: char| c.is_whitespace()) {
                rest.trim_start()
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean one raw snippet into plain prose: drop image placeholders, decode
/// non-breaking spaces, strip heading markers, collapse whitespace, trim.
///
/// May return an empty string; callers drop those before classification.
pub fn sanitize_snippet(raw: &str) -> String {
    let no_images = strip_image_placeholders(raw);
    let no_nbsp = no_images.replace("&nbsp;", " ");
    let no_headings = strip_heading_markers(&no_nbsp);
    collapse_whitespace(&no_headings)
}

/// True when a sanitized snippet looks like an embedded JSON-LD/analytics
/// payload rather than prose.
pub fn is_structured_payload(text: &str) -> bool {
    let lower = text.to_lowercase();
    if STRUCTURED_KEY_SIGNATURES
        .iter()
        .any(|sig| lower.contains(sig))
    {
        return true;
    }
    (text.starts_with('{') || text.starts_with('['))
        && text.chars().count() > STRUCTURED_PREFIX_MIN_CHARS
}

/// True when a sanitized snippet contains a known boilerplate phrase.
pub fn is_boilerplate(text: &str) -> bool {
    let lower = text.to_lowercase();
    BOILERPLATE_SIGNALS.iter().any(|sig| lower.contains(sig))
}

/// Combined exclusion check applied after sanitization.
pub fn is_noise(text: &str) -> bool {
    is_structured_payload(text) || is_boilerplate(text)
}
