//! Extraction of a JSON object from mixed LLM output.
//!
//! Scoring responses are frequently wrapped in a markdown code fence or
//! surrounded by explanatory prose. This module locates the JSON payload so
//! the caller can hand a clean string to `serde_json`. Strategies, in order:
//!
//! 1. a ```json fenced block
//! 2. a generic ``` fenced block
//! 3. the first brace-balanced object anywhere in the content
//!
//! Every candidate is validated as parseable JSON before it is returned.

use regex::Regex;

/// Locate the JSON object inside `content`, or `None` when there is none.
pub fn extract_json_object(content: &str) -> Option<String> {
    let trimmed = content.trim();

    if let Some(body) = fenced_block(trimmed, "```json") {
        if let Some(json) = balanced_object(body) {
            return Some(json.to_string());
        }
    }
    if let Some(body) = fenced_block(trimmed, "```") {
        if let Some(json) = balanced_object(body) {
            return Some(json.to_string());
        }
    }
    balanced_object(trimmed).map(str::to_string)
}

/// Body of the first fenced code block opened by `fence`, if any.
fn fenced_block<'a>(content: &'a str, fence: &str) -> Option<&'a str> {
    let pattern = format!(r"{}\s*\n?([\s\S]*?)\n?```", regex::escape(fence));
    let re = Regex::new(&pattern).ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// First brace-balanced `{...}` span that parses as JSON.
///
/// Tracks string literals and escape sequences so braces inside string
/// values do not affect the depth count.
fn balanced_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let candidate = &content[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in candidate.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let span = &candidate[..=i];
                    if serde_json::from_str::<serde_json::Value>(span).is_ok() {
                        return Some(span);
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}
