use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

const PREVIEW_CHARS: usize = 200;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fenced block regex is valid")
});

/// Recover a JSON object from free-form model text.
///
/// Tries, in order: the whole trimmed text, the span from the first `{` to
/// the last `}`, then the first fenced code block whose body is an object.
pub fn extract_json_object(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::UnparsableOutput("model returned no text".to_string()));
    }

    let mut last_error = None;
    for candidate in candidates(trimmed) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) if value.is_object() => return Ok(value),
            Ok(_) => last_error = Some("JSON value is not an object".to_string()),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(Error::UnparsableOutput(format!(
        "{} (output preview: {})",
        last_error.unwrap_or_else(|| "no JSON object found".to_string()),
        preview(trimmed)
    )))
}

fn candidates(trimmed: &str) -> Vec<&str> {
    let mut out = Vec::new();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        out.push(trimmed);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        let span = &trimmed[start..=end];
        if !out.contains(&span) {
            out.push(span);
        }
    }

    for caps in FENCED_JSON.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if body.starts_with('{') && !out.contains(&body) {
                out.push(body);
            }
        }
    }

    out
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
