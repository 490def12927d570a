//! Response encoding and reflection helpers.
//!
//! # Responsibilities
//! - Reflect the HTTP status code out of a declared response field
//! - Extract the RetCode for metric labels
//! - Encode JSON, HTML-escaped JSON, and JSONP bodies
//! - Truncate response log lines to a rune budget with a head/tail window

use serde_json::Value;

/// Escape `<`, `>` and `&` inside a serialized JSON document. The
/// characters only occur within string literals, so a plain scan is safe.
pub(crate) fn html_escape_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            other => out.push(other),
        }
    }
    out
}

/// Wrap a JSON document in a JSONP callback invocation.
pub(crate) fn jsonp_wrap(callback: &str, json: &str) -> String {
    format!("{}({});", callback, json)
}

/// Read an HTTP status code out of the named response field, tolerating
/// integer, float and numeric-string encodings.
pub(crate) fn status_from_response(response: &Value, field: &str) -> Option<u16> {
    let value = response.get(field)?;
    let code = int_value(value)?;
    u16::try_from(code).ok().filter(|c| (100..=999).contains(c))
}

/// The conventional RetCode of a response object; 0 when absent.
pub(crate) fn ret_code_of(response: &Value) -> i64 {
    response
        .get("RetCode")
        .and_then(int_value)
        .unwrap_or(0)
}

fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Default response summary for access logs: full text inside the rune
/// budget, otherwise a 64-rune head and tail around an ellipsis.
pub(crate) fn summarize(response: &str, show_detail: bool, budget: usize) -> String {
    if show_detail {
        return response.to_string();
    }
    let runes: Vec<char> = response.chars().collect();
    if runes.len() <= budget {
        return response.to_string();
    }
    let head: String = runes.iter().take(64).collect();
    let tail: String = runes[runes.len() - 64..].iter().collect();
    format!("{}......{}", head, tail)
}
