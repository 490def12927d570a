//! Restful pattern matching.
//!
//! # Responsibilities
//! - Compile `:name` patterns into segments and a precompiled regex
//! - Match `(method, path)` against registered patterns
//! - Tie-breaking: static entries outrank parameterized ones; overlapping
//!   parameterized matches are a configuration error, resolved by
//!   registration order

use regex::Regex;

use crate::api::registry::HandleEntry;

/// One compiled restful registration.
pub(crate) struct RestfulEntry {
    pub pattern: String,
    pub segments: Vec<String>,
    /// Name of the first `:segment`, if any.
    pub id_name: Option<String>,
    /// Position of that segment in the path.
    pub id_index: Option<usize>,
    pub regex: Regex,
    /// Uppercased method filter; empty matches any method.
    pub method: String,
    pub entry: HandleEntry,
}

/// Compile a pattern like `/v2/vpc/:id` for matching.
pub(crate) fn compile(pattern: &str, method: &str, entry: HandleEntry) -> RestfulEntry {
    let segments: Vec<String> = pattern.split('/').map(str::to_string).collect();
    let mut id_name = None;
    let mut id_index = None;
    let mut regex_parts = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        if let Some(name) = segment.strip_prefix(':') {
            if id_name.is_none() {
                id_name = Some(name.to_string());
                id_index = Some(index);
            }
            regex_parts.push("[^/]*".to_string());
        } else {
            regex_parts.push(regex::escape(segment));
        }
    }
    let regex = Regex::new(&format!("^{}$", regex_parts.join("/")))
        .expect("restful pattern regex");
    RestfulEntry {
        pattern: pattern.to_string(),
        segments,
        id_name,
        id_index,
        regex,
        method: method.to_uppercase(),
        entry,
    }
}

/// Find the entry matching `(method, path)` and extract the id segment.
pub(crate) fn match_restful<'a>(
    entries: &'a [RestfulEntry],
    path: &str,
    method: &str,
) -> Option<(&'a RestfulEntry, Option<String>)> {
    let request_segments: Vec<&str> = path.split('/').collect();
    let mut parameterized: Vec<&RestfulEntry> = Vec::new();

    for entry in entries {
        if entry.segments.len() != request_segments.len() {
            continue;
        }
        if !entry.method.is_empty() && entry.method != method {
            continue;
        }
        if !entry.regex.is_match(path) {
            continue;
        }
        let literal_match = entry
            .segments
            .iter()
            .zip(&request_segments)
            .all(|(own, req)| own.starts_with(':') || own.as_str() == *req);
        if !literal_match {
            continue;
        }
        if entry.id_name.is_none() {
            // Static patterns outrank parameterized ones.
            return Some((entry, None));
        }
        parameterized.push(entry);
    }

    if parameterized.len() > 1 {
        tracing::error!(
            path = %path,
            patterns = ?parameterized.iter().map(|e| e.pattern.as_str()).collect::<Vec<_>>(),
            "request matches more than one restful entry, check registrations"
        );
    }
    let chosen = parameterized.first()?;
    let id = chosen
        .id_index
        .and_then(|i| request_segments.get(i))
        .map(|s| s.to_string());
    Some((chosen, id))
}
