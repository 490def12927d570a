//! Query and form-body key folding.
//!
//! Bracketed and dot-indexed keys (`Items[0]`, `Items.1`) fold onto their
//! root name, values are trimmed, and empty values are dropped, so gateway
//! style form submissions land on the same fields a JSON body would.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::bind::JsonMap;

static INDEX_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\[\.]\d{1,9}[\]]*$").expect("index-suffix pattern")
});

/// Decode an URL-encoded byte stream into ordered pairs.
pub(crate) fn parse_urlencoded(raw: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Fold pairs into a JSON object: indexed keys collapse onto their root,
/// whitespace is trimmed, empty values are dropped, repeated keys become
/// sequences.
pub(crate) fn fold_pairs(pairs: &[(String, String)]) -> JsonMap {
    let mut map = JsonMap::new();
    for (raw_key, raw_value) in pairs {
        let indexed = raw_key
            .char_indices()
            .any(|(i, c)| i > 0 && (c == '[' || c == '.'));
        let key = if indexed {
            INDEX_SUFFIX.replace(raw_key, "").into_owned()
        } else {
            raw_key.clone()
        };
        let value = raw_value.trim();
        if value.is_empty() {
            continue;
        }
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value.to_string()));
            }
            Some(Value::Array(items)) => items.push(Value::String(value.to_string())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value.to_string())]);
            }
        }
    }
    map
}
