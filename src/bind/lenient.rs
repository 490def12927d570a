//! Tolerant JSON projection.
//!
//! The lenient decoder accepts, per target kind: numbers or numeric
//! strings, strings or numbers, generous boolean spellings, single scalars
//! where sequences are declared, and per-field timestamp formats. It works
//! on an already-parsed JSON tree and emits a normalized tree that decodes
//! strictly, so serde never sees the tolerance.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Number, Value};

use crate::bind::schema::{FieldKind, FieldSchema, Schema};
use crate::bind::{BindError, JsonMap};

/// Case-insensitive key lookup, preferring an exact match.
pub(crate) fn lookup<'a>(map: &'a JsonMap, name: &str) -> Option<&'a Value> {
    if let Some(v) = map.get(name) {
        return Some(v);
    }
    let lower = name.to_lowercase();
    map.iter()
        .find(|(k, _)| k.to_lowercase() == lower)
        .map(|(_, v)| v)
}

/// Project an input tree through a schema, producing a normalized map of
/// canonical wire names to strictly-typed values.
pub(crate) fn project(schema: &Schema, map: &JsonMap) -> Result<JsonMap, BindError> {
    let mut out = JsonMap::new();
    for embedded in schema.embedded {
        out.extend(project(embedded, map)?);
    }
    for field in schema.fields {
        let gathered = if field.gw_array {
            fold_gateway_array(field.name, map)
        } else {
            None
        };
        let found = match gathered {
            Some(v) => Some(v),
            None => lookup(map, field.name).cloned(),
        };
        let value = match found {
            None | Some(Value::Null) => match field.default {
                Some(d) => Value::String(d.to_string()),
                None => continue,
            },
            Some(v) => v,
        };
        out.insert(field.name.to_string(), coerce(field, &field.kind, &value)?);
    }
    Ok(out)
}

/// Gather `name.<digits>` keys into one array value, ordered by index.
fn fold_gateway_array(name: &str, map: &JsonMap) -> Option<Value> {
    let pattern = Regex::new(&format!(r"^{}\.(\d{{1,10}})$", regex::escape(name))).ok()?;
    let mut indexed: Vec<(u64, Value)> = Vec::new();
    for (key, value) in map {
        if let Some(caps) = pattern.captures(key) {
            let index = caps[1].parse().unwrap_or(0);
            indexed.push((index, value.clone()));
        }
    }
    if indexed.is_empty() {
        return None;
    }
    indexed.sort_by_key(|(index, _)| *index);
    Some(Value::Array(indexed.into_iter().map(|(_, v)| v).collect()))
}

/// Coerce one input value to the field's declared kind.
pub(crate) fn coerce(
    field: &FieldSchema,
    kind: &FieldKind,
    value: &Value,
) -> Result<Value, BindError> {
    // A form bind may hand a sequence to a scalar field; the first entry wins.
    if let Value::Array(items) = value {
        if !matches!(kind, FieldKind::Seq(_)) {
            let first = items
                .first()
                .ok_or_else(|| coercion_error(field, value, "non-empty value"))?;
            return coerce(field, kind, first);
        }
    }

    match kind {
        FieldKind::Int => to_i64(value)
            .map(|n| Value::Number(n.into()))
            .ok_or_else(|| coercion_error(field, value, "integer")),
        FieldKind::Uint => to_u64(value)
            .map(|n| Value::Number(n.into()))
            .ok_or_else(|| coercion_error(field, value, "unsigned integer")),
        FieldKind::Float => to_f64(value)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| coercion_error(field, value, "float")),
        FieldKind::Str => to_string(value)
            .map(Value::String)
            .ok_or_else(|| coercion_error(field, value, "string")),
        FieldKind::Bool => to_bool(value)
            .map(Value::Bool)
            .ok_or_else(|| coercion_error(field, value, "bool")),
        FieldKind::Timestamp => coerce_timestamp(field, value),
        FieldKind::Seq(inner) => {
            let items: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                scalar => vec![scalar],
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(coerce(field, inner, item)?);
            }
            Ok(Value::Array(out))
        }
        FieldKind::Nested(schema) => match value {
            Value::Object(map) => Ok(Value::Object(project(schema, map)?)),
            other => Err(coercion_error(field, other, "object")),
        },
    }
}

fn coercion_error(field: &FieldSchema, value: &Value, expected: &'static str) -> BindError {
    BindError::Coercion {
        field: field.name.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| match n.as_f64() {
            Some(f) if f >= 0.0 => Some(f as u64),
            _ => None,
        }),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.to_lowercase().as_str() {
            "" | "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            _ => Some(true),
        },
        _ => None,
    }
}

/// Parse a timestamp string with the field's tagged format and zone,
/// emitting RFC 3339 for the typed decode. Empty strings stay unset.
fn coerce_timestamp(field: &FieldSchema, value: &Value) -> Result<Value, BindError> {
    let raw = match value {
        Value::String(s) => s,
        other => return Err(coercion_error(field, other, "timestamp string")),
    };
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    // Re-decoding an already-normalized value must be a no-op.
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Value::String(parsed.with_timezone(&Utc).to_rfc3339()));
    }
    let format = field
        .time_format
        .ok_or_else(|| BindError::Decode(format!("field {} has no time format", field.name)))?;

    let naive = NaiveDateTime::parse_from_str(raw, format)
        .or_else(|_| NaiveDate::parse_from_str(raw, format).map(|d| d.and_time(NaiveTime::MIN)))
        .map_err(|_| coercion_error(field, value, "timestamp"))?;

    let utc: DateTime<Utc> = if field.time_utc {
        Utc.from_utc_datetime(&naive)
    } else if let Some(zone) = field.time_zone {
        let tz: chrono_tz::Tz = zone
            .parse()
            .map_err(|_| BindError::Decode(format!("unknown time zone {}", zone)))?;
        tz.from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| coercion_error(field, value, "timestamp"))?
            .with_timezone(&Utc)
    } else {
        Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| coercion_error(field, value, "timestamp"))?
            .with_timezone(&Utc)
    };
    Ok(Value::String(utc.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::schema::Bindable;
    use crate::bind::{bind_request, BindInput};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Filters {
        #[serde(rename = "Region")]
        region: String,
        #[serde(rename = "Zone")]
        zone: String,
    }

    impl Bindable for Filters {
        const SCHEMA: &'static Schema = &Schema::flat(&[
            FieldSchema::new("Region", FieldKind::Str),
            FieldSchema::new("Zone", FieldKind::Str),
        ]);
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Profile {
        #[serde(rename = "Age")]
        age: i64,
        #[serde(rename = "Score")]
        score: f64,
        #[serde(rename = "Active")]
        active: bool,
        #[serde(rename = "Loves")]
        loves: Vec<String>,
        #[serde(rename = "Birthday")]
        birthday: Option<DateTime<Utc>>,
        #[serde(rename = "Page")]
        page: i64,
        #[serde(rename = "Items")]
        items: Vec<String>,
        #[serde(flatten)]
        filters: Filters,
    }

    impl Bindable for Profile {
        const SCHEMA: &'static Schema = &Schema {
            fields: &[
                FieldSchema::new("Age", FieldKind::Int),
                FieldSchema::new("Score", FieldKind::Float),
                FieldSchema::new("Active", FieldKind::Bool),
                FieldSchema::new("Loves", FieldKind::Seq(&FieldKind::Str)),
                FieldSchema::new("Birthday", FieldKind::Timestamp)
                    .time_format("%Y-%m-%d")
                    .utc(),
                FieldSchema::new("Page", FieldKind::Int).default_value("1"),
                FieldSchema::new("Items", FieldKind::Seq(&FieldKind::Str)).gateway_array(),
            ],
            embedded: &[Filters::SCHEMA],
        };
    }

    fn lenient_input(body: serde_json::Value) -> BindInput {
        BindInput {
            method: "POST".into(),
            body: body.to_string().into_bytes(),
            use_body: true,
            binding_complex: true,
            ..BindInput::default()
        }
    }

    #[test]
    fn test_numeric_string_coercion() {
        let p: Profile =
            bind_request(&lenient_input(json!({"Age": "18", "Score": "3.5"}))).unwrap();
        assert_eq!(p.age, 18);
        assert_eq!(p.score, 3.5);
    }

    #[test]
    fn test_number_to_string_and_scalar_to_seq() {
        let p: Profile = bind_request(&lenient_input(json!({"Loves": 189}))).unwrap();
        assert_eq!(p.loves, vec!["189".to_string()]);

        let p: Profile = bind_request(&lenient_input(json!({"Loves": "music"}))).unwrap();
        assert_eq!(p.loves, vec!["music".to_string()]);

        let p: Profile =
            bind_request(&lenient_input(json!({"Loves": ["a", 2, 3.5]}))).unwrap();
        assert_eq!(p.loves, vec!["a", "2", "3.5"]);
    }

    #[test]
    fn test_bool_spellings() {
        for (input, expected) in [
            (json!(true), true),
            (json!(1), true),
            (json!(0), false),
            (json!("true"), true),
            (json!("0"), false),
            (json!("yes"), true),
            (json!(""), false),
        ] {
            let p: Profile =
                bind_request(&lenient_input(json!({ "Active": input.clone() }))).unwrap();
            assert_eq!(p.active, expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_timestamp_with_format() {
        let p: Profile =
            bind_request(&lenient_input(json!({"Birthday": "2003-01-02"}))).unwrap();
        let birthday = p.birthday.expect("birthday set");
        assert_eq!(birthday.to_rfc3339(), "2003-01-02T00:00:00+00:00");

        let p: Profile = bind_request(&lenient_input(json!({"Birthday": ""}))).unwrap();
        assert!(p.birthday.is_none());
    }

    #[test]
    fn test_default_only_when_absent() {
        let p: Profile = bind_request(&lenient_input(json!({}))).unwrap();
        assert_eq!(p.page, 1);

        let p: Profile = bind_request(&lenient_input(json!({"Page": 7}))).unwrap();
        assert_eq!(p.page, 7);
    }

    #[test]
    fn test_case_insensitive_keys_and_flatten() {
        let p: Profile = bind_request(&lenient_input(
            json!({"age": 30, "region": "cn-bj", "ZONE": "a"}),
        ))
        .unwrap();
        assert_eq!(p.age, 30);
        assert_eq!(p.filters.region, "cn-bj");
        assert_eq!(p.filters.zone, "a");
    }

    #[test]
    fn test_gateway_array_folding() {
        let p: Profile = bind_request(&lenient_input(
            json!({"Items.2": "b", "Items.1": "a", "Items.10": "c"}),
        ))
        .unwrap();
        assert_eq!(p.items, vec!["a", "b", "c"]);

        // No indexed keys: the plain key is used as-is.
        let p: Profile = bind_request(&lenient_input(json!({"Items": "only"}))).unwrap();
        assert_eq!(p.items, vec!["only"]);
    }

    #[test]
    fn test_unrepresentable_coercion_fails() {
        let err =
            bind_request::<Profile>(&lenient_input(json!({"Age": "not-a-number"}))).unwrap_err();
        match err {
            BindError::Coercion { field, .. } => assert_eq!(field, "Age"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_stable_coercion_roundtrip() {
        let first: Profile = bind_request(&lenient_input(
            json!({"Age": "18", "Loves": "music", "Birthday": "2003-01-02", "Active": "1"}),
        ))
        .unwrap();
        let reencoded = serde_json::to_value(&first).unwrap();
        let again: Profile = bind_request(&lenient_input(reencoded)).unwrap();
        assert_eq!(first, again);
    }
}
