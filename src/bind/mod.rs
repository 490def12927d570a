//! Request parameter binding subsystem.
//!
//! # Data Flow
//! ```text
//! GET-like request:
//!     query pairs → form.rs (fold indexed keys, trim, drop empties)
//!     → lenient.rs (project through the type's schema)
//!     → serde (typed parameter object)
//!
//! Body-carrying request:
//!     body bytes (empty body = "{}")
//!     → lenient JSON path (opted-in URLs/actions) OR strict serde path
//!     → on failure, URL-encoded form fallback through the lenient path
//! ```
//!
//! # Design Decisions
//! - Parse once into a generic JSON tree, then project into the target;
//!   tolerance lives in the projector, not in the transport
//! - Per-type behavior comes from declarative schema tables, not runtime
//!   reflection
//! - Restful path keys are injected before decoding so body fields win

pub mod form;
pub mod lenient;
pub mod schema;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::bind::schema::{Bindable, RestfulKey, Schema};

/// A JSON object tree, the binder's working representation.
pub type JsonMap = Map<String, Value>;

/// Binding failure, surfaced to callers as the bind-error response.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("missing required field {0}")]
    MissingField(String),

    #[error("field {field}: cannot represent {value} as {expected}")]
    Coercion {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("{0}")]
    Decode(String),
}

/// Everything the binder needs from one HTTP request.
#[derive(Debug, Clone, Default)]
pub struct BindInput {
    /// Uppercased HTTP method.
    pub method: String,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    /// Raw request body.
    pub body: Vec<u8>,
    /// Bind from the body instead of the query string.
    pub use_body: bool,
    /// The URL or action opted in to the lenient JSON decoder.
    pub binding_complex: bool,
    /// Path segment extracted from a parameterized URL.
    pub restful_id: Option<String>,
    /// HTTP method to inject into method-tagged fields.
    pub restful_method: Option<String>,
}

/// Produce a fully populated, validated parameter object for a handler.
pub fn bind_request<P: Bindable>(input: &BindInput) -> Result<P, BindError> {
    if input.use_body {
        bind_body(input)
    } else {
        bind_query(input)
    }
}

fn bind_query<P: Bindable>(input: &BindInput) -> Result<P, BindError> {
    let map = form::fold_pairs(&input.query);
    decode_lenient::<P>(map, input)
}

fn bind_body<P: Bindable>(input: &BindInput) -> Result<P, BindError> {
    let raw: &[u8] = if input.body.is_empty() { b"{}" } else { &input.body };

    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(raw) {
        let attempt = if input.binding_complex {
            decode_lenient::<P>(map, input)
        } else {
            decode_strict::<P>(map, input)
        };
        if let Ok(param) = attempt {
            return Ok(param);
        }
    }

    // Neither JSON path succeeded: interpret the body as an URL-encoded form.
    let pairs = form::parse_urlencoded(raw);
    let map = form::fold_pairs(&pairs);
    decode_lenient::<P>(map, input)
}

/// Lenient path: project the tree through the schema, then decode.
fn decode_lenient<P: Bindable>(mut map: JsonMap, input: &BindInput) -> Result<P, BindError> {
    inject_restful_keys(P::SCHEMA, &mut map, input);
    let normalized = lenient::project(P::SCHEMA, &map)?;
    validate_required(P::SCHEMA, &normalized)?;
    serde_json::from_value(Value::Object(normalized)).map_err(|e| BindError::Decode(e.to_string()))
}

/// Strict path: decode the declared struct shape directly.
fn decode_strict<P: Bindable>(mut map: JsonMap, input: &BindInput) -> Result<P, BindError> {
    inject_restful_keys(P::SCHEMA, &mut map, input);
    validate_required(P::SCHEMA, &map)?;
    serde_json::from_value(Value::Object(map)).map_err(|e| BindError::Decode(e.to_string()))
}

/// Seed id/method-tagged fields from the matched URL pattern. Values present
/// in the request win over injected ones.
fn inject_restful_keys(schema: &Schema, map: &mut JsonMap, input: &BindInput) {
    for field in schema.fields {
        let injected = match field.restful {
            Some(RestfulKey::Id) => input.restful_id.as_deref(),
            Some(RestfulKey::Method) => input.restful_method.as_deref(),
            None => None,
        };
        let Some(raw) = injected else { continue };
        if lenient::lookup(map, field.name).is_some() {
            continue;
        }
        if let Ok(value) = lenient::coerce(field, &field.kind, &Value::String(raw.to_string())) {
            map.insert(field.name.to_string(), value);
        }
    }
    for embedded in schema.embedded {
        inject_restful_keys(embedded, map, input);
    }
}

/// Declarative required check: a tagged field must be present and, for
/// strings, non-empty.
fn validate_required(schema: &Schema, map: &JsonMap) -> Result<(), BindError> {
    for field in schema.fields {
        if !field.required {
            continue;
        }
        match lenient::lookup(map, field.name) {
            None | Some(Value::Null) => {
                return Err(BindError::MissingField(field.name.to_string()))
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(BindError::MissingField(field.name.to_string()))
            }
            Some(_) => {}
        }
    }
    for embedded in schema.embedded {
        validate_required(embedded, map)?;
    }
    Ok(())
}

/// Pull the conventional `Action` field out of a bound parameter object,
/// for metrics and audit labeling.
pub(crate) fn action_of<P: serde::Serialize>(param: &P) -> String {
    match serde_json::to_value(param) {
        Ok(Value::Object(map)) => match map.get("Action") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        },
        _ => String::new(),
    }
}
