//! The request pipeline.
//!
//! A single catch-all handler runs every inbound request: trace capture,
//! OPTIONS preflight, table lookup (exact URL, action via the root path,
//! restful pattern, fallback), binding, the ACL hook, the user handler,
//! then the uniform response tail — encoding, access log, audit hook and
//! metric sample. Error paths (bind failure, ACL denial, unknown action)
//! run the same tail.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::api::registry::{ActionParam, Api, HandleEntry, Invoked, LogResponse};
use crate::api::response as enc;
use crate::api::{router, RequestContext};
use crate::bind::{self, BindInput};
use crate::keepalive::registry::Keepalive;
use crate::observability::metrics;

/// Shared state injected into the axum router.
#[derive(Clone)]
pub(crate) struct DispatchState {
    pub api: Arc<Api>,
    pub keepalive: Arc<Keepalive>,
}

/// Everything the response tail needs from one dispatch outcome.
struct Outcome {
    logger: String,
    log_response: Option<LogResponse>,
    status_field: Option<String>,
    /// Metric URI label; `None` skips the metric sample.
    metric_uri: Option<String>,
    action: String,
    request_log: String,
    response: Value,
    jsonp: Option<String>,
    escape: bool,
}

impl Outcome {
    fn plain(response: Value, request_log: String) -> Self {
        Self {
            logger: "API".to_string(),
            log_response: None,
            status_field: None,
            metric_uri: None,
            action: String::new(),
            request_log,
            response,
            jsonp: None,
            escape: true,
        }
    }
}

pub(crate) async fn dispatch(
    State(state): State<DispatchState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let query = parse_query(parts.uri.query());

    state.keepalive.trace_inbound(&parts.headers);

    let raw_origin = origin_header(&parts.headers);
    if method == Method::OPTIONS {
        return options_response(raw_origin);
    }
    let origin = if state.api.cors_enabled {
        raw_origin
    } else {
        None
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => Vec::new(),
    };

    let ctx = RequestContext {
        method: method.clone(),
        path: path.clone(),
        headers: parts.headers,
        query: query.clone(),
        remote_addr: Some(addr),
        keepalive: state.keepalive.clone(),
    };

    let jsonp = jsonp_callback(&state.api, &query);

    if path == "/" {
        return dispatch_action(&state, ctx, body_bytes, jsonp, origin, start).await;
    }

    if method == Method::GET || method == Method::POST {
        if let Some(entry) = state.api.url_entries.get(&path).cloned() {
            return dispatch_url(&state, entry, ctx, body_bytes, jsonp, origin, start).await;
        }
    }

    let restful = router::match_restful(&state.api.restful_entries, &path, method.as_str())
        .map(|(matched, id)| (matched.entry.clone(), matched.pattern.clone(), id));
    if let Some((entry, pattern, id)) = restful {
        return dispatch_restful(&state, entry, pattern, id, ctx, body_bytes, jsonp, origin, start)
            .await;
    }

    dispatch_unmatched(&state, ctx, body_bytes, origin, start).await
}

/// Exact URL entry: ACL, bind, handler, tail.
async fn dispatch_url(
    state: &DispatchState,
    entry: HandleEntry,
    ctx: RequestContext,
    body: Vec<u8>,
    jsonp: Option<String>,
    origin: Option<HeaderValue>,
    start: Instant,
) -> Response {
    let path = ctx.path.clone();
    if let Some(deny) = state.api.acl_denied(&path, "", &ctx) {
        let outcome = Outcome {
            logger: entry.logger.clone(),
            log_response: entry.log_response.clone(),
            status_field: entry.status_field.clone(),
            metric_uri: Some(path.clone()),
            request_log: "{}".to_string(),
            response: deny,
            jsonp,
            escape: !state.api.is_un_escape(&path, ""),
            ..Outcome::plain(Value::Null, String::new())
        };
        return complete(state, &ctx, outcome, origin, start);
    }

    let input = BindInput {
        method: ctx.method.to_string(),
        query: ctx.query.clone(),
        body,
        use_body: ctx.method == Method::POST,
        binding_complex: state.api.is_binding_complex(&path, ""),
        restful_id: None,
        restful_method: None,
    };
    let escape = !state.api.is_un_escape(&path, "");
    let outcome = match (entry.invoker)(ctx.clone(), input).await {
        Invoked::Done {
            response,
            request_log,
            action,
        } => Outcome {
            logger: entry.logger.clone(),
            log_response: entry.log_response.clone(),
            status_field: entry.status_field.clone(),
            metric_uri: Some(path.clone()),
            action,
            request_log,
            response,
            jsonp,
            escape,
        },
        Invoked::BindFailed(err) => Outcome {
            logger: entry.logger.clone(),
            log_response: entry.log_response.clone(),
            status_field: entry.status_field.clone(),
            metric_uri: Some(path.clone()),
            response: bind_error_response(&state.api, &err),
            jsonp,
            escape,
            ..Outcome::plain(Value::Null, String::new())
        },
    };
    complete(state, &ctx, outcome, origin, start)
}

/// Root path: decode the action stub and re-dispatch via the action table.
async fn dispatch_action(
    state: &DispatchState,
    ctx: RequestContext,
    body: Vec<u8>,
    jsonp: Option<String>,
    origin: Option<HeaderValue>,
    start: Instant,
) -> Response {
    let use_body = ctx.method == Method::POST;
    let stub_input = BindInput {
        method: ctx.method.to_string(),
        query: ctx.query.clone(),
        body: body.clone(),
        use_body,
        binding_complex: state.api.is_binding_complex("/", ""),
        restful_id: None,
        restful_method: None,
    };
    let stub: ActionParam = match bind::bind_request(&stub_input) {
        Ok(stub) => stub,
        Err(err) => {
            let outcome = Outcome {
                metric_uri: Some("/".to_string()),
                response: bind_error_response(&state.api, &err),
                jsonp,
                request_log: ActionParam::default().log_string(),
                ..Outcome::plain(Value::Null, String::new())
            };
            return complete(state, &ctx, outcome, origin, start);
        }
    };
    let action = stub.action.clone();

    if let Some(deny) = state.api.acl_denied("/", &action, &ctx) {
        let outcome = Outcome {
            metric_uri: Some("/".to_string()),
            action: action.clone(),
            response: deny,
            jsonp,
            escape: !state.api.is_un_escape("", &action),
            ..Outcome::plain(Value::Null, String::new())
        };
        return complete(state, &ctx, outcome, origin, start);
    }

    if let Some(entry) = state.api.action_entries.get(&action).cloned() {
        let input = BindInput {
            method: ctx.method.to_string(),
            query: ctx.query.clone(),
            body,
            use_body,
            binding_complex: state.api.is_binding_complex("", &action),
            restful_id: None,
            restful_method: None,
        };
        let escape = !state.api.is_un_escape("", &action);
        let outcome = match (entry.invoker)(ctx.clone(), input).await {
            Invoked::Done {
                response,
                request_log,
                ..
            } => Outcome {
                logger: entry.logger.clone(),
                log_response: entry.log_response.clone(),
                status_field: entry.status_field.clone(),
                metric_uri: Some("/".to_string()),
                action: action.clone(),
                request_log,
                response,
                jsonp,
                escape,
            },
            Invoked::BindFailed(err) => Outcome {
                logger: entry.logger.clone(),
                log_response: entry.log_response.clone(),
                status_field: entry.status_field.clone(),
                metric_uri: Some("/".to_string()),
                action: action.clone(),
                request_log: stub.log_string(),
                response: bind_error_response(&state.api, &err),
                jsonp,
                escape,
            },
        };
        return complete(state, &ctx, outcome, origin, start);
    }

    if let Some(fallback) = state.api.fallback.clone() {
        let (response, request_log) = fallback(ctx.clone(), stub.clone()).await;
        let outcome = Outcome {
            metric_uri: Some("/".to_string()),
            action: action.clone(),
            request_log,
            response,
            jsonp,
            escape: !state.api.is_un_escape("", &action),
            ..Outcome::plain(Value::Null, String::new())
        };
        return complete(state, &ctx, outcome, origin, start);
    }

    let outcome = Outcome {
        metric_uri: Some("/".to_string()),
        action,
        request_log: stub.log_string(),
        response: state.api.missing_action_response.clone(),
        jsonp,
        ..Outcome::plain(Value::Null, String::new())
    };
    complete(state, &ctx, outcome, origin, start)
}

/// Restful entry: inject path keys, bind, handler, tail.
#[allow(clippy::too_many_arguments)]
async fn dispatch_restful(
    state: &DispatchState,
    entry: HandleEntry,
    pattern: String,
    id: Option<String>,
    ctx: RequestContext,
    body: Vec<u8>,
    jsonp: Option<String>,
    origin: Option<HeaderValue>,
    start: Instant,
) -> Response {
    let input = BindInput {
        method: ctx.method.to_string(),
        query: ctx.query.clone(),
        body,
        use_body: ctx.method != Method::GET,
        binding_complex: state.api.is_binding_complex(&ctx.path, ""),
        restful_id: id,
        restful_method: Some(ctx.method.to_string()),
    };
    let outcome = match (entry.invoker)(ctx.clone(), input).await {
        Invoked::Done {
            response,
            request_log,
            action,
        } => Outcome {
            logger: entry.logger.clone(),
            log_response: entry.log_response.clone(),
            status_field: entry.status_field.clone(),
            metric_uri: Some(pattern),
            action,
            request_log,
            response,
            jsonp,
            escape: true,
        },
        Invoked::BindFailed(err) => Outcome {
            logger: entry.logger.clone(),
            log_response: entry.log_response.clone(),
            status_field: entry.status_field.clone(),
            metric_uri: Some(pattern),
            response: bind_error_response(&state.api, &err),
            jsonp,
            ..Outcome::plain(Value::Null, String::new())
        },
    };
    complete(state, &ctx, outcome, origin, start)
}

/// No registration matched: fallback handler or a plain 404.
async fn dispatch_unmatched(
    state: &DispatchState,
    ctx: RequestContext,
    body: Vec<u8>,
    origin: Option<HeaderValue>,
    start: Instant,
) -> Response {
    let Some(fallback) = state.api.fallback.clone() else {
        let mut response =
            (StatusCode::NOT_FOUND, format!("404 page not found:{}", ctx.path)).into_response();
        apply_cors(response.headers_mut(), origin);
        return response;
    };

    let input = BindInput {
        method: ctx.method.to_string(),
        query: ctx.query.clone(),
        body,
        use_body: ctx.method == Method::POST,
        binding_complex: state.api.is_binding_complex(&ctx.path, ""),
        restful_id: None,
        restful_method: None,
    };
    let stub: ActionParam = bind::bind_request(&input).unwrap_or_default();

    if let Some(deny) = state.api.acl_denied(&ctx.path, &stub.action, &ctx) {
        let outcome = Outcome::plain(deny, String::new());
        return complete(state, &ctx, outcome, origin, start);
    }

    let (response, request_log) = fallback(ctx.clone(), stub).await;
    let outcome = Outcome::plain(response, request_log);
    complete(state, &ctx, outcome, origin, start)
}

/// The uniform response tail: status reflection, encoding, CORS, access
/// log, audit hook, metric sample.
fn complete(
    state: &DispatchState,
    ctx: &RequestContext,
    outcome: Outcome,
    origin: Option<HeaderValue>,
    start: Instant,
) -> Response {
    let status = outcome
        .status_field
        .as_deref()
        .and_then(|field| enc::status_from_response(&outcome.response, field))
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let json = serde_json::to_string(&outcome.response).unwrap_or_else(|_| "null".to_string());
    let payload = if outcome.escape {
        enc::html_escape_json(&json)
    } else {
        json
    };
    let (body, content_type) = match outcome.jsonp.as_deref() {
        Some(callback) => (
            enc::jsonp_wrap(callback, &payload),
            "application/javascript; charset=utf-8",
        ),
        None => (payload.clone(), "application/json; charset=utf-8"),
    };

    let custom_tag = state
        .api
        .custom_log_tag
        .as_ref()
        .map(|hook| hook(ctx))
        .unwrap_or_default();
    let summary = match &outcome.log_response {
        Some(format) => format(&payload),
        None => enc::summarize(
            &payload,
            state.api.response_show_detail,
            state.api.response_show_size,
        ),
    };
    tracing::info!(
        channel = %outcome.logger,
        url = %ctx.path,
        elapsed = ?start.elapsed(),
        tag = %custom_tag,
        request = %outcome.request_log,
        response = %summary,
        "api access"
    );

    if let Some(audit) = &state.api.audit {
        audit(&ctx.path, &outcome.action, &outcome.request_log, &payload, ctx);
    }

    if let Some(uri) = &outcome.metric_uri {
        metrics::record_api_request(
            enc::ret_code_of(&outcome.response),
            &outcome.action,
            ctx.method.as_str(),
            uri,
            start,
        );
    }

    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    apply_cors(response.headers_mut(), origin);
    response
}

fn bind_error_response(api: &Api, err: &bind::BindError) -> Value {
    api.bind_error_replacement.clone().unwrap_or_else(|| {
        json!({"RetCode": 230, "Message": format!("Bind params error [{}]", err)})
    })
}

fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) => url::form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}

fn jsonp_callback(api: &Api, query: &[(String, String)]) -> Option<String> {
    if !api.jsonp_enabled {
        return None;
    }
    query
        .iter()
        .find(|(k, _)| k == &api.jsonp_callback_param)
        .map(|(_, v)| v.clone())
        .filter(|v| !v.is_empty())
}

fn origin_header(headers: &HeaderMap) -> Option<HeaderValue> {
    headers
        .get(header::ORIGIN)
        .filter(|v| !v.is_empty())
        .cloned()
}

fn apply_cors(headers: &mut HeaderMap, origin: Option<HeaderValue>) {
    if let Some(origin) = origin {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
}

/// CORS preflight: headers mirrored when an Origin is present, fixed body.
fn options_response(origin: Option<HeaderValue>) -> Response {
    let mut response = (
        StatusCode::OK,
        r#"{"RetCode":0,"Message":"options success"}"#.to_string(),
    )
        .into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    if origin.is_some() {
        response.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
    }
    apply_cors(response.headers_mut(), origin);
    response
}
