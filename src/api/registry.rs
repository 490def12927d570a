//! Endpoint registration tables and hooks.
//!
//! Registration happens at startup, before the server starts serving; the
//! tables are frozen behind an `Arc` afterwards. Three tables exist: exact
//! URLs, action keys (dispatched through the root path), and restful
//! patterns with named segments.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::router::{self, RestfulEntry};
use crate::api::{BoxFuture, RequestContext};
use crate::bind::schema::{Bindable, FieldKind, FieldSchema, Schema};
use crate::bind::{self, BindError, BindInput};

/// Access-control verdict returned by the ACL hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclResult {
    Allow,
    /// Caller identity unknown.
    Deny,
    /// Caller known but not entitled.
    NoRight,
}

/// Access-control hook: `(url, action, ctx)`.
pub type AclHook = Arc<dyn Fn(&str, &str, &RequestContext) -> AclResult + Send + Sync>;

/// Audit hook: `(url, action, request_log, response_json, ctx)`.
pub type AuditHook = Arc<dyn Fn(&str, &str, &str, &str, &RequestContext) + Send + Sync>;

/// Produces the custom tag string included in access-log lines.
pub type CustomLogTag = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// Maps a serialized response to its access-log summary.
pub type LogResponse = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Handler for requests that match no registration.
pub type FallbackHandler =
    Arc<dyn Fn(RequestContext, ActionParam) -> BoxFuture<(Value, String)> + Send + Sync>;

/// Action selector stub decoded from requests to the root path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParam {
    #[serde(rename = "Action")]
    pub action: String,
}

impl Bindable for ActionParam {
    const SCHEMA: &'static Schema =
        &Schema::flat(&[FieldSchema::new("Action", FieldKind::Str).required()]);
}

impl ActionParam {
    pub fn log_string(&self) -> String {
        format!(r#"{{"Action":"{}"}}"#, self.action)
    }
}

/// Outcome of a type-erased bind-and-handle invocation.
pub(crate) enum Invoked {
    Done {
        response: Value,
        request_log: String,
        action: String,
    },
    BindFailed(BindError),
}

pub(crate) type Invoker =
    Arc<dyn Fn(RequestContext, BindInput) -> BoxFuture<Invoked> + Send + Sync>;

/// One registered endpoint, immutable after registration.
#[derive(Clone)]
pub(crate) struct HandleEntry {
    pub invoker: Invoker,
    pub log_response: Option<LogResponse>,
    pub logger: String,
    pub status_field: Option<String>,
}

const DEFAULT_LOGGER: &str = "API";

/// Registration surface and dispatch tables.
pub struct Api {
    pub(crate) url_entries: HashMap<String, HandleEntry>,
    pub(crate) action_entries: HashMap<String, HandleEntry>,
    pub(crate) restful_entries: Vec<RestfulEntry>,
    binding_complex_urls: HashSet<String>,
    binding_complex_actions: HashSet<String>,
    un_escape_urls: HashSet<String>,
    un_escape_actions: HashSet<String>,
    pub(crate) acl: Option<AclHook>,
    pub(crate) audit: Option<AuditHook>,
    pub(crate) custom_log_tag: Option<CustomLogTag>,
    pub(crate) fallback: Option<FallbackHandler>,
    pub(crate) deny_response: Value,
    pub(crate) no_right_response: Value,
    pub(crate) missing_action_response: Value,
    pub(crate) bind_error_replacement: Option<Value>,
    pub(crate) jsonp_enabled: bool,
    pub(crate) jsonp_callback_param: String,
    pub(crate) cors_enabled: bool,
    pub(crate) response_show_detail: bool,
    pub(crate) response_show_size: usize,
}

impl Default for Api {
    fn default() -> Self {
        Self::new()
    }
}

impl Api {
    pub fn new() -> Self {
        Self {
            url_entries: HashMap::new(),
            action_entries: HashMap::new(),
            restful_entries: Vec::new(),
            binding_complex_urls: HashSet::new(),
            binding_complex_actions: HashSet::new(),
            un_escape_urls: HashSet::new(),
            un_escape_actions: HashSet::new(),
            acl: None,
            audit: None,
            custom_log_tag: None,
            fallback: None,
            deny_response: json!({"RetCode": 100, "Message": "请先登录"}),
            no_right_response: json!({"RetCode": 101, "Message": "没有权限，请向管理员申请权限"}),
            missing_action_response: json!({"RetCode": 160, "Message": "Missing Action"}),
            bind_error_replacement: None,
            jsonp_enabled: true,
            jsonp_callback_param: "callback".to_string(),
            cors_enabled: true,
            response_show_detail: false,
            response_show_size: 512,
        }
    }

    /// Register a handler under an URL path and/or an action key.
    pub fn add_handle<P, H, Fut, R>(&mut self, url: &str, action: &str, handler: H)
    where
        P: Bindable,
        H: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (R, String)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let entry = make_entry(handler, None, DEFAULT_LOGGER, None);
        self.insert(url, action, entry);
    }

    /// Register with an explicit response-log formatter and logger channel.
    pub fn add_handle_full<P, H, Fut, R>(
        &mut self,
        url: &str,
        action: &str,
        handler: H,
        log_response: LogResponse,
        logger: &str,
    ) where
        P: Bindable,
        H: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (R, String)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let entry = make_entry(handler, Some(log_response), logger, None);
        self.insert(url, action, entry);
    }

    /// Register a handler whose HTTP status is reflected out of the named
    /// response field.
    pub fn add_handle_with_status_field<P, H, Fut, R>(
        &mut self,
        url: &str,
        action: &str,
        handler: H,
        status_field: &str,
    ) where
        P: Bindable,
        H: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (R, String)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let entry = make_entry(handler, None, DEFAULT_LOGGER, Some(status_field.to_string()));
        self.insert(url, action, entry);
    }

    /// Register a handler whose JSON responses skip HTML escaping.
    pub fn add_un_html_escape_handle<P, H, Fut, R>(&mut self, url: &str, action: &str, handler: H)
    where
        P: Bindable,
        H: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (R, String)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.add_handle::<P, H, Fut, R>(url, action, handler);
        self.set_un_html_escape(url, action);
    }

    /// Register a restful handler. `pattern` may contain `:name` segments;
    /// the first one is bound onto the parameter's id-tagged field.
    /// An empty `method` matches any method.
    pub fn add_restful<P, H, Fut, R>(
        &mut self,
        pattern: &str,
        handler: H,
        status_field: &str,
        method: &str,
    ) where
        P: Bindable,
        H: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (R, String)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let status_field = if status_field.is_empty() {
            None
        } else {
            Some(status_field.to_string())
        };
        let entry = make_entry(handler, None, DEFAULT_LOGGER, status_field);
        self.restful_entries.push(router::compile(pattern, method, entry));
    }

    fn insert(&mut self, url: &str, action: &str, entry: HandleEntry) {
        if !url.is_empty() {
            self.url_entries.insert(url.to_string(), entry.clone());
        }
        if !action.is_empty() {
            self.action_entries.insert(action.to_string(), entry);
        }
    }

    /// Skip HTML escaping for an already-registered URL or action.
    pub fn set_un_html_escape(&mut self, url: &str, action: &str) {
        if !url.is_empty() && url != "/" {
            self.un_escape_urls.insert(url.to_string());
        }
        if !action.is_empty() {
            self.un_escape_actions.insert(action.to_string());
        }
    }

    /// Mark URLs and actions (comma-separated lists) whose POST bodies use
    /// the lenient JSON decoder.
    pub fn set_binding_complex(&mut self, urls_csv: &str, actions_csv: &str) {
        self.binding_complex_urls = split_csv(urls_csv);
        self.binding_complex_actions = split_csv(actions_csv);
    }

    pub fn set_acl_hook<F>(&mut self, hook: F)
    where
        F: Fn(&str, &str, &RequestContext) -> AclResult + Send + Sync + 'static,
    {
        self.acl = Some(Arc::new(hook));
    }

    pub fn set_audit_hook<F>(&mut self, hook: F)
    where
        F: Fn(&str, &str, &str, &str, &RequestContext) + Send + Sync + 'static,
    {
        self.audit = Some(Arc::new(hook));
    }

    pub fn set_custom_log_tag<F>(&mut self, hook: F)
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.custom_log_tag = Some(Arc::new(hook));
    }

    /// Install the handler invoked for unregistered URLs and actions.
    pub fn set_unregistered_handler<H, Fut, R>(&mut self, handler: H)
    where
        H: Fn(RequestContext, ActionParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (R, String)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |ctx, param| {
            let fut = handler(ctx, param);
            Box::pin(async move {
                match tokio::spawn(fut).await {
                    Ok((response, log)) => {
                        (serde_json::to_value(response).unwrap_or(Value::Null), log)
                    }
                    Err(panic) => {
                        tracing::error!(error = %panic, "fallback handler panicked");
                        (
                            json!({"RetCode": 500, "Message": "Internal Server Error"}),
                            String::new(),
                        )
                    }
                }
            })
        }));
    }

    /// Replace the default bind-error response object.
    pub fn set_bind_error_response<R: Serialize>(&mut self, response: R) {
        self.bind_error_replacement = serde_json::to_value(response).ok();
    }

    /// Replace the ACL deny / no-right response objects.
    pub fn set_deny_responses<R: Serialize>(&mut self, deny: R, no_right: R) {
        if let Ok(v) = serde_json::to_value(deny) {
            self.deny_response = v;
        }
        if let Ok(v) = serde_json::to_value(no_right) {
            self.no_right_response = v;
        }
    }

    pub fn set_jsonp(&mut self, enabled: bool, callback_param: &str) {
        self.jsonp_enabled = enabled;
        self.jsonp_callback_param = callback_param.to_string();
    }

    pub fn set_cors(&mut self, enabled: bool) {
        self.cors_enabled = enabled;
    }

    /// Configure the default response-log summary: full detail or a rune
    /// budget with a head/tail window.
    pub fn set_response_log(&mut self, show_detail: bool, show_size: usize) {
        self.response_show_detail = show_detail;
        self.response_show_size = show_size;
    }

    pub(crate) fn is_binding_complex(&self, url: &str, action: &str) -> bool {
        (!url.is_empty() && self.binding_complex_urls.contains(url))
            || (!action.is_empty() && self.binding_complex_actions.contains(action))
    }

    pub(crate) fn is_un_escape(&self, url: &str, action: &str) -> bool {
        (!url.is_empty() && self.un_escape_urls.contains(url))
            || (!action.is_empty() && self.un_escape_actions.contains(action))
    }

    /// Run the ACL hook; a denial yields the configured response object.
    pub(crate) fn acl_denied(&self, url: &str, action: &str, ctx: &RequestContext) -> Option<Value> {
        let hook = self.acl.as_ref()?;
        match hook(url, action, ctx) {
            AclResult::Allow => None,
            AclResult::Deny => Some(self.deny_response.clone()),
            AclResult::NoRight => Some(self.no_right_response.clone()),
        }
    }
}

fn split_csv(csv: &str) -> HashSet<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Erase a typed handler into a bind-and-invoke closure.
fn make_entry<P, H, Fut, R>(
    handler: H,
    log_response: Option<LogResponse>,
    logger: &str,
    status_field: Option<String>,
) -> HandleEntry
where
    P: Bindable,
    H: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (R, String)> + Send + 'static,
    R: Serialize + Send + 'static,
{
    let handler = Arc::new(handler);
    let invoker: Invoker = Arc::new(move |ctx, input| {
        let handler = handler.clone();
        Box::pin(async move {
            let param: P = match bind::bind_request(&input) {
                Ok(p) => p,
                Err(e) => return Invoked::BindFailed(e),
            };
            let action = bind::action_of(&param);
            // Handler panics are confined to their own task and surfaced as
            // an error response instead of tearing down the connection.
            match tokio::spawn(handler(ctx, param)).await {
                Ok((response, request_log)) => Invoked::Done {
                    response: serde_json::to_value(response).unwrap_or(Value::Null),
                    request_log,
                    action,
                },
                Err(panic) => {
                    tracing::error!(error = %panic, "handler panicked");
                    Invoked::Done {
                        response: json!({"RetCode": 500, "Message": "Internal Server Error"}),
                        request_log: String::new(),
                        action,
                    }
                }
            }
        })
    });
    HandleEntry {
        invoker,
        log_response,
        logger: logger.to_string(),
        status_field,
    }
}
