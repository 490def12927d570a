//! Dispatch pipeline tests against a live server.

mod common;

use std::time::Duration;

use girder::{AclResult, Bindable, FieldKind, FieldSchema, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LoginParam {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "UserID")]
    user_id: String,
    #[serde(rename = "Password")]
    password: String,
}

impl Bindable for LoginParam {
    const SCHEMA: &'static Schema = &Schema::flat(&[
        FieldSchema::new("Action", FieldKind::Str),
        FieldSchema::new("UserID", FieldKind::Str).required(),
        FieldSchema::new("Password", FieldKind::Str).required(),
    ]);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RegisterParam {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Age")]
    age: i64,
    #[serde(rename = "Loves")]
    loves: Vec<String>,
    #[serde(rename = "Birthday")]
    birthday: Option<chrono::DateTime<chrono::Utc>>,
}

impl Bindable for RegisterParam {
    const SCHEMA: &'static Schema = &Schema::flat(&[
        FieldSchema::new("Action", FieldKind::Str),
        FieldSchema::new("Age", FieldKind::Int),
        FieldSchema::new("Loves", FieldKind::Seq(&FieldKind::Str)),
        FieldSchema::new("Birthday", FieldKind::Timestamp)
            .time_format("%Y-%m-%d")
            .utc(),
    ]);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct EchoParam {
    #[serde(rename = "Tag")]
    tags: Vec<String>,
    #[serde(rename = "Items")]
    items: Vec<String>,
    #[serde(rename = "Page")]
    page: i64,
}

impl Bindable for EchoParam {
    const SCHEMA: &'static Schema = &Schema::flat(&[
        FieldSchema::new("Tag", FieldKind::Seq(&FieldKind::Str)),
        FieldSchema::new("Items", FieldKind::Seq(&FieldKind::Str)),
        FieldSchema::new("Page", FieldKind::Int).default_value("1"),
    ]);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct VpcParam {
    #[serde(rename = "VpcId")]
    vpc_id: String,
    #[serde(rename = "Method")]
    method: String,
}

impl Bindable for VpcParam {
    const SCHEMA: &'static Schema = &Schema::flat(&[
        FieldSchema::new("VpcId", FieldKind::Str).restful_id(),
        FieldSchema::new("Method", FieldKind::Str).restful_method(),
    ]);
}

async fn start_api_peer() -> common::TestPeer {
    common::start_peer("ApiHost", |server| {
        let api = server.api_mut();

        api.add_handle::<LoginParam, _, _, _>("/login", "Login", |_ctx, p: LoginParam| async move {
            let log = serde_json::to_string(&p).unwrap_or_default();
            (
                json!({"RetCode": 0, "login_user": {"UserID": p.user_id}}),
                log,
            )
        });

        api.add_handle::<RegisterParam, _, _, _>("", "Register", |_ctx, p: RegisterParam| async move {
            let log = serde_json::to_string(&p).unwrap_or_default();
            (
                json!({
                    "RetCode": 0,
                    "Age": p.age,
                    "Loves": p.loves,
                    "Birthday": p.birthday.map(|b| b.to_rfc3339()),
                }),
                log,
            )
        });
        api.set_binding_complex("", "Register");

        api.add_handle::<EchoParam, _, _, _>("/echo", "", |_ctx, p: EchoParam| async move {
            (
                json!({"RetCode": 0, "Tag": p.tags, "Items": p.items, "Page": p.page}),
                String::new(),
            )
        });

        api.add_handle::<EchoParam, _, _, _>("/ping", "", |_ctx, _p: EchoParam| async move {
            (json!({"RetCode": 0, "Message": "pong"}), String::new())
        });

        api.add_handle::<EchoParam, _, _, _>("/html", "", |_ctx, _p: EchoParam| async move {
            (json!({"RetCode": 0, "Body": "<b>&</b>"}), String::new())
        });
        api.add_un_html_escape_handle::<EchoParam, _, _, _>(
            "/html-raw",
            "",
            |_ctx, _p: EchoParam| async move {
                (json!({"RetCode": 0, "Body": "<b>&</b>"}), String::new())
            },
        );

        api.add_handle_with_status_field::<EchoParam, _, _, _>(
            "/status",
            "",
            |_ctx, _p: EchoParam| async move {
                (
                    json!({"HttpCode": 404, "RetCode": 8, "Message": "no such resource"}),
                    String::new(),
                )
            },
            "HttpCode",
        );

        api.add_handle::<LoginParam, _, _, _>("/secret", "", |_ctx, _p: LoginParam| async move {
            (json!({"RetCode": 0}), String::new())
        });
        api.set_acl_hook(|url, _action, _ctx| {
            if url == "/secret" {
                AclResult::Deny
            } else {
                AclResult::Allow
            }
        });

        api.add_restful::<VpcParam, _, _, _>(
            "/v2/vpc/subnet",
            |_ctx, _p: VpcParam| async move {
                (json!({"RetCode": 0, "Route": "static"}), String::new())
            },
            "",
            "POST",
        );
        api.add_restful::<VpcParam, _, _, _>(
            "/v2/vpc/:id",
            |_ctx, p: VpcParam| async move {
                (
                    json!({"RetCode": 0, "Route": "param", "Id": p.vpc_id, "Method": p.method}),
                    String::new(),
                )
            },
            "",
            "DELETE",
        );
    })
    .await
}

#[tokio::test]
async fn test_static_route_wins_over_parameterized() {
    let peer = start_api_peer().await;
    let client = common::client();

    let body: Value = client
        .post(format!("{}/v2/vpc/subnet", peer.base))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Route"], "static");

    let body: Value = client
        .delete(format!("{}/v2/vpc/abc", peer.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Route"], "param");
    assert_eq!(body["Id"], "abc");
    assert_eq!(body["Method"], "DELETE");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_action_dispatch_via_root() {
    let peer = start_api_peer().await;
    let client = common::client();

    let body: Value = client
        .post(format!("{}/", peer.base))
        .json(&json!({"Action": "Login", "UserID": "neil", "Password": "x"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["RetCode"], 0);
    assert_eq!(body["login_user"]["UserID"], "neil");

    let body: Value = client
        .post(format!("{}/", peer.base))
        .json(&json!({"Action": "Unknown"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["RetCode"], 160);
    assert_eq!(body["Message"], "Missing Action");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_lenient_coercion_end_to_end() {
    let peer = start_api_peer().await;
    let client = common::client();

    let body: Value = client
        .post(format!("{}/", peer.base))
        .json(&json!({
            "Action": "Register",
            "Age": "18",
            "Loves": "music",
            "Birthday": "2003-01-02"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["RetCode"], 0);
    assert_eq!(body["Age"], 18);
    assert_eq!(body["Loves"], json!(["music"]));
    assert_eq!(body["Birthday"], "2003-01-02T00:00:00+00:00");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_query_binding_boundaries() {
    let peer = start_api_peer().await;
    let client = common::client();

    // Duplicate keys become a two-element sequence.
    let body: Value = client
        .get(format!("{}/echo?Tag=a&Tag=b", peer.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Tag"], json!(["a", "b"]));

    // An indexed key binds to its root field.
    let body: Value = client
        .get(format!("{}/echo?Items[3]=a", peer.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Items"], json!(["a"]));

    // The tagged default applies only when the field is absent.
    let body: Value = client
        .get(format!("{}/echo", peer.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Page"], 1);
    let body: Value = client
        .get(format!("{}/echo?Page=9", peer.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Page"], 9);

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_empty_post_body_is_empty_object() {
    let peer = start_api_peer().await;
    let client = common::client();

    let body: Value = client
        .post(format!("{}/ping", peer.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["RetCode"], 0);
    assert_eq!(body["Message"], "pong");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_bind_error_response() {
    let peer = start_api_peer().await;
    let client = common::client();

    let body: Value = client
        .post(format!("{}/login", peer.base))
        .json(&json!({"UserID": "neil"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["RetCode"], 230);
    let message = body["Message"].as_str().unwrap();
    assert!(message.starts_with("Bind params error ["), "got {message}");
    assert!(message.contains("missing required field"), "got {message}");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_acl_deny() {
    let peer = start_api_peer().await;
    let client = common::client();

    let response = client
        .post(format!("{}/secret", peer.base))
        .json(&json!({"UserID": "a", "Password": "b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["RetCode"], 100);
    assert_eq!(body["Message"], "请先登录");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_jsonp_and_json_share_one_body() {
    let peer = start_api_peer().await;
    let client = common::client();

    let plain = client
        .get(format!("{}/ping", peer.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let response = client
        .get(format!("{}/ping?callback=cb", peer.base))
        .send()
        .await
        .unwrap();
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("application/javascript"));
    let wrapped = response.text().await.unwrap();
    assert_eq!(wrapped, format!("cb({});", plain));

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_cors_headers_and_preflight() {
    let peer = start_api_peer().await;
    let client = common::client();

    let response = client
        .get(format!("{}/ping", peer.base))
        .header("Origin", "http://console.example.com")
        .send()
        .await
        .unwrap();
    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "http://console.example.com"
    );
    assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
    assert_eq!(
        headers.get("access-control-allow-methods").unwrap(),
        "POST, GET, OPTIONS, PUT, DELETE"
    );

    let response = client
        .request(reqwest::Method::OPTIONS, format!("{}/anything", peer.base))
        .header("Origin", "http://console.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-headers").unwrap(),
        "Content-Type"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["RetCode"], 0);
    assert_eq!(body["Message"], "options success");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_status_code_field_reflection() {
    let peer = start_api_peer().await;
    let client = common::client();

    let response = client
        .get(format!("{}/status", peer.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["RetCode"], 8);

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_html_escaping_opt_out() {
    let peer = start_api_peer().await;
    let client = common::client();

    let escaped = client
        .get(format!("{}/html", peer.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(escaped.contains("\\u003cb\\u003e"), "got {escaped}");

    let raw = client
        .get(format!("{}/html-raw", peer.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(raw.contains("<b>&</b>"), "got {raw}");

    peer.shutdown.trigger();
}

#[tokio::test]
async fn test_unmatched_paths() {
    let peer = start_api_peer().await;
    let client = common::client();

    // No fallback installed: plain 404.
    let response = client
        .get(format!("{}/no/such/path", peer.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // A fallback peer answers everything.
    let fallback_peer = common::start_peer("Fallback", |server| {
        server.api_mut().set_unregistered_handler(|_ctx, stub| async move {
            (
                json!({"RetCode": 0, "Echo": stub.action}),
                stub.log_string(),
            )
        });
    })
    .await;
    let body: Value = client
        .post(format!("{}/", fallback_peer.base))
        .json(&json!({"Action": "Mystery"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["Echo"], "Mystery");

    peer.shutdown.trigger();
    fallback_peer.shutdown.trigger();
}

#[tokio::test]
async fn test_diagnostic_page() {
    let peer = start_api_peer().await;
    let client = common::client();

    // Give the server a moment to start serving.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client
        .get(format!("{}/output_keepalived_trace", peer.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    let page = response.text().await.unwrap();
    assert!(page.contains("ApiHost"));

    peer.shutdown.trigger();
}
