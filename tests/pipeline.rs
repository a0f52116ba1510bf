//! End-to-end pipeline tests: requests built by hand, dispatched through the
//! fully assembled router, responses checked down to envelope fields.

use std::{sync::Arc, time::Duration};

use http::{Method, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};

use muxd::{
    app::App,
    body::MuxBody,
    config::{AuthMode, Config},
    router::Router,
    types::{Request, Response},
};

fn local_app() -> Arc<App> {
    App::new(Config::default()).unwrap()
}

fn secret_app() -> Arc<App> {
    let mut config = Config::default();
    config.auth.mode = AuthMode::SharedSecret;
    config.auth.shared_secret = Some("s3cret".into());
    App::new(config).unwrap()
}

fn request(method: Method, path: &str, headers: &[(&str, &str)], body: Option<Value>) -> Request {
    let mut builder = http::Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(value) => MuxBody::from(value.to_string()),
        None => MuxBody::empty(),
    };
    builder.body(body).unwrap()
}

async fn send(
    router: &Router,
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (http::response::Parts, Value, bytes::Bytes) {
    let res: Response = router.dispatch(request(method, path, headers, body)).await;
    let (parts, body) = res.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (parts, json, bytes)
}

#[tokio::test]
async fn request_id_is_echoed_in_header_and_envelope() {
    let app = local_app();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/health",
        &[("x-request-id", "abc_123")],
        None,
    )
    .await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers.get("x-request-id").unwrap(), "abc_123");
    assert_eq!(body["request_id"], "abc_123");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn missing_request_id_is_generated_and_bad_one_sanitized() {
    let app = local_app();
    let router = app.router();

    let (parts, body, _) = send(&router, Method::GET, "/health", &[], None).await;
    let generated = parts.headers.get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 24);
    assert_eq!(body["request_id"], generated);

    let (parts, _, _) = send(
        &router,
        Method::GET,
        "/health",
        &[("x-request-id", "abc 123!!")],
        None,
    )
    .await;
    assert_eq!(parts.headers.get("x-request-id").unwrap(), "abc123");
}

#[tokio::test]
async fn disallowed_origin_is_rejected_with_403() {
    let mut config = Config::default();
    config.allowed_origins = vec!["http://localhost".into()];
    let app = App::new(config).unwrap();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/api/v1/health",
        &[("origin", "http://evil.example")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "FORBIDDEN");

    let (parts, _, _) = send(
        &router,
        Method::GET,
        "/api/v1/health",
        &[("origin", "http://localhost")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(
        parts
            .headers
            .get("access-control-allow-origin")
            .unwrap()
            .to_str()
            .unwrap(),
        "http://localhost"
    );
    assert_eq!(parts.headers.get("vary").unwrap(), "Origin");
}

#[tokio::test]
async fn options_preflight_short_circuits() {
    let app = local_app();
    let router = app.router();

    let (parts, _, _) = send(
        &router,
        Method::OPTIONS,
        "/api/v1/sessions",
        &[("origin", "http://localhost")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert!(parts.headers.contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn protected_routes_require_authentication() {
    let app = secret_app();
    let router = app.router();

    let (parts, body, _) = send(&router, Method::GET, "/api/v1/sessions", &[], None).await;
    assert_eq!(parts.status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");

    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/api/v1/sessions",
        &[("x-api-key", "wrong")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn shared_secret_grants_access() {
    let app = secret_app();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/api/v1/sessions",
        &[("x-api-key", "s3cret")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["sessions"], json!([]));
    assert_eq!(body["count"], 0);

    // Bearer fallback carries the same secret.
    let (parts, _, _) = send(
        &router,
        Method::GET,
        "/api/v1/sessions",
        &[("authorization", "Bearer s3cret")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
}

#[tokio::test]
async fn health_stays_open_in_secret_mode() {
    let app = secret_app();
    let router = app.router();
    let (parts, _, _) = send(&router, Method::GET, "/health", &[], None).await;
    assert_eq!(parts.status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_gets_enveloped_404_with_request_id() {
    let app = local_app();
    let router = app.router();
    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/api/v1/nonsense",
        &[("x-request-id", "lost-1")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");
    assert_eq!(body["request_id"], "lost-1");
    assert_eq!(parts.headers.get("x-request-id").unwrap(), "lost-1");
}

#[tokio::test]
async fn wrong_method_gets_405() {
    let app = local_app();
    let router = app.router();
    let (parts, body, _) = send(&router, Method::DELETE, "/health", &[], None).await;
    assert_eq!(parts.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error_code"], "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn anonymous_local_mode_is_read_only() {
    let app = local_app();
    let router = app.router();

    let (parts, body, _) = send(&router, Method::GET, "/api/v1/jobs", &[], None).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["jobs"], json!([]));

    let (parts, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/jobs",
        &[],
        Some(json!({"type": "scan"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "FORBIDDEN");
    assert_eq!(body["details"]["required_permission"], "write-jobs");
}

const AUTHED: &[(&str, &str)] = &[("x-api-key", "s3cret")];

#[tokio::test]
async fn idempotency_key_replays_byte_identical_response() {
    let app = secret_app();
    let router = app.router();

    let headers = &[("x-api-key", "s3cret"), ("idempotency-key", "k1")];
    let (parts1, _, bytes1) = send(
        &router,
        Method::POST,
        "/api/v1/jobs",
        headers,
        Some(json!({"type": "scan"})),
    )
    .await;
    assert_eq!(parts1.status, StatusCode::ACCEPTED);
    assert!(parts1.headers.get("x-idempotent-replay").is_none());

    let (parts2, _, bytes2) = send(
        &router,
        Method::POST,
        "/api/v1/jobs",
        headers,
        Some(json!({"type": "scan"})),
    )
    .await;
    assert_eq!(parts2.status, StatusCode::ACCEPTED);
    assert_eq!(parts2.headers.get("x-idempotent-replay").unwrap(), "true");
    assert_eq!(bytes1, bytes2);

    // The second request never reached the registry.
    assert_eq!(app.jobs.list().len(), 1);
}

#[tokio::test]
async fn unknown_job_type_is_rejected_with_hint() {
    let app = secret_app();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/jobs",
        AUTHED,
        Some(json!({"type": "explode"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "BAD_REQUEST");
    assert_eq!(body["hint"]["valid_types"], json!(["scan", "sync", "prune"]));

    let (parts, body, _) = send(&router, Method::POST, "/api/v1/jobs", AUTHED, Some(json!({}))).await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "type");
}

#[tokio::test]
async fn job_runs_to_completion_and_terminal_cancel_conflicts() {
    let app = secret_app();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/jobs",
        AUTHED,
        Some(json!({"type": "scan"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::ACCEPTED);
    assert_eq!(body["job"]["status"], "pending");
    let id = body["job"]["id"].as_str().unwrap().to_string();

    // Wait out the staged executor.
    let mut done = Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let (_, body, _) = send(
            &router,
            Method::GET,
            &format!("/api/v1/jobs/{id}"),
            AUTHED,
            None,
        )
        .await;
        if body["job"]["status"] == "completed" {
            done = body;
            break;
        }
    }
    assert_eq!(done["job"]["status"], "completed", "job never completed");
    assert_eq!(done["job"]["progress"], 100);
    assert!(done["job"]["result"].is_object());

    let (parts, body, _) = send(
        &router,
        Method::DELETE,
        &format!("/api/v1/jobs/{id}"),
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "CONFLICT");
    assert_eq!(body["details"]["status"], "completed");
}

#[tokio::test]
async fn cancelled_job_is_never_overwritten_by_the_executor() {
    let app = secret_app();
    let router = app.router();

    let (_, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/jobs",
        AUTHED,
        Some(json!({"type": "sync"})),
    )
    .await;
    let id = body["job"]["id"].as_str().unwrap().to_string();

    let (parts, body, _) = send(
        &router,
        Method::DELETE,
        &format!("/api/v1/jobs/{id}"),
        AUTHED,
        Some(json!({"message": "operator stop"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "cancelled");

    // Give the executor time to finish its stages; the cancelled status must
    // survive.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let (_, body, _) = send(
        &router,
        Method::GET,
        &format!("/api/v1/jobs/{id}"),
        AUTHED,
        None,
    )
    .await;
    assert_eq!(body["job"]["status"], "cancelled");
    assert_eq!(body["job"]["error"], "operator stop");
}

#[tokio::test]
async fn missing_job_is_404() {
    let app = secret_app();
    let router = app.router();
    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/api/v1/jobs/ffffffffffffffffffffffff",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn config_patch_swaps_origin_allowlist_at_runtime() {
    let app = secret_app();
    let router = app.router();

    // Not on the default loopback allowlist.
    let (parts, _, _) = send(
        &router,
        Method::GET,
        "/api/v1/health",
        &[("x-api-key", "s3cret"), ("origin", "https://app.example")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);

    let (parts, body, _) = send(
        &router,
        Method::PATCH,
        "/api/v1/config",
        AUTHED,
        Some(json!({"allowed_origins": ["https://app.example"]})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["config"]["allowed_origins"], json!(["https://app.example"]));

    let (parts, _, _) = send(
        &router,
        Method::GET,
        "/api/v1/health",
        &[("x-api-key", "s3cret"), ("origin", "https://app.example")],
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
}

#[tokio::test]
async fn config_patch_rejects_immutable_fields() {
    let app = secret_app();
    let router = app.router();
    let (parts, body, _) = send(
        &router,
        Method::PATCH,
        "/api/v1/config",
        AUTHED,
        Some(json!({"bind": "0.0.0.0:1"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "bind");
}

#[tokio::test]
async fn config_patch_requires_admin() {
    // Anonymous (local mode) holds only read permissions.
    let app = local_app();
    let router = app.router();
    let (parts, _, _) = send(
        &router,
        Method::PATCH,
        "/api/v1/config",
        &[],
        Some(json!({"project_dir": "/tmp"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn session_lifecycle_via_command_layer() {
    let app = secret_app();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/sessions",
        AUTHED,
        Some(json!({"name": "alpha"})),
    )
    .await;
    assert_eq!(parts.status, StatusCode::CREATED);
    assert_eq!(body["session"]["name"], "alpha");

    let (_, body, _) = send(&router, Method::GET, "/api/v1/sessions", AUTHED, None).await;
    assert_eq!(body["count"], 1);

    let (parts, _, _) = send(
        &router,
        Method::GET,
        "/api/v1/sessions/alpha",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);

    let (parts, _, _) = send(
        &router,
        Method::DELETE,
        "/api/v1/sessions/alpha",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);

    let (parts, body, _) = send(
        &router,
        Method::GET,
        "/api/v1/sessions/alpha",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn pane_stream_enable_disable() {
    let app = secret_app();
    let router = app.router();

    let (parts, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/sessions/alpha/panes/0/stream",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["topic"], "alpha:0");

    let (parts, body, _) = send(
        &router,
        Method::POST,
        "/api/v1/sessions/alpha/panes/0/stream",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "CONFLICT");

    let (parts, _, _) = send(
        &router,
        Method::DELETE,
        "/api/v1/sessions/alpha/panes/0/stream",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::OK);

    let (parts, _, _) = send(
        &router,
        Method::DELETE,
        "/api/v1/sessions/alpha/panes/0/stream",
        AUTHED,
        None,
    )
    .await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sse_stream_has_headers_and_connected_event() {
    let app = local_app();
    let router = app.router();

    let res = router
        .dispatch(request(Method::GET, "/events", &[], None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(res.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(res.headers().get("x-accel-buffering").unwrap(), "no");

    let mut body = res.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("event: connected\ndata: "));
}

#[tokio::test]
async fn system_endpoints_answer_in_envelope() {
    let app = local_app();
    let router = app.router();

    let (_, body, _) = send(&router, Method::GET, "/api/v1/version", &[], None).await;
    assert_eq!(body["name"], "muxd");
    assert_eq!(body["success"], true);

    let (_, body, _) = send(&router, Method::GET, "/api/v1/capabilities", &[], None).await;
    assert!(
        body["capabilities"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c == "websocket")
    );

    let (_, body, _) = send(&router, Method::GET, "/api/v1/deps", &[], None).await;
    assert!(body["dependencies"].is_array());

    let (_, body, _) = send(&router, Method::GET, "/api/v1/doctor", &[], None).await;
    assert!(body["checks"].is_array());

    let (_, body, _) = send(&router, Method::GET, "/api/v1/config", &[], None).await;
    assert_eq!(body["config"]["auth_mode"], "local");
}
