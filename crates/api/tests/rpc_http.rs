use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tandem_api::http::{AppState, app};
use tandem_api::procedures::{SharedStore, app_router};
use tandem_auth::{AuthError, ContextBuilder, IdentityVerifier};
use tandem_contracts::{Identity, User};
use tandem_store::MemoryUserStore;
use tower::ServiceExt;

struct StaticVerifier;

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token == "good-token" {
            Ok(Identity {
                id: "u1".to_string(),
                email: Some("a@b.com".to_string()),
                metadata: serde_json::Map::new(),
            })
        } else {
            Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: "invalid JWT".to_string(),
            })
        }
    }
}

fn test_app() -> axum::Router {
    let store: SharedStore = Arc::new(MemoryUserStore::with_users([User {
        id: "u1".to_string(),
        name: "Test User".to_string(),
    }]));
    app(AppState::new(
        app_router().expect("router should build"),
        store,
        ContextBuilder::new(Arc::new(StaticVerifier)),
    ))
}

fn encode(raw: &str) -> String {
    let mut out = String::new();
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

async fn send(req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
    let response = test_app().oneshot(req).await.expect("request should run");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

fn post(uri: &str, body: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

#[tokio::test]
async fn test_auth_without_credentials_returns_exact_unauthorized_envelope() {
    let (status, _, body) = send(post("/api/trpc/testAuth", "", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": "You must be authenticated to access this resource"
            }
        })
    );
}

#[tokio::test]
async fn test_auth_with_valid_token_returns_exact_success_envelope() {
    let (status, _, body) = send(post("/api/trpc/testAuth", "{}", Some("good-token"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({
            "result": {
                "data": {
                    "authenticated": true,
                    "user": {"id": "u1", "email": "a@b.com", "metadata": {}},
                    "message": "Authentication successful! You are authenticated."
                }
            }
        })
    );
}

#[tokio::test]
async fn rejected_token_degrades_to_anonymous() {
    let (status, _, body) = send(post("/api/trpc/testAuth", "", Some("expired"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // public procedures still answer
    let (status, _, body) = send(post("/api/trpc/hello", "", Some("expired"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["data"]["greeting"], "Hello world!");
}

#[tokio::test]
async fn single_query_over_get_decodes_input() {
    let uri = format!("/api/trpc/hello?input={}", encode(r#"{"name":"Ada"}"#));
    let (status, _, body) = send(get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({"result": {"data": {"greeting": "Hello Ada!"}}})
    );

    let uri = format!("/api/trpc/userById?input={}", encode(r#""nobody""#));
    let (status, _, body) = send(get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"result": {"data": null}}));
}

#[tokio::test]
async fn batched_get_returns_results_in_request_order() {
    let uri = format!(
        "/api/trpc/hello,userById,userList?batch=1&input={}",
        encode(r#"[{"name":"Batch"},"u1",null]"#)
    );
    let (status, _, body) = send(get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!([
            {"result": {"data": {"greeting": "Hello Batch!"}}},
            {"result": {"data": {"id": "u1", "name": "Test User"}}},
            {"result": {"data": [{"id": "u1", "name": "Test User"}]}}
        ])
    );
}

#[tokio::test]
async fn batch_with_a_failing_call_is_multi_status() {
    let (status, _, body) = send(post(
        "/api/trpc/userCreate,testAuth?batch=1",
        r#"[{"input":{"name":"New User"}},{}]"#,
        None,
    ))
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);

    let items = body.as_array().expect("batch body is an array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["result"]["data"]["name"], "New User");
    assert_eq!(items[1]["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn mutation_over_get_is_refused() {
    let uri = format!("/api/trpc/userCreate?input={}", encode(r#"{"name":"x"}"#));
    let (status, _, body) = send(get(&uri)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"]["code"], "METHOD_NOT_SUPPORTED");
}

#[tokio::test]
async fn request_errors_map_to_status_codes() {
    let (status, _, body) = send(post("/api/trpc/nope", "", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _, body) = send(post("/api/trpc/userCreate", "{not json", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_INPUT");

    let (status, _, body) = send(post("/api/trpc/userCreate", r#"{"input":{}}"#, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_INPUT");

    let (status, _, body) = send(post(
        "/api/trpc/hello,userList?batch=1",
        r#"[{}]"#,
        None,
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_INPUT");
}

#[tokio::test]
async fn body_without_input_wrapper_is_bad_input() {
    let (status, _, body) = send(post("/api/trpc/hello", r#"{"name":"Ada"}"#, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_INPUT");

    let (status, _, body) = send(post(
        "/api/trpc/hello",
        r#"{"input":{"name":"Ada"}}"#,
        None,
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["data"]["greeting"], "Hello Ada!");
}

#[tokio::test]
async fn batch_above_the_call_limit_is_refused() {
    let names = vec!["hello"; tandem_api::http::MAX_BATCH_CALLS + 1].join(",");
    let (status, _, body) = send(get(&format!("/api/trpc/{}?batch=1", names))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_INPUT");

    let names = vec!["hello"; tandem_api::http::MAX_BATCH_CALLS].join(",");
    let (status, _, body) = send(get(&format!("/api/trpc/{}?batch=1", names))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body.as_array().map(Vec::len),
        Some(tandem_api::http::MAX_BATCH_CALLS)
    );
}

#[tokio::test]
async fn request_id_is_echoed() {
    let req = Request::get("/api/trpc/hello")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .expect("request");
    let (_, headers, _) = send(req).await;
    assert_eq!(
        headers.get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-42")
    );
}

#[tokio::test]
async fn operational_routes_respond() {
    let response = test_app()
        .oneshot(get("/healthz"))
        .await
        .expect("request should run");
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _, body) = send(get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({"status": "ready", "checks": {"store": true}})
    );

    let _ = send(get("/api/trpc/hello")).await;
    let response = test_app()
        .oneshot(get("/metrics"))
        .await
        .expect("request should run");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("tandem_api_http_requests_total"));
    assert!(text.contains("tandem_api_procedure_calls_total"));
}
