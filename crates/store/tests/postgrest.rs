use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use tandem_contracts::{NewUser, User};
use tandem_store::{PostgrestConfig, PostgrestUserStore, UserStore};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct StubState {
    inserts: Arc<Mutex<Vec<serde_json::Value>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    let apikey = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let authz = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    apikey == "service-key" && authz == "Bearer service-key"
}

fn wants_object(headers: &HeaderMap) -> bool {
    headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/vnd.pgrst.object+json")
}

async fn select_users(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"message": "Invalid API key"})),
        );
    }

    let rows = vec![
        serde_json::json!({"id": "u1", "name": "Test User"}),
        serde_json::json!({"id": "u2", "name": "User 2"}),
    ];

    match params.get("id").map(String::as_str) {
        Some(filter) if wants_object(&headers) => {
            let id = filter.trim_start_matches("eq.");
            match rows.into_iter().find(|r| r["id"] == id) {
                Some(row) => (StatusCode::OK, Json(row)),
                None => (
                    StatusCode::NOT_ACCEPTABLE,
                    Json(serde_json::json!({
                        "code": "PGRST116",
                        "details": "The result contains 0 rows",
                        "hint": null,
                        "message": "JSON object requested, multiple (or no) rows returned"
                    })),
                ),
            }
        }
        _ => (StatusCode::OK, Json(serde_json::Value::Array(rows))),
    }
}

async fn insert_user(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let prefer = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !authorized(&headers) || prefer != "return=representation" {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({})));
    }

    if let Ok(mut inserts) = state.inserts.lock() {
        inserts.push(body.clone());
    }

    if body["name"] == "Duplicate" {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"users_name_key\""
            })),
        );
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({"id": "u3", "name": body["name"]})),
    )
}

async fn spawn_stub() -> (SocketAddr, StubState) {
    let state = StubState::default();
    let app = Router::new()
        .route("/rest/v1/users", get(select_users).post(insert_user))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr should exist");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

fn store(addr: SocketAddr, api_key: &str) -> PostgrestUserStore {
    PostgrestUserStore::new(PostgrestConfig {
        base_url: format!("http://{}", addr),
        api_key: api_key.to_string(),
        table: "users".to_string(),
        timeout: Duration::from_secs(2),
    })
    .expect("store init should succeed")
}

#[tokio::test]
async fn lists_and_reads_single_rows() {
    let (addr, _) = spawn_stub().await;
    let store = store(addr, "service-key");

    let users = store.list_users().await.expect("list should succeed");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].id, "u1");

    let user = store.get_user("u2").await.expect("get should succeed");
    assert_eq!(
        user,
        User {
            id: "u2".to_string(),
            name: "User 2".to_string()
        }
    );

    let err = store.get_user("missing").await.unwrap_err();
    assert!(err.is_no_rows());

    store.ping().await.expect("ping should succeed");
}

#[tokio::test]
async fn insert_returns_representation_and_reports_store_codes() {
    let (addr, state) = spawn_stub().await;
    let store = store(addr, "service-key");

    let created = store
        .insert_user(NewUser {
            name: "New User".to_string(),
        })
        .await
        .expect("insert should succeed");
    assert_eq!(created.id, "u3");
    assert_eq!(created.name, "New User");

    let err = store
        .insert_user(NewUser {
            name: "Duplicate".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code.as_deref(), Some("23505"));
    assert!(err.message.contains("duplicate key"));

    let inserts = state.inserts.lock().unwrap().clone();
    assert_eq!(
        inserts,
        vec![
            serde_json::json!({"name": "New User"}),
            serde_json::json!({"name": "Duplicate"})
        ]
    );
}

#[tokio::test]
async fn wrong_key_and_unreachable_store_are_errors() {
    let (addr, _) = spawn_stub().await;
    let err = store(addr, "wrong-key").list_users().await.unwrap_err();
    assert_eq!(err.code, None);
    assert_eq!(err.message, "Invalid API key");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let dead = listener.local_addr().expect("local addr should exist");
    drop(listener);

    let err = store(dead, "service-key").ping().await.unwrap_err();
    assert!(err.message.starts_with("store request failed"));
}
