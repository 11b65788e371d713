//! Harness for driving a real API server over loopback.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Router;
use jsonwebtoken::{EncodingKey, Header, encode};
use tandem_api::config::ApiConfig;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const TEST_JWT_SECRET: &str = "tandem-e2e-secret-0123456789abcdef";

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// JWT auth against [`TEST_JWT_SECRET`] with the in-memory store.
pub fn local_config() -> ApiConfig {
    ApiConfig::from_kv(&HashMap::from([
        ("TANDEM_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        ("TANDEM_AUTH_MODE".to_string(), "jwt".to_string()),
        ("TANDEM_STORE_MODE".to_string(), "memory".to_string()),
        ("SUPABASE_JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
    ]))
    .expect("e2e config should be valid")
}

pub async fn spawn_api(config: &ApiConfig) -> TestServer {
    let app = tandem_api::http::router(config).expect("api router should init");
    let server = spawn_server(app).await;
    wait_for_healthz(&reqwest::Client::new(), server.addr).await;
    server
}

pub async fn spawn_server(app: Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    TestServer {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    }
}

pub async fn wait_for_healthz(client: &reqwest::Client, addr: SocketAddr) {
    let url = format!("http://{}/healthz", addr);

    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("server did not become ready at {}", url);
}

/// Signs an access token the way the identity provider would.
pub fn sign_token(sub: &str, email: &str, ttl: Duration) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs();
    sign_claims(&serde_json::json!({
        "sub": sub,
        "email": email,
        "aud": "authenticated",
        "exp": now + ttl.as_secs(),
        "user_metadata": {"full_name": "E2E User"},
    }))
}

pub fn sign_claims(claims: &serde_json::Value) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("token should sign")
}
