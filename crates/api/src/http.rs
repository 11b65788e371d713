use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_auth::{
    ContextBuilder, IdentityVerifier, JwtIdentityVerifier, RemoteIdentityVerifier,
};
use tandem_contracts::{ErrorCode, ProcedureKind, RequestEnvelope, ResponseEnvelope};
use tandem_rpc::{Caller, Context, RpcError};
use tandem_store::{MemoryUserStore, PostgrestUserStore};
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{ApiConfig, AuthMode, StartupError, StoreMode};
use crate::procedures::{AppRouter, SharedStore, app_router};

pub const RPC_PREFIX: &str = "/api/trpc";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Upper bound on calls in one batched request.
pub const MAX_BATCH_CALLS: usize = 64;

#[derive(Clone)]
pub struct AppState {
    procedures: Arc<AppRouter>,
    store: SharedStore,
    contexts: ContextBuilder,
}

impl AppState {
    pub fn new(procedures: AppRouter, store: SharedStore, contexts: ContextBuilder) -> Self {
        Self {
            procedures: Arc::new(procedures),
            store,
            contexts,
        }
    }
}

pub fn router(config: &ApiConfig) -> Result<Router, StartupError> {
    let verifier: Arc<dyn IdentityVerifier> = match config.auth_mode {
        AuthMode::Remote => {
            let remote = config.remote_identity.clone().ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "remote auth mode requires identity service config".to_string(),
            })?;
            Arc::new(RemoteIdentityVerifier::new(remote).map_err(|err| StartupError {
                code: err.code,
                message: err.message,
            })?)
        }
        AuthMode::Jwt => {
            let jwt = config.jwt.clone().ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "jwt auth mode requires jwt config".to_string(),
            })?;
            Arc::new(JwtIdentityVerifier::new(jwt).map_err(|err| StartupError {
                code: err.code,
                message: err.message,
            })?)
        }
    };

    let store: SharedStore = match config.store_mode {
        StoreMode::Memory => Arc::new(MemoryUserStore::new()),
        StoreMode::Postgrest => {
            let postgrest = config.postgrest.clone().ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "postgrest store mode requires store config".to_string(),
            })?;
            Arc::new(
                PostgrestUserStore::new(postgrest).map_err(|err| StartupError {
                    code: "ERR_INVALID_CONFIG",
                    message: format!("failed to initialize store: {}", err),
                })?,
            )
        }
    };

    let procedures = app_router().map_err(|err| StartupError {
        code: err.code,
        message: err.message,
    })?;

    Ok(app(AppState::new(
        procedures,
        store,
        ContextBuilder::new(verifier),
    )))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/trpc/{procedures}", get(rpc_get).post(rpc_post))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let store_ready = state.store.ping().await.is_ok();
    checks.insert("store", store_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RpcQuery {
    #[serde(default)]
    batch: Option<String>,
    #[serde(default)]
    input: Option<String>,
}

impl RpcQuery {
    fn is_batch(&self) -> bool {
        matches!(self.batch.as_deref().map(str::trim), Some("1" | "true"))
    }
}

#[derive(Debug)]
struct CallRequest {
    name: String,
    input: Option<Value>,
}

async fn rpc_get(
    State(state): State<AppState>,
    Path(procedures): Path<String>,
    Query(query): Query<RpcQuery>,
    headers: HeaderMap,
) -> Response {
    let batch = query.is_batch();
    let calls = parse_query_calls(&procedures, batch, query.input.as_deref());
    handle(state, Method::GET, procedures, batch, calls, headers).await
}

async fn rpc_post(
    State(state): State<AppState>,
    Path(procedures): Path<String>,
    Query(query): Query<RpcQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let batch = query.is_batch();
    let calls = parse_body_calls(&procedures, batch, &body);
    handle(state, Method::POST, procedures, batch, calls, headers).await
}

fn split_names(procedures: &str, batch: bool) -> Result<Vec<String>, RpcError> {
    if !batch {
        return Ok(vec![procedures.to_string()]);
    }

    let names = procedures
        .split(',')
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    if names.len() > MAX_BATCH_CALLS {
        return Err(RpcError::bad_input(format!(
            "batch has {} calls; at most {} are allowed",
            names.len(),
            MAX_BATCH_CALLS
        )));
    }
    Ok(names)
}

fn parse_query_calls(
    procedures: &str,
    batch: bool,
    raw_input: Option<&str>,
) -> Result<Vec<CallRequest>, RpcError> {
    let names = split_names(procedures, batch)?;
    let input = raw_input
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| RpcError::bad_input(format!("input is not valid JSON: {}", err)))?;

    if !batch {
        return Ok(names
            .into_iter()
            .map(|name| CallRequest {
                name,
                input: input.clone(),
            })
            .collect());
    }

    let inputs = match input {
        None => vec![None; names.len()],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| (!item.is_null()).then_some(item))
            .collect(),
        Some(_) => return Err(RpcError::bad_input("batch input must be a JSON array")),
    };
    zip_batch(names, inputs)
}

fn parse_body_calls(
    procedures: &str,
    batch: bool,
    body: &[u8],
) -> Result<Vec<CallRequest>, RpcError> {
    let names = split_names(procedures, batch)?;
    let empty = body.iter().all(|b| b.is_ascii_whitespace());

    if !batch {
        let envelope = if empty {
            RequestEnvelope::default()
        } else {
            serde_json::from_slice::<RequestEnvelope>(body).map_err(|err| {
                RpcError::bad_input(format!("request body must be {{\"input\": ..}}: {}", err))
            })?
        };
        return Ok(names
            .into_iter()
            .map(|name| CallRequest {
                name,
                input: envelope.input.clone(),
            })
            .collect());
    }

    let inputs = if empty {
        vec![None; names.len()]
    } else {
        serde_json::from_slice::<Vec<RequestEnvelope>>(body)
            .map_err(|err| {
                RpcError::bad_input(format!(
                    "batch body must be an array of {{\"input\": ..}}: {}",
                    err
                ))
            })?
            .into_iter()
            .map(|envelope| envelope.input)
            .collect()
    };
    zip_batch(names, inputs)
}

fn zip_batch(
    names: Vec<String>,
    inputs: Vec<Option<Value>>,
) -> Result<Vec<CallRequest>, RpcError> {
    if names.len() != inputs.len() {
        return Err(RpcError::bad_input(format!(
            "batch has {} procedures but {} inputs",
            names.len(),
            inputs.len()
        )));
    }

    Ok(names
        .into_iter()
        .zip(inputs)
        .map(|(name, input)| CallRequest { name, input })
        .collect())
}

async fn handle(
    state: AppState,
    method: Method,
    procedures: String,
    batch: bool,
    calls: Result<Vec<CallRequest>, RpcError>,
    headers: HeaderMap,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "rpc.request",
        request_id = %request_id,
        method = %method,
        path = %procedures,
        batch_size = tracing::field::Empty,
        authenticated = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let (status, body) = async {
        let calls = match calls {
            Ok(calls) => calls,
            Err(err) => return error_response(err),
        };
        tracing::Span::current().record("batch_size", calls.len() as u64);

        let (ctx, verification) = state.contexts.resolve(&headers).await;
        crate::metrics::observe_identity_verification(verification.as_str());
        tracing::Span::current().record("authenticated", ctx.is_authenticated());

        let results = execute(&state, ctx, &method, calls).await;
        if batch {
            let status = if results.iter().all(Result::is_ok) {
                StatusCode::OK
            } else {
                StatusCode::MULTI_STATUS
            };
            let envelopes = results.into_iter().map(envelope).collect::<Vec<_>>();
            (status, Json(envelopes).into_response())
        } else {
            match results.into_iter().next() {
                Some(Ok(data)) => (
                    StatusCode::OK,
                    Json(ResponseEnvelope::data(data)).into_response(),
                ),
                Some(Err(err)) => error_response(err),
                None => error_response(RpcError::internal("no call was executed")),
            }
        }
    }
    .instrument(span.clone())
    .await;

    let elapsed = started.elapsed();
    span.record("latency_ms", elapsed.as_millis() as u64);
    span.record(
        "outcome",
        if status == StatusCode::OK { "ok" } else { "error" },
    );
    crate::metrics::observe_http_request(RPC_PREFIX, method.as_str(), status.as_u16(), elapsed);

    let mut response = (status, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn execute(
    state: &AppState,
    ctx: Context,
    method: &Method,
    calls: Vec<CallRequest>,
) -> Vec<Result<Value, RpcError>> {
    let caller = state.procedures.caller(state.store.clone(), ctx);
    let via_get = *method == Method::GET;

    join_all(
        calls
            .into_iter()
            .map(|call| run_call(&state.procedures, &caller, via_get, call)),
    )
    .await
}

async fn run_call(
    procedures: &AppRouter,
    caller: &Caller<'_, SharedStore>,
    via_get: bool,
    call: CallRequest,
) -> Result<Value, RpcError> {
    let registered = procedures.procedure(&call.name);
    let label = if registered.is_some() {
        call.name.as_str()
    } else {
        "unknown"
    };

    let result = match registered.map(|p| p.kind()) {
        Some(ProcedureKind::Mutation) if via_get => Err(RpcError::new(
            ErrorCode::MethodNotSupported,
            format!("mutation `{}` must be sent with POST", call.name),
        )),
        _ => caller.call(&call.name, call.input).await,
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.code.as_str(),
    };
    crate::metrics::observe_procedure_call(label, outcome);
    result
}

fn envelope(result: Result<Value, RpcError>) -> ResponseEnvelope {
    match result {
        Ok(data) => ResponseEnvelope::data(data),
        Err(err) => ResponseEnvelope::Error(err.into_body()),
    }
}

fn error_response(err: RpcError) -> (StatusCode, Response) {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ResponseEnvelope::Error(err.into_body())).into_response(),
    )
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}
