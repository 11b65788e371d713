//! Caller-side adapter for the RPC endpoint.
//!
//! A [`Client`] resolves its endpoint once at construction, attaches the
//! session's bearer token to every request, coalesces concurrent calls into
//! batched requests and caches successful query results.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tandem_contracts::{ErrorCode, ProcedureKind};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

mod batch;
mod cache;
mod platform;
mod registry;
mod session;
mod transport;

pub use self::cache::QueryCache;
pub use self::platform::{
    BuildProfile, CurrentPlatform, NativePlatform, Platform, RPC_PATH, WebPlatform,
    resolve_endpoint,
};
pub use self::registry::ClientRegistry;
pub use self::session::{NoSession, SessionSource, SessionStore};

use self::batch::PendingCall;
use self::transport::{OutboundCall, Transport};

pub const API_URL_ENV: &str = "TANDEM_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("no API base URL for this production build; set TANDEM_API_URL")]
    MissingBaseUrl,
    #[error("invalid API base URL `{url}`: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("rpc transport failed: {message}")]
    Transport { message: String },
    #[error("rpc response could not be decoded: {message}")]
    Decode { message: String },
    #[error("{code}: {message}")]
    Rpc { code: ErrorCode, message: String },
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the server refused the call for lack of a session.
    pub fn is_unauthorized(&self) -> bool {
        self.code() == Some(ErrorCode::Unauthorized)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub profile: BuildProfile,
    pub page_origin: Option<String>,
    pub batching: bool,
    pub max_batch_size: usize,
    pub stale_time: Duration,
    pub max_cache_entries: usize,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            profile: BuildProfile::current(),
            page_origin: None,
            batching: true,
            max_batch_size: 16,
            stale_time: Duration::from_secs(30),
            max_cache_entries: 256,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Defaults plus the `TANDEM_API_URL` override when set.
    pub fn from_env() -> Self {
        let base_url = std::env::var(API_URL_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Self {
            base_url,
            ..Self::default()
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn page_origin(mut self, origin: impl Into<String>) -> Self {
        self.page_origin = Some(origin.into());
        self
    }

    pub fn batching(mut self, enabled: bool) -> Self {
        self.batching = enabled;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn max_cache_entries(mut self, max_entries: usize) -> Self {
        self.max_cache_entries = max_entries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resolve<P: Platform>(&self) -> Result<Url, ClientError> {
        resolve_endpoint::<P>(
            self.base_url.as_deref(),
            self.profile,
            self.page_origin.as_deref(),
        )
    }
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<Transport>,
    dispatcher: Option<mpsc::UnboundedSender<PendingCall>>,
    cache: QueryCache,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint().as_str())
            .field("batching", &self.inner.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Builds a client for the platform selected at compile time.
    pub fn new(config: &ClientConfig, session: Arc<dyn SessionSource>) -> Result<Self, ClientError> {
        Self::for_platform::<CurrentPlatform>(config, session)
    }

    pub fn for_platform<P: Platform>(
        config: &ClientConfig,
        session: Arc<dyn SessionSource>,
    ) -> Result<Self, ClientError> {
        let endpoint = config.resolve::<P>()?;
        Self::with_endpoint(endpoint, config, session)
    }

    pub(crate) fn with_endpoint(
        endpoint: Url,
        config: &ClientConfig,
        session: Arc<dyn SessionSource>,
    ) -> Result<Self, ClientError> {
        let transport = Arc::new(Transport::new(endpoint, session, config.timeout)?);

        // Batching needs a runtime to host the dispatcher task.
        let dispatcher = match (config.batching, tokio::runtime::Handle::try_current()) {
            (true, Ok(handle)) => Some(batch::spawn_dispatcher(
                &handle,
                Arc::clone(&transport),
                config.max_batch_size,
            )),
            (true, Err(_)) => {
                tracing::debug!("no tokio runtime at client construction; batching disabled");
                None
            }
            (false, _) => None,
        };

        tracing::debug!(
            endpoint = %transport.endpoint(),
            batching = dispatcher.is_some(),
            "rpc client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                dispatcher,
                cache: QueryCache::new(config.stale_time, config.max_cache_entries),
            }),
        })
    }

    pub fn endpoint(&self) -> &Url {
        self.inner.transport.endpoint()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    pub fn invalidate(&self) {
        self.inner.cache.invalidate();
    }

    pub async fn query<I, O>(&self, name: &str, input: Option<&I>) -> Result<O, ClientError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = encode_input(input)?;
        let value = self.call(ProcedureKind::Query, name, input).await?;
        decode_output(value)
    }

    pub async fn mutation<I, O>(&self, name: &str, input: Option<&I>) -> Result<O, ClientError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = encode_input(input)?;
        let value = self.call(ProcedureKind::Mutation, name, input).await?;
        decode_output(value)
    }

    fn session_key(&self) -> String {
        cache::session_key(self.inner.transport.access_token().as_deref())
    }

    /// Untyped call. Query results are served from and stored in the cache
    /// partition of the session current at call time.
    pub async fn call(
        &self,
        kind: ProcedureKind,
        name: &str,
        input: Option<Value>,
    ) -> Result<Value, ClientError> {
        let session = self.session_key();
        if kind == ProcedureKind::Query
            && let Some(hit) = self.inner.cache.get(&session, name, input.as_ref())
        {
            return Ok(hit);
        }

        let cache_input = (kind == ProcedureKind::Query).then(|| input.clone());
        let call = OutboundCall {
            name: name.to_string(),
            input,
        };

        let result = match &self.inner.dispatcher {
            Some(dispatcher) => {
                let (reply, receiver) = oneshot::channel();
                dispatcher
                    .send(PendingCall { kind, call, reply })
                    .map_err(|_| ClientError::Transport {
                        message: "batch dispatcher stopped".to_string(),
                    })?;
                receiver.await.map_err(|_| ClientError::Transport {
                    message: "batch dispatcher dropped the call".to_string(),
                })?
            }
            None => self
                .inner
                .transport
                .send(kind, std::slice::from_ref(&call))
                .await
                .into_iter()
                .next()
                .unwrap_or_else(|| {
                    Err(ClientError::Decode {
                        message: "no result for call".to_string(),
                    })
                }),
        };

        // A session change mid-flight leaves the result uncached.
        if let (Ok(value), Some(input)) = (&result, cache_input)
            && self.session_key() == session
        {
            self.inner.cache.put(&session, name, input.as_ref(), value.clone());
        }
        result
    }
}

fn encode_input<I: Serialize + ?Sized>(input: Option<&I>) -> Result<Option<Value>, ClientError> {
    input
        .map(serde_json::to_value)
        .transpose()
        .map_err(|err| ClientError::Decode {
            message: format!("failed to encode input: {}", err),
        })
}

fn decode_output<O: DeserializeOwned>(value: Value) -> Result<O, ClientError> {
    serde_json::from_value(value).map_err(|err| ClientError::Decode {
        message: format!("unexpected result shape: {}", err),
    })
}
