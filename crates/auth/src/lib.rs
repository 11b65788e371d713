use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use http::header;
use tandem_contracts::Identity;
use tandem_contracts::canonical;

mod jwt;
mod remote;

pub use self::jwt::{JwtIdentityConfig, JwtIdentityVerifier};
pub use self::remote::{RemoteIdentityConfig, RemoteIdentityVerifier};

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

/// Resolves a bearer credential to an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Per-request data handed to every procedure. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Context {
    identity: Option<Arc<Identity>>,
}

impl Context {
    pub fn anonymous() -> Self {
        Self { identity: None }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self::with_identity(Arc::new(identity))
    }

    pub fn with_identity(identity: Arc<Identity>) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    pub fn shared_identity(&self) -> Option<&Arc<Identity>> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Anonymous,
    Verified,
    Rejected(&'static str),
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationOutcome::Anonymous => "anonymous",
            VerificationOutcome::Verified => "verified",
            VerificationOutcome::Rejected(_) => "rejected",
        }
    }
}

#[derive(Clone)]
pub struct ContextBuilder {
    verifier: Arc<dyn IdentityVerifier>,
}

impl ContextBuilder {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }

    pub async fn build(&self, headers: &HeaderMap) -> Context {
        self.resolve(headers).await.0
    }

    /// Builds the context and reports how the credential was handled.
    ///
    /// Verification failures never surface as errors: the caller is
    /// treated as anonymous and the failure is logged.
    pub async fn resolve(&self, headers: &HeaderMap) -> (Context, VerificationOutcome) {
        let Some(token) = bearer_token(headers) else {
            return (Context::anonymous(), VerificationOutcome::Anonymous);
        };

        match self.verifier.verify(&token).await {
            Ok(identity) => (
                Context::authenticated(identity),
                VerificationOutcome::Verified,
            ),
            Err(err) => {
                tracing::warn!(
                    code = err.code,
                    token_fingerprint = %canonical::fingerprint(&token),
                    "identity verification failed; continuing as anonymous: {}",
                    err.message
                );
                (Context::anonymous(), VerificationOutcome::Rejected(err.code))
            }
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))?
        .trim();

    (!token.is_empty()).then(|| token.to_string())
}

fn metadata_object(value: Option<&serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    match value {
        Some(serde_json::Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
