//! Typed procedure registry with an ordered middleware chain.
//!
//! A [`Router`] maps procedure names to [`Procedure`] definitions. Each
//! procedure declares its kind (query or mutation), an optional input schema
//! expressed as a `Deserialize` type, and an async handler. The registry is
//! built once at startup and is read-only afterwards, so it can be shared
//! behind an `Arc` by every in-flight request.
//!
//! Invocation order is fixed: middleware, then input validation, then the
//! handler.

use std::future::Future;
use std::pin::Pin;

use tandem_contracts::{ErrorBody, ErrorCode, UNAUTHORIZED_MESSAGE};

mod middleware;
mod procedure;
mod router;

pub use tandem_auth::Context;
pub use tandem_contracts::ProcedureKind;

pub use self::middleware::{AuthedContext, FromContext, Middleware};
pub use self::procedure::{Procedure, ProcedureBuilder, protected_procedure, public_procedure};
pub use self::router::{Caller, Router, RouterError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadInput, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, UNAUTHORIZED_MESSAGE)
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("no procedure registered under `{}`", name),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn into_body(self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<RpcError> for ErrorBody {
    fn from(value: RpcError) -> Self {
        value.into_body()
    }
}
