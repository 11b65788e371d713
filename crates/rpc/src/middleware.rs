use std::sync::Arc;

use tandem_auth::Context;
use tandem_contracts::Identity;

use crate::RpcError;

/// A step in a procedure's middleware chain. Steps run in registration
/// order and may only reject; they never rewrite the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Middleware {
    RequireIdentity,
}

impl Middleware {
    pub fn name(self) -> &'static str {
        match self {
            Middleware::RequireIdentity => "require_identity",
        }
    }

    pub fn check(self, ctx: &Context) -> Result<(), RpcError> {
        match self {
            Middleware::RequireIdentity => {
                if ctx.is_authenticated() {
                    Ok(())
                } else {
                    Err(RpcError::unauthorized())
                }
            }
        }
    }
}

pub(crate) fn run_chain(chain: &[Middleware], ctx: &Context) -> Result<(), RpcError> {
    for step in chain {
        step.check(ctx)?;
    }
    Ok(())
}

/// The context shape a handler asks for.
pub trait FromContext: Sized + Send + 'static {
    fn from_context(ctx: &Context) -> Result<Self, RpcError>;
}

impl FromContext for Context {
    fn from_context(ctx: &Context) -> Result<Self, RpcError> {
        Ok(ctx.clone())
    }
}

/// Context narrowed to callers with a resolved identity.
///
/// Shares the request's identity allocation rather than copying it.
#[derive(Debug, Clone)]
pub struct AuthedContext {
    identity: Arc<Identity>,
}

impl AuthedContext {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn shared_identity(&self) -> &Arc<Identity> {
        &self.identity
    }
}

impl FromContext for AuthedContext {
    fn from_context(ctx: &Context) -> Result<Self, RpcError> {
        ctx.shared_identity()
            .cloned()
            .map(|identity| AuthedContext { identity })
            .ok_or_else(RpcError::unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_contracts::{ErrorCode, UNAUTHORIZED_MESSAGE};

    fn identity() -> Identity {
        Identity {
            id: "u1".to_string(),
            email: Some("a@b.com".to_string()),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn require_identity_rejects_anonymous_context() {
        let err = Middleware::RequireIdentity
            .check(&Context::anonymous())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.message, UNAUTHORIZED_MESSAGE);
    }

    #[test]
    fn require_identity_passes_authenticated_context() {
        assert!(
            Middleware::RequireIdentity
                .check(&Context::authenticated(identity()))
                .is_ok()
        );
    }

    #[test]
    fn authed_context_shares_identity_allocation() {
        let shared = Arc::new(identity());
        let ctx = Context::with_identity(shared.clone());

        let authed = AuthedContext::from_context(&ctx).unwrap();
        assert!(Arc::ptr_eq(authed.shared_identity(), &shared));
        assert_eq!(authed.identity(), &identity());
    }
}
