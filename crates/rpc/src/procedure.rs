use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use tandem_auth::Context;
use tandem_contracts::ProcedureKind;

use crate::middleware::{FromContext, Middleware, run_chain};
use crate::{BoxFuture, RpcError};

type ErasedHandler<S> =
    Arc<dyn Fn(S, Context, Value) -> BoxFuture<Result<Value, RpcError>> + Send + Sync>;

/// A registered operation: kind, schema presence, middleware chain and handler.
pub struct Procedure<S> {
    kind: ProcedureKind,
    has_input: bool,
    middleware: Vec<Middleware>,
    handler: ErasedHandler<S>,
}

impl<S> Clone for Procedure<S> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            has_input: self.has_input,
            middleware: self.middleware.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<S> std::fmt::Debug for Procedure<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("kind", &self.kind)
            .field("has_input", &self.has_input)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

impl<S> Procedure<S> {
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub fn has_input(&self) -> bool {
        self.has_input
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    pub(crate) async fn invoke(
        &self,
        state: S,
        ctx: Context,
        input: Option<Value>,
    ) -> Result<Value, RpcError> {
        run_chain(&self.middleware, &ctx)?;
        (self.handler)(state, ctx, input.unwrap_or(Value::Null)).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcedureBuilder {
    middleware: Vec<Middleware>,
}

pub fn public_procedure() -> ProcedureBuilder {
    ProcedureBuilder::default()
}

pub fn protected_procedure() -> ProcedureBuilder {
    ProcedureBuilder::default().with(Middleware::RequireIdentity)
}

impl ProcedureBuilder {
    pub fn with(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Query without an input schema; any supplied input is ignored.
    pub fn query<S, C, O, F, Fut>(self, handler: F) -> Procedure<S>
    where
        S: Send + 'static,
        C: FromContext,
        O: Serialize + 'static,
        F: Fn(S, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        self.build(
            ProcedureKind::Query,
            false,
            move |state: S, ctx: C, _: IgnoredAny| handler(state, ctx),
        )
    }

    pub fn query_with<S, C, I, O, F, Fut>(self, handler: F) -> Procedure<S>
    where
        S: Send + 'static,
        C: FromContext,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(S, C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        self.build(ProcedureKind::Query, true, handler)
    }

    /// Mutation without an input schema; any supplied input is ignored.
    pub fn mutation<S, C, O, F, Fut>(self, handler: F) -> Procedure<S>
    where
        S: Send + 'static,
        C: FromContext,
        O: Serialize + 'static,
        F: Fn(S, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        self.build(
            ProcedureKind::Mutation,
            false,
            move |state: S, ctx: C, _: IgnoredAny| handler(state, ctx),
        )
    }

    pub fn mutation_with<S, C, I, O, F, Fut>(self, handler: F) -> Procedure<S>
    where
        S: Send + 'static,
        C: FromContext,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(S, C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        self.build(ProcedureKind::Mutation, true, handler)
    }

    fn build<S, C, I, O, F, Fut>(
        self,
        kind: ProcedureKind,
        has_input: bool,
        handler: F,
    ) -> Procedure<S>
    where
        S: Send + 'static,
        C: FromContext,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(S, C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler<S> = Arc::new(
            move |state: S, ctx: Context, raw: Value| -> BoxFuture<Result<Value, RpcError>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let ctx = C::from_context(&ctx)?;
                    let input = serde_json::from_value::<I>(raw)
                        .map_err(|err| RpcError::bad_input(format!("invalid input: {}", err)))?;
                    let output = handler(state, ctx, input).await?;
                    serde_json::to_value(output).map_err(|err| {
                        RpcError::internal(format!("failed to serialize output: {}", err))
                    })
                })
            },
        );

        Procedure {
            kind,
            has_input,
            middleware: self.middleware,
            handler: erased,
        }
    }
}
