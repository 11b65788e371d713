use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tandem_auth::Context;
use tracing::Instrument;

use crate::RpcError;
use crate::procedure::Procedure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RouterError {}

/// Name to procedure map, keyed in sorted order so listings are stable.
pub struct Router<S> {
    procedures: BTreeMap<String, Procedure<S>>,
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self {
            procedures: BTreeMap::new(),
        }
    }
}

impl<S> Clone for Router<S> {
    fn clone(&self) -> Self {
        Self {
            procedures: self.procedures.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Router<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.procedures.iter()).finish()
    }
}

fn valid_procedure_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

impl<S> Router<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        procedure: Procedure<S>,
    ) -> Result<(), RouterError> {
        let name = name.into();
        if !valid_procedure_name(&name) {
            return Err(RouterError {
                code: "ERR_INVALID_PROCEDURE_NAME",
                message: format!(
                    "procedure name `{}` must be non-empty ascii alphanumerics, '.' or '_'",
                    name
                ),
            });
        }
        if self.procedures.contains_key(&name) {
            return Err(RouterError {
                code: "ERR_DUPLICATE_PROCEDURE",
                message: format!("procedure `{}` is already registered", name),
            });
        }

        self.procedures.insert(name, procedure);
        Ok(())
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        procedure: Procedure<S>,
    ) -> Result<Self, RouterError> {
        self.register(name, procedure)?;
        Ok(self)
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure<S>> {
        self.procedures.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Binds injected state and a per-request context for direct invocation.
    pub fn caller(&self, state: S, ctx: Context) -> Caller<'_, S> {
        Caller {
            router: self,
            state,
            ctx,
        }
    }
}

/// Invokes procedures by name against one bound context.
pub struct Caller<'r, S> {
    router: &'r Router<S>,
    state: S,
    ctx: Context,
}

impl<S> Caller<'_, S>
where
    S: Clone + Send + 'static,
{
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub async fn call(&self, name: &str, input: Option<Value>) -> Result<Value, RpcError> {
        let Some(procedure) = self.router.procedure(name) else {
            tracing::debug!(procedure = %name, "unknown procedure");
            return Err(RpcError::not_found(name));
        };

        let span = tracing::info_span!(
            "rpc.procedure",
            procedure = %name,
            kind = procedure.kind().as_str(),
            authenticated = self.ctx.is_authenticated(),
            outcome = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        );

        let started = Instant::now();
        let result = procedure
            .invoke(self.state.clone(), self.ctx.clone(), input)
            .instrument(span.clone())
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.code.as_str(),
        };
        span.record("outcome", outcome);
        span.record("latency_ms", started.elapsed().as_millis() as u64);

        result
    }

    pub async fn call_as<I, O>(&self, name: &str, input: Option<&I>) -> Result<O, RpcError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = input
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| RpcError::bad_input(format!("failed to encode input: {}", err)))?;
        let output = self.call(name, input).await?;
        serde_json::from_value(output)
            .map_err(|err| RpcError::internal(format!("failed to decode output: {}", err)))
    }
}
