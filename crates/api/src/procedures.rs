//! The application's procedures.
//!
//! Handlers receive the store as injected state, so tests swap in a fake
//! without touching process-wide configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_contracts::{ErrorCode, NewUser, User};
use tandem_rpc::{
    AuthedContext, Caller, Context, Router, RouterError, RpcError, protected_procedure,
    public_procedure,
};
use tandem_store::UserStore;

pub type SharedStore = Arc<dyn UserStore>;
pub type AppRouter = Router<SharedStore>;

pub const AUTH_SUCCESS_MESSAGE: &str = "Authentication successful! You are authenticated.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub greeting: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCheck {
    pub authenticated: bool,
    pub user: AuthUser,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

pub fn app_router() -> Result<AppRouter, RouterError> {
    Router::new()
        .with(
            "hello",
            public_procedure().query_with(
                |_: SharedStore, _: Context, input: Option<HelloInput>| async move {
                    let name = input.and_then(|i| i.name);
                    Ok::<_, RpcError>(Greeting {
                        greeting: format!("Hello {}!", name.as_deref().unwrap_or("world")),
                    })
                },
            ),
        )?
        .with(
            "userList",
            public_procedure().query(|store: SharedStore, _: Context| async move {
                store.list_users().await.map_err(|err| {
                    RpcError::new(
                        ErrorCode::FetchFailed,
                        format!("Failed to fetch users: {}", err.message),
                    )
                })
            }),
        )?
        .with(
            "userById",
            public_procedure().query_with(
                |store: SharedStore, _: Context, id: String| async move {
                    match store.get_user(&id).await {
                        Ok(user) => Ok(Some(user)),
                        Err(err) if err.is_no_rows() => Ok(None),
                        Err(err) => Err(RpcError::new(
                            ErrorCode::FetchFailed,
                            format!("Failed to fetch user: {}", err.message),
                        )),
                    }
                },
            ),
        )?
        .with(
            "userCreate",
            public_procedure().mutation_with(
                |store: SharedStore, _: Context, input: NewUser| async move {
                    store.insert_user(input).await.map_err(|err| {
                        RpcError::new(
                            ErrorCode::CreateFailed,
                            format!("Failed to create user: {}", err.message),
                        )
                    })
                },
            ),
        )?
        .with(
            "testAuth",
            protected_procedure().query(|_: SharedStore, ctx: AuthedContext| async move {
                let identity = ctx.identity();
                Ok::<_, RpcError>(AuthCheck {
                    authenticated: true,
                    user: AuthUser {
                        id: identity.id.clone(),
                        email: identity.email.clone(),
                        metadata: identity.metadata.clone(),
                    },
                    message: AUTH_SUCCESS_MESSAGE.to_string(),
                })
            }),
        )
}

/// Typed server-side entry points over [`app_router`].
pub struct AppCaller<'r> {
    inner: Caller<'r, SharedStore>,
}

impl<'r> AppCaller<'r> {
    pub fn new(router: &'r AppRouter, store: SharedStore, ctx: Context) -> Self {
        Self {
            inner: router.caller(store, ctx),
        }
    }

    pub async fn hello(&self, name: Option<&str>) -> Result<Greeting, RpcError> {
        let input = name.map(|name| HelloInput {
            name: Some(name.to_string()),
        });
        self.inner.call_as("hello", input.as_ref()).await
    }

    pub async fn user_list(&self) -> Result<Vec<User>, RpcError> {
        self.inner.call_as::<(), _>("userList", None).await
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<User>, RpcError> {
        self.inner.call_as("userById", Some(id)).await
    }

    pub async fn user_create(&self, name: &str) -> Result<User, RpcError> {
        let input = NewUser {
            name: name.to_string(),
        };
        self.inner.call_as("userCreate", Some(&input)).await
    }

    pub async fn test_auth(&self) -> Result<AuthCheck, RpcError> {
        self.inner.call_as::<(), _>("testAuth", None).await
    }
}
