use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tandem_contracts::Identity;

use crate::{AuthError, IdentityVerifier, metadata_object, non_empty};

#[derive(Debug, Clone)]
pub struct RemoteIdentityConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Verifies access tokens against the hosted auth service (`GET /auth/v1/user`).
#[derive(Clone)]
pub struct RemoteIdentityVerifier {
    config: RemoteIdentityConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<serde_json::Value>,
}

impl RemoteIdentityVerifier {
    pub fn new(config: RemoteIdentityConfig) -> Result<Self, AuthError> {
        if config.base_url.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "identity service url must be non-empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "failed to initialize identity http client".to_string(),
            })?;

        Ok(Self { config, http })
    }

    fn user_url(&self) -> String {
        format!("{}/auth/v1/user", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl IdentityVerifier for RemoteIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .http
            .get(self.user_url())
            .header("apikey", self.config.api_key.as_str())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: if err.is_timeout() {
                    "identity service timed out".to_string()
                } else {
                    "identity service request failed".to_string()
                },
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: format!("identity service rejected token with status {}", status),
            });
        }
        if !status.is_success() {
            return Err(AuthError {
                code: "ERR_AUTH_UNAVAILABLE",
                message: format!("identity service returned status {}", status),
            });
        }

        let user = response.json::<RemoteUser>().await.map_err(|_| AuthError {
            code: "ERR_AUTH_UNAVAILABLE",
            message: "identity service returned invalid user JSON".to_string(),
        })?;

        let id = non_empty(Some(user.id.as_str())).ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "identity service returned a user without id".to_string(),
        })?;

        Ok(Identity {
            id,
            email: non_empty(user.email.as_deref()),
            metadata: metadata_object(user.user_metadata.as_ref()),
        })
    }
}
