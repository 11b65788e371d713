use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;
use tandem_contracts::Identity;

use crate::{AuthError, IdentityVerifier, metadata_object, non_empty};

#[derive(Debug, Clone)]
pub struct JwtIdentityConfig {
    pub secret: String,
    pub audience: String,
    pub leeway: Duration,
}

/// Verifies HS256 access tokens locally with the project's JWT secret.
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(config: JwtIdentityConfig) -> Result<Self, AuthError> {
        if config.secret.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "jwt secret must be non-empty".to_string(),
            });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&config.audience));
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        validation.leeway = config.leeway.as_secs();

        Ok(Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        })
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "invalid JWT header".to_string(),
        })?;

        if header.alg != Algorithm::HS256 {
            return Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: "unsupported JWT alg (expected HS256)".to_string(),
            });
        }

        let claims = decode::<Value>(token, &self.key, &self.validation)
            .map_err(|err| AuthError {
                code: "ERR_AUTH_INVALID",
                message: format!("JWT validation failed: {}", err),
            })?
            .claims;

        let id = non_empty(claims.get("sub").and_then(|v| v.as_str())).ok_or_else(|| {
            AuthError {
                code: "ERR_AUTH_INVALID",
                message: "required claim `sub` is missing or not a string".to_string(),
            }
        })?;

        Ok(Identity {
            id,
            email: non_empty(claims.get("email").and_then(|v| v.as_str())),
            metadata: metadata_object(claims.get("user_metadata")),
        })
    }
}
