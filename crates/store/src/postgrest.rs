use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tandem_contracts::{NewUser, User};

use crate::{NO_ROWS_CODE, StoreError, UserStore};

const USER_COLUMNS: &str = "id,name";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout: Duration,
}

/// `UserStore` backed by the hosted database's PostgREST endpoint.
#[derive(Clone)]
pub struct PostgrestUserStore {
    config: PostgrestConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PostgrestUserStore {
    pub fn new(config: PostgrestConfig) -> Result<Self, StoreError> {
        if config.base_url.trim().is_empty() {
            return Err(StoreError::new("store url must be non-empty"));
        }
        if config.table.trim().is_empty() {
            return Err(StoreError::new("users table must be non-empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| StoreError::new("failed to initialize store http client"))?;

        Ok(Self { config, http })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", self.config.api_key.as_str())
            .bearer_auth(self.config.api_key.as_str())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorized(builder).send().await.map_err(|err| {
            StoreError::new(if err.is_timeout() {
                "store request timed out".to_string()
            } else {
                format!("store request failed: {}", err)
            })
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status, &body))
    }
}

fn error_from_body(status: StatusCode, body: &str) -> StoreError {
    let parsed = serde_json::from_str::<PostgrestErrorBody>(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.clone());
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("store returned status {}", status));

    match code {
        Some(code) => StoreError::with_code(code, message),
        // A single-object read that matched zero rows is refused with 406.
        None if status == StatusCode::NOT_ACCEPTABLE => {
            StoreError::with_code(NO_ROWS_CODE, message)
        }
        None => StoreError::new(message),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    response
        .json::<T>()
        .await
        .map_err(|err| StoreError::new(format!("store returned invalid JSON: {}", err)))
}

#[async_trait]
impl UserStore for PostgrestUserStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let request = self
            .http
            .get(self.table_url())
            .query(&[("select", USER_COLUMNS)]);
        decode(self.send(request).await?).await
    }

    async fn get_user(&self, id: &str) -> Result<User, StoreError> {
        let filter = format!("eq.{}", id);
        let request = self
            .http
            .get(self.table_url())
            .query(&[("select", USER_COLUMNS), ("id", filter.as_str())])
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT);
        decode(self.send(request).await?).await
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let request = self
            .http
            .post(self.table_url())
            .query(&[("select", USER_COLUMNS)])
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .header("Prefer", "return=representation")
            .json(&user);
        let inserted: User = decode(self.send(request).await?).await?;
        tracing::debug!(user_id = %inserted.id, "user inserted");
        Ok(inserted)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let request = self
            .http
            .get(self.table_url())
            .query(&[("select", "id"), ("limit", "1")]);
        self.send(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_code_and_message_are_preserved() {
        let err = error_from_body(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key value","details":null,"hint":null}"#,
        );
        assert_eq!(err.code.as_deref(), Some("23505"));
        assert_eq!(err.message, "duplicate key value");
    }

    #[test]
    fn bare_406_is_treated_as_no_rows() {
        let err = error_from_body(StatusCode::NOT_ACCEPTABLE, "");
        assert!(err.is_no_rows());
    }

    #[test]
    fn unparseable_body_falls_back_to_status() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(err.code, None);
        assert!(err.message.contains("502"));
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = PostgrestUserStore::new(PostgrestConfig {
            base_url: " ".to_string(),
            api_key: "k".to_string(),
            table: "users".to_string(),
            timeout: Duration::from_secs(1),
        })
        .err()
        .expect("empty url must fail");
        assert!(err.message.contains("url"));
    }
}
