//! User persistence behind the hosted store's REST interface.
//!
//! Handlers never see transport details: every failure arrives as a
//! [`StoreError`] carrying the store's own error code when it supplied one.

use async_trait::async_trait;
use tandem_contracts::{NewUser, User};

mod memory;
mod postgrest;

pub use self::memory::MemoryUserStore;
pub use self::postgrest::{PostgrestConfig, PostgrestUserStore};

/// Error code the store reports when a single-row read matched nothing.
pub const NO_ROWS_CODE: &str = "PGRST116";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn no_rows() -> Self {
        Self::with_code(NO_ROWS_CODE, "No rows returned")
    }

    pub fn is_no_rows(&self) -> bool {
        self.code.as_deref() == Some(NO_ROWS_CODE)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Single-row read; a missing row is an error for which
    /// [`StoreError::is_no_rows`] holds.
    async fn get_user(&self, id: &str) -> Result<User, StoreError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
