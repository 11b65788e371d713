use std::sync::RwLock;

use async_trait::async_trait;
use tandem_contracts::{NewUser, User};
use ulid::Ulid;

use crate::{StoreError, UserStore};

/// Process-local store for development and tests. Rows live as long as the
/// store value.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    rows: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            rows: RwLock::new(users.into_iter().collect()),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::new("memory store lock poisoned")
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.clone())
    }

    async fn get_user(&self, id: &str) -> Result<User, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        rows.iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or_else(StoreError::no_rows)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        if user.name.trim().is_empty() {
            return Err(StoreError::with_code(
                "23514",
                "new row violates check constraint \"users_name_check\"",
            ));
        }

        let row = User {
            id: Ulid::new().to_string().to_lowercase(),
            name: user.name,
        };
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.push(row.clone());
        Ok(row)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.rows.read().map(|_| ()).map_err(|_| Self::poisoned())
    }
}
