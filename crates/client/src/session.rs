use std::sync::{Arc, RwLock};

/// Supplies the bearer credential for outbound calls. Read once per request.
pub trait SessionSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Caller-owned holder for the signed-in session's access token.
///
/// Clones share the same slot, so the auth flow can hold one handle and the
/// client another.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let token = (!token.trim().is_empty()).then_some(token);
        match self.token.write() {
            Ok(mut slot) => *slot = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub fn clear(&self) {
        match self.token.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl SessionSource for SessionStore {
    fn access_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// No session; every call goes out anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSession;

impl SessionSource for NoSession {
    fn access_token(&self) -> Option<String> {
        None
    }
}
