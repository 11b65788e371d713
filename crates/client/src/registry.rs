use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::platform::{CurrentPlatform, Platform};
use crate::session::SessionSource;
use crate::{Client, ClientConfig, ClientError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    endpoint: String,
    // Address of the session allocation. The registered client holds that
    // `Arc`, so the address cannot be reused while the entry exists.
    session: usize,
}

impl RegistryKey {
    fn new(endpoint: &str, session: &Arc<dyn SessionSource>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            session: Arc::as_ptr(session).cast::<()>() as usize,
        }
    }
}

/// One client, and so one query cache, per resolved endpoint and session
/// source.
///
/// Owned by the application shell and passed to whatever needs a client.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<RegistryKey, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(
        &self,
        config: &ClientConfig,
        session: Arc<dyn SessionSource>,
    ) -> Result<Client, ClientError> {
        self.client_for::<CurrentPlatform>(config, session)
    }

    /// Returns the existing client for the endpoint `config` resolves to and
    /// this exact `session` handle, or builds one. A later config for the
    /// same pair reuses the first client's settings.
    pub fn client_for<P: Platform>(
        &self,
        config: &ClientConfig,
        session: Arc<dyn SessionSource>,
    ) -> Result<Client, ClientError> {
        let endpoint = config.resolve::<P>()?;
        let key = RegistryKey::new(endpoint.as_str(), &session);

        let mut clients = self.clients.lock().map_err(|_| ClientError::Transport {
            message: "client registry lock poisoned".to_string(),
        })?;
        if let Some(existing) = clients.get(&key) {
            return Ok(existing.clone());
        }

        let client = Client::with_endpoint(endpoint, config, session)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
