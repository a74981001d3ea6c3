use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::session::SessionManager;

/// A pluggable credential checker. Adding a module means implementing this
/// trait and registering it; the transport and router never switch on
/// module names themselves.
pub trait Authenticator: Send + Sync {
    /// Tag clients select this module by (e.g. "internal").
    fn module(&self) -> &'static str;

    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Checks against the local credential store.
pub struct InternalAuthenticator {
    credentials: Arc<CredentialStore>,
}

impl InternalAuthenticator {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }
}

impl Authenticator for InternalAuthenticator {
    fn module(&self) -> &'static str {
        "internal"
    }

    fn authenticate(&self, username: &str, password: &str) -> bool {
        self.credentials.authenticate(username, password)
    }
}

/// The set of registered authentication modules.
pub struct AuthModules {
    modules: Vec<Arc<dyn Authenticator>>,
}

impl AuthModules {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: Arc<dyn Authenticator>) {
        tracing::info!(module = module.module(), "registered auth module");
        self.modules.push(module);
    }

    fn get(&self, tag: &str) -> Option<&Arc<dyn Authenticator>> {
        self.modules.iter().find(|m| m.module() == tag)
    }

    /// Authenticates against the named module and issues a session token.
    pub async fn authenticate(
        &self,
        module: &str,
        username: &str,
        password: &str,
        sessions: &SessionManager,
    ) -> Result<String> {
        let authenticator = self.get(module).ok_or_else(|| {
            Error::authentication(format!("unknown auth-module \"{module}\""))
        })?;

        if !authenticator.authenticate(username, password) {
            return Err(Error::authentication("wrong username or password"));
        }

        Ok(sessions.create(username).await)
    }
}

impl Default for AuthModules {
    fn default() -> Self {
        Self::new()
    }
}
