use std::sync::Arc;

use crate::auth::AuthModules;
use crate::broker::Broker;
use crate::config::Config;
use crate::registry::AccountRegistry;
use crate::session::SessionManager;

/// Application context containing shared dependencies.
/// This reduces parameter passing and makes it easier to add new ones.
#[derive(Clone)]
pub struct AppContext {
    pub broker: Arc<Broker>,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<AccountRegistry>,
    pub auth: Arc<AuthModules>,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(
        broker: Arc<Broker>,
        sessions: Arc<SessionManager>,
        registry: Arc<AccountRegistry>,
        auth: Arc<AuthModules>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            broker,
            sessions,
            registry,
            auth,
            config,
        }
    }
}
