use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::RwLock;

use crate::config::TOKEN_LENGTH;

struct SessionEntry {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// Issues opaque bearer tokens on successful authentication, validates
/// them and expires them. Expiry is checked actively on every validation;
/// expired entries are evicted on sight.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

fn generate_token(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

impl SessionManager {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Issues a fresh token for `username`, valid for the configured TTL.
    pub async fn create(&self, username: &str) -> String {
        let token = generate_token(TOKEN_LENGTH);
        let expires_at = Utc::now() + self.ttl;

        self.sessions.write().await.insert(
            token.clone(),
            SessionEntry {
                owner: username.to_string(),
                expires_at,
            },
        );

        tracing::debug!(user = %username, "created session token");
        token
    }

    /// Returns the owner of a live token; `None` for unknown or expired
    /// tokens. Expired entries are removed.
    pub async fn validate(&self, token: &str) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(token) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.owner.clone()),
            Some(_) => {
                sessions.remove(token);
                tracing::debug!("evicted expired session token");
                None
            }
            None => None,
        }
    }

    /// Renders the session cookie value for a known token, embedding its
    /// expiry as an HTTP date.
    pub async fn cookie_header(&self, token: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(token)?;
        Some(format!(
            "auth-token={}; Expires={}",
            token,
            entry.expires_at.format("%a, %d %b %Y %H:%M:%S GMT")
        ))
    }

    /// Removes a session (logout).
    pub async fn kill(&self, token: &str) {
        if self.sessions.write().await.remove(token).is_some() {
            tracing::debug!("killed session token");
        }
    }
}
