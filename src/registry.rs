use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const USERS_FILE: &str = "users.json";

/// A provisioned account. Created by the admin tool, loaded at startup,
/// never mutated by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub private_key: String,
    pub public_key: String,
}

/// The account registry: every local user keyed by username.
pub struct AccountRegistry {
    users: HashMap<String, User>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    pub fn from_users(users: HashMap<String, User>) -> Self {
        Self { users }
    }

    /// Loads users.json from the config directory. A missing file yields an
    /// empty registry so a freshly provisioned host can boot.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(USERS_FILE);

        let users = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no users.json found, starting empty");
                HashMap::new()
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(accounts = users.len(), "loaded account registry");
        Ok(Self { users })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(USERS_FILE);
        let contents = serde_json::to_string_pretty(&self.users)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn insert(&mut self, username: String, user: User) {
        self.users.insert(username, user);
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    pub fn public_key(&self, username: &str) -> Option<&str> {
        self.users
            .get(username)
            .map(|user| user.public_key.as_str())
            .filter(|key| !key.is_empty())
    }

    pub fn private_key(&self, username: &str) -> Option<&str> {
        self.users
            .get(username)
            .map(|user| user.private_key.as_str())
            .filter(|key| !key.is_empty())
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}
