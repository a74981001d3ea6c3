use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{Error, Result};

pub const PASSWD_FILE: &str = "passwd";

/// Verifies local username/password pairs against stored bcrypt hashes.
///
/// Backed by a passwd file with one `username:hash` line per account.
/// The broker only reads it; accounts are added by the provisioning tool.
pub struct CredentialStore {
    hashes: HashMap<String, String>,
    passwd_path: Option<PathBuf>,
}

impl CredentialStore {
    /// In-memory store without a backing file.
    pub fn new() -> Self {
        Self {
            hashes: HashMap::new(),
            passwd_path: None,
        }
    }

    /// Loads the passwd file from the config directory. A missing file
    /// yields an empty store so a freshly provisioned host can boot.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PASSWD_FILE);
        let mut hashes = HashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.split_once(':') {
                        Some((username, hash)) => {
                            hashes.insert(username.to_string(), hash.to_string());
                        }
                        None => {
                            tracing::warn!(path = %path.display(), "skipping malformed passwd line");
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no passwd file found, starting empty");
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(accounts = hashes.len(), "loaded credential store");
        Ok(Self {
            hashes,
            passwd_path: Some(path),
        })
    }

    /// True iff a hash is stored for `username` and `password` matches it.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.hashes.get(username) {
            Some(stored) => verify(password, stored).unwrap_or(false),
            None => false,
        }
    }

    /// Stores a hash for a new account, appending to the passwd file when
    /// one backs this store. Fails when the username is already taken.
    pub fn add_user(&mut self, username: &str, password: &str) -> Result<()> {
        if self.hashes.contains_key(username) {
            return Err(Error::DuplicateUser(username.to_string()));
        }

        let hashed = hash(password, DEFAULT_COST)?;

        if let Some(path) = &self.passwd_path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}:{}", username, hashed)?;
        }

        self.hashes.insert(username.to_string(), hashed);
        Ok(())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.hashes.contains_key(username)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
