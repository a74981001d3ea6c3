use std::path::PathBuf;

use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SOCKET_PORT: u16 = 8081;

// Default session TTL (in seconds)
const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

// Default routing worker pool capacity
const DEFAULT_WORKER_CAPACITY: usize = 64;

// Default timeout for outbound federation calls (in seconds).
// Every remote key lookup and forwarded send carries this timeout so one
// slow remote broker cannot pin routing workers indefinitely.
const DEFAULT_FEDERATION_TIMEOUT_SECS: u64 = 10;

// Default config directory (holds users.json and passwd)
const DEFAULT_CONFIG_DIR: &str = "~/.telegraph";

/// Session token length (alphanumeric characters)
pub const TOKEN_LENGTH: usize = 64;

/// Digest used under the PKCS#1 v1.5 federation signatures.
///
/// SHA-1 is the wire-compatible default; new deployments that do not need
/// to interoperate with older peers should select SHA-256.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureDigest {
    Sha1,
    Sha256,
}

impl std::str::FromStr for SignatureDigest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => anyhow::bail!(
                "Invalid signature digest: {}. Must be 'sha1' or 'sha256'",
                s
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Domain this broker is authoritative for (e.g. "example.org")
    pub domain: String,
    /// HTTP API port
    pub port: u16,
    /// WebSocket listener port
    pub socket_port: u16,
    /// Directory holding users.json and the passwd file
    pub config_dir: PathBuf,
    pub session_ttl_secs: i64,
    pub worker_capacity: usize,
    pub federation_timeout_secs: u64,
    pub signature_digest: SignatureDigest,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            domain: std::env::var("TELEGRAPH_DOMAIN")
                .map_err(|_| anyhow::anyhow!("TELEGRAPH_DOMAIN must be set"))?,
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            socket_port: std::env::var("SOCKET_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SOCKET_PORT),
            config_dir: expand_path(
                &std::env::var("TELEGRAPH_CONFIG_DIR")
                    .unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string()),
            ),
            session_ttl_secs: std::env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            worker_capacity: std::env::var("WORKER_CAPACITY")
                .ok()
                .and_then(|c| c.parse().ok())
                .unwrap_or(DEFAULT_WORKER_CAPACITY),
            federation_timeout_secs: std::env::var("FEDERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(DEFAULT_FEDERATION_TIMEOUT_SECS),
            signature_digest: std::env::var("TELEGRAPH_SIGNATURE_DIGEST")
                .unwrap_or_else(|_| "sha1".to_string())
                .parse()?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
