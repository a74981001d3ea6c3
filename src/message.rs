use std::collections::HashMap;
use std::fmt;

/// Wire header names, canonical lower-case.
pub const HEADER_FROM: &str = "x-telegram-from";
pub const HEADER_TO: &str = "x-telegram-to";
pub const HEADER_SIGN_METHOD: &str = "x-telegram-sign-method";
pub const HEADER_SIGN: &str = "x-telegram-sign";
pub const HEADER_CONTENT_TYPE: &str = "content-type";

pub const SIGN_METHOD_RSA: &str = "RSA";

const HEADER_PREFIX: &str = "x-telegram-";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

pub type Headers = HashMap<String, String>;

/// Lower-cases header names and keeps only the telegram namespace plus
/// content-type. Everything else is dropped before routing ever sees it;
/// this is the boundary against header injection into routing decisions.
pub fn clean_headers<I, K, V>(headers: I) -> Headers
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    headers
        .into_iter()
        .filter_map(|(name, value)| {
            let name = name.as_ref().to_ascii_lowercase();
            (name.starts_with(HEADER_PREFIX) || name == HEADER_CONTENT_TYPE)
                .then(|| (name, value.into()))
        })
        .collect()
}

/// A message in flight: cleaned headers plus the sanitized plain-text body.
/// Transient value object; lives only in the routing pipeline and inboxes.
#[derive(Debug, Clone)]
pub struct Telegram {
    pub headers: Headers,
    pub body: String,
}

impl Telegram {
    pub fn new(headers: Headers, body: String) -> Self {
        Self { headers, body }
    }

    pub fn sender(&self) -> Option<&str> {
        self.headers.get(HEADER_FROM).map(String::as_str)
    }

    pub fn receiver(&self) -> Option<&str> {
        self.headers.get(HEADER_TO).map(String::as_str)
    }

    pub fn signature(&self) -> Option<&str> {
        self.headers.get(HEADER_SIGN).map(String::as_str)
    }

    pub fn sign_method(&self) -> &str {
        self.headers
            .get(HEADER_SIGN_METHOD)
            .map(String::as_str)
            .unwrap_or(SIGN_METHOD_RSA)
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get(HEADER_CONTENT_TYPE)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// A `(user, domain)` pair. A bare `user` without `@` belongs to the
/// broker's own domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub user: String,
    pub domain: String,
}

impl Address {
    pub fn parse(raw: &str, default_domain: &str) -> Self {
        match raw.split_once('@') {
            Some((user, domain)) => Self {
                user: user.to_string(),
                domain: domain.to_string(),
            },
            None => Self {
                user: raw.to_string(),
                domain: default_domain.to_string(),
            },
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}
