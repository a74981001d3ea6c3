use hyper::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the broker and its surrounding services.
///
/// Errors raised at the synchronous boundary (authentication, session
/// checks, pool admission) surface to the caller; everything raised inside
/// the asynchronous routing pipeline is caught, logged and counted, never
/// propagated back to the original `post` caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("routing failed: {0}")]
    Routing(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("user \"{0}\" already exists")]
    DuplicateUser(String),

    #[error("resource exhausted: {0}")]
    Exhausted(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("password hash error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
}

impl Error {
    /// HTTP status code this error maps to at the transport boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Authentication(_) | Error::Authorization(_) => StatusCode::UNAUTHORIZED,
            Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Verification(_) => StatusCode::FORBIDDEN,
            Error::Routing(_) | Error::Key(_) => StatusCode::NOT_FOUND,
            Error::DuplicateUser(_) => StatusCode::CONFLICT,
            Error::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Delivery(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Io(_) | Error::PasswordHash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error code for structured logging and client responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Authentication(_) => "AUTHENTICATION_ERROR",
            Error::Authorization(_) => "AUTHORIZATION_ERROR",
            Error::Validation(_) | Error::Json(_) => "VALIDATION_ERROR",
            Error::Verification(_) => "VERIFICATION_ERROR",
            Error::Routing(_) => "ROUTING_ERROR",
            Error::Delivery(_) | Error::Http(_) => "DELIVERY_ERROR",
            Error::DuplicateUser(_) => "DUPLICATE_USER",
            Error::Exhausted(_) => "RESOURCE_EXHAUSTED",
            Error::Key(_) => "KEY_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::PasswordHash(_) => "PASSWORD_HASH_ERROR",
        }
    }

    /// Log this error with a level matching its severity.
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = %code, "server error");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, error_code = %code, "authentication failed");
        } else {
            tracing::debug!(error = %self, error_code = %code, "client error");
        }
    }
}

impl Error {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Error::Authentication(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Error::Authorization(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Error::Verification(msg.into())
    }

    pub fn routing(msg: impl Into<String>) -> Self {
        Error::Routing(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Error::Delivery(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Error::Exhausted(msg.into())
    }

    pub fn key(msg: impl Into<String>) -> Self {
        Error::Key(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
