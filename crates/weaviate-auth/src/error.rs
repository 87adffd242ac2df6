//! Authentication error types.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised while establishing or maintaining authentication.
///
/// Everything except [`AuthError::Refresh`] is fatal at connection time: no
/// [`Connection`](crate::Connection) is handed back to the caller.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server (or identity provider) answered discovery with an unexpected status
    #[error("OIDC discovery at {url} failed with status {status}: {body}")]
    Discovery {
        /// URL that was probed
        url: String,
        /// HTTP status returned
        status: u16,
        /// Response body or parse failure description
        body: String,
    },

    /// The identity provider rejected a credential exchange
    #[error("{grant} grant rejected by identity provider (status {status}): {detail}")]
    AuthFlow {
        /// Grant type that was attempted
        grant: &'static str,
        /// HTTP status returned by the token endpoint
        status: u16,
        /// `error` / `error_description` from the provider, or the raw body
        detail: String,
    },

    /// A token refresh failed; the previous token stays in place
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// Discovery and credential exchange did not finish in time
    #[error("Authentication setup did not complete within {0:?}")]
    StartupTimeout(Duration),

    /// Network or protocol failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL could not be parsed or joined
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// A header name or value is not valid HTTP
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader {
        /// Header name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Connection configuration is incomplete or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Returns `true` for errors that abort connection setup.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Refresh(_))
    }
}
