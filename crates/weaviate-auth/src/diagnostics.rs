//! Warning channel for authentication events.
//!
//! Every warning carries a stable code (`Auth001` .. `Auth006`) so integrators
//! can assert on log output without depending on the prose. The sink is
//! injected into the [`Connection`](crate::Connection) rather than being a
//! global, which keeps tests deterministic even when the background refresh
//! task runs on another worker thread.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A non-fatal authentication event worth surfacing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthWarning {
    /// Credentials were supplied but the server runs without authentication
    AuthWithAnonymousServer,
    /// The token cannot be refreshed and will expire
    NoRefreshToken {
        /// Seconds until the access token expires
        expires_in_secs: i64,
    },
    /// The identity provider reported a negative token lifetime
    NegativeExpiration {
        /// The reported `expires_in`
        expires_in: i64,
    },
    /// An explicit `Authorization` header replaces the configured credential
    AuthHeaderOverridesCredential,
    /// The discovery response could not be parsed
    UnparseableDiscovery {
        /// URL whose body failed to parse
        url: String,
    },
    /// A token refresh failed and the previous token was kept
    RefreshFailed {
        /// Failure description
        reason: String,
    },
}

impl AuthWarning {
    /// Stable, greppable warning code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthWithAnonymousServer => "Auth001",
            Self::NoRefreshToken { .. } => "Auth002",
            Self::NegativeExpiration { .. } => "Auth003",
            Self::AuthHeaderOverridesCredential => "Auth004",
            Self::UnparseableDiscovery { .. } => "Auth005",
            Self::RefreshFailed { .. } => "Auth006",
        }
    }
}

impl fmt::Display for AuthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.code())?;
        match self {
            Self::AuthWithAnonymousServer => write!(
                f,
                "The client was configured to use authentication, but weaviate is configured without authentication. Are you sure this is correct?"
            ),
            Self::NoRefreshToken { expires_in_secs } => write!(
                f,
                "The token has no refresh capability. The client will stop authenticating once the token expires in {expires_in_secs} seconds."
            ),
            Self::NegativeExpiration { expires_in } => write!(
                f,
                "The identity provider returned a negative token lifetime ({expires_in} seconds); treating the token as already expired."
            ),
            Self::AuthHeaderOverridesCredential => write!(
                f,
                "An explicit Authorization header was supplied together with credentials. The header takes precedence and the credentials are ignored."
            ),
            Self::UnparseableDiscovery { url } => write!(
                f,
                "Could not parse the OIDC configuration at {url}; continuing without authentication. This usually means a proxy is answering instead of weaviate."
            ),
            Self::RefreshFailed { reason } => write!(
                f,
                "Token refresh failed, keeping the previous token until it expires: {reason}"
            ),
        }
    }
}

/// Sink for [`AuthWarning`]s.
pub trait Diagnostics: Send + Sync + fmt::Debug {
    /// Record a warning.
    fn warn(&self, warning: AuthWarning);
}

/// Default sink: emits every warning as a `tracing` event at WARN level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn warn(&self, warning: AuthWarning) {
        tracing::warn!(code = warning.code(), "{warning}");
    }
}

/// Sink that keeps warnings in memory, and forwards them to `tracing` as well.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    warnings: Mutex<Vec<AuthWarning>>,
}

impl CollectingDiagnostics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// All warnings recorded so far, oldest first
    pub fn warnings(&self) -> Vec<AuthWarning> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded warnings with the given code
    pub fn count(&self, code: &str) -> usize {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.code() == code)
            .count()
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn warn(&self, warning: AuthWarning) {
        TracingDiagnostics.warn(warning.clone());
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AuthWarning::AuthWithAnonymousServer.code(), "Auth001");
        assert_eq!(
            AuthWarning::NoRefreshToken { expires_in_secs: 10 }.code(),
            "Auth002"
        );
        assert_eq!(
            AuthWarning::UnparseableDiscovery {
                url: "http://x".to_string()
            }
            .code(),
            "Auth005"
        );
    }

    #[test]
    fn test_display_is_prefixed_with_code() {
        let msg = AuthWarning::AuthWithAnonymousServer.to_string();
        assert!(msg.starts_with("Auth001: "));
        assert!(msg.contains("weaviate is configured without authentication"));

        let msg = AuthWarning::NoRefreshToken { expires_in_secs: 42 }.to_string();
        assert!(msg.starts_with("Auth002: "));
        assert!(msg.contains("42 seconds"));
    }

    #[test]
    fn test_collector_counts_by_code() {
        let sink = CollectingDiagnostics::new();
        sink.warn(AuthWarning::AuthWithAnonymousServer);
        sink.warn(AuthWarning::RefreshFailed {
            reason: "network".to_string(),
        });
        sink.warn(AuthWarning::AuthWithAnonymousServer);

        assert_eq!(sink.count("Auth001"), 2);
        assert_eq!(sink.count("Auth006"), 1);
        assert_eq!(sink.count("Auth002"), 0);
        assert_eq!(sink.warnings().len(), 3);
    }
}
