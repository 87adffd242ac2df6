//! # OIDC Discovery Types
//!
//! Wire shapes of the two discovery documents and the classified outcome.

use serde::{Deserialize, Serialize};

/// Body of `GET <server>/v1/.well-known/openid-configuration`.
///
/// ```json
/// {
///   "href": "https://idp.example.com/realms/weaviate/.well-known/openid-configuration",
///   "clientId": "weaviate",
///   "scopes": ["openid", "email"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfiguration {
    /// Identity provider discovery document URL (may be on another host)
    pub href: String,

    /// OAuth2 client id registered for this server
    pub client_id: String,

    /// Scopes the server expects tokens to carry
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// The subset of the identity provider's OpenID configuration we need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Where grants are exchanged for tokens
    pub token_endpoint: String,
}

/// Classified result of probing the server's auth configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// The server reported that it runs without authentication (404)
    NoAuthConfigured,

    /// The server answered 200 with something that is not an OIDC
    /// configuration, typically an intercepting proxy's HTML page
    Unparseable,

    /// A usable configuration with a resolved token endpoint
    Discovered {
        /// Identity provider discovery document URL
        issuer_href: String,
        /// OAuth2 client id
        client_id: String,
        /// Server-advertised scopes
        scopes: Vec<String>,
        /// Token endpoint; never empty
        token_endpoint: String,
    },
}

impl DiscoveryOutcome {
    /// Whether a token endpoint was discovered
    pub fn is_discovered(&self) -> bool {
        matches!(self, Self::Discovered { .. })
    }

    /// Token endpoint, if discovered
    pub fn token_endpoint(&self) -> Option<&str> {
        match self {
            Self::Discovered { token_endpoint, .. } => Some(token_endpoint),
            _ => None,
        }
    }
}
