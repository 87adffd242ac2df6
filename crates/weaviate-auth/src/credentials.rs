//! Caller-supplied credentials.
//!
//! A [`Credential`] is chosen once, before any network activity, and is never
//! mutated afterwards. Which flow runs is decided by matching on the variant.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

/// Scope requested by the password flow when the caller supplies none, so the
/// identity provider hands out a refresh token.
pub const DEFAULT_PASSWORD_SCOPE: &str = "offline_access";

/// Lifetime assumed for a bearer token supplied without `expires_in`.
pub const DEFAULT_BEARER_EXPIRES_IN: u64 = 60;

/// Credential used to authenticate against a Weaviate server.
///
/// Deserializes from an internally tagged representation, e.g.
///
/// ```json
/// { "type": "client_credentials", "client_secret": "...", "scopes": ["profile"] }
/// ```
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Static API key sent as a bearer token
    ApiKey {
        /// The key
        #[serde(deserialize_with = "deserialize_secret")]
        value: SecretString,
    },
    /// OAuth2 client credentials grant (client id comes from discovery)
    ClientCredentials {
        /// Client secret
        #[serde(deserialize_with = "deserialize_secret")]
        client_secret: SecretString,
        /// Extra scopes to request on top of the server-advertised ones
        #[serde(default)]
        scopes: Option<Vec<String>>,
    },
    /// OAuth2 resource owner password grant
    #[serde(alias = "password")]
    ResourceOwnerPassword {
        /// Username
        username: String,
        /// Password
        #[serde(deserialize_with = "deserialize_secret")]
        password: SecretString,
        /// Scopes to request; defaults to `offline_access`
        #[serde(default)]
        scopes: Option<Vec<String>>,
    },
    /// Pre-issued access token, optionally refreshable
    BearerToken {
        /// Access token
        #[serde(deserialize_with = "deserialize_secret")]
        access_token: SecretString,
        /// Refresh token, if the issuer provided one
        #[serde(default, deserialize_with = "deserialize_optional_secret")]
        refresh_token: Option<SecretString>,
        /// Remaining lifetime of the access token in seconds
        #[serde(default)]
        expires_in: Option<u64>,
    },
}

impl Credential {
    /// API key credential
    pub fn api_key(value: impl Into<String>) -> Self {
        Self::ApiKey {
            value: SecretString::new(value.into()),
        }
    }

    /// Client credentials grant without caller scopes
    pub fn client_credentials(client_secret: impl Into<String>) -> Self {
        Self::ClientCredentials {
            client_secret: SecretString::new(client_secret.into()),
            scopes: None,
        }
    }

    /// Resource owner password grant without caller scopes
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::ResourceOwnerPassword {
            username: username.into(),
            password: SecretString::new(password.into()),
            scopes: None,
        }
    }

    /// Pre-issued bearer token
    pub fn bearer_token(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Self {
        Self::BearerToken {
            access_token: SecretString::new(access_token.into()),
            refresh_token: refresh_token.map(SecretString::new),
            expires_in,
        }
    }

    /// Set caller scopes on the grant-based variants. No effect on
    /// [`Credential::ApiKey`] and [`Credential::BearerToken`].
    #[must_use]
    pub fn with_scopes(self, new_scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let collected: Vec<String> = new_scopes.into_iter().map(Into::into).collect();
        match self {
            Self::ClientCredentials { client_secret, .. } => Self::ClientCredentials {
                client_secret,
                scopes: Some(collected),
            },
            Self::ResourceOwnerPassword {
                username, password, ..
            } => Self::ResourceOwnerPassword {
                username,
                password,
                scopes: Some(collected),
            },
            other => other,
        }
    }

    /// Short name of the flow, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "api_key",
            Self::ClientCredentials { .. } => "client_credentials",
            Self::ResourceOwnerPassword { .. } => "password",
            Self::BearerToken { .. } => "bearer_token",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("value", &"[REDACTED]")
                .finish(),
            Self::ClientCredentials { scopes, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_secret", &"[REDACTED]")
                .field("scopes", scopes)
                .finish(),
            Self::ResourceOwnerPassword {
                username, scopes, ..
            } => f
                .debug_struct("ResourceOwnerPassword")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .field("scopes", scopes)
                .finish(),
            Self::BearerToken {
                refresh_token,
                expires_in,
                ..
            } => f
                .debug_struct("BearerToken")
                .field("access_token", &"[REDACTED]")
                .field("refresh_token", &refresh_token.as_ref().map(|_| "[REDACTED]"))
                .field("expires_in", expires_in)
                .finish(),
        }
    }
}

#[cfg(test)]
pub(crate) fn secret_eq(secret: &SecretString, other: &str) -> bool {
    use secrecy::ExposeSecret;
    secret.expose_secret() == other
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(SecretString::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tagged_variants() {
        let cred: Credential =
            serde_json::from_str(r#"{"type": "api_key", "value": "my-secret-key"}"#).unwrap();
        match cred {
            Credential::ApiKey { value } => assert!(secret_eq(&value, "my-secret-key")),
            other => panic!("unexpected variant {other:?}"),
        }

        let cred: Credential = serde_json::from_str(
            r#"{"type": "password", "username": "alice", "password": "pw", "scopes": ["a"]}"#,
        )
        .unwrap();
        match cred {
            Credential::ResourceOwnerPassword {
                username, scopes, ..
            } => {
                assert_eq!(username, "alice");
                assert_eq!(scopes, Some(vec!["a".to_string()]));
            }
            other => panic!("unexpected variant {other:?}"),
        }

        let cred: Credential = serde_json::from_str(
            r#"{"type": "bearer_token", "access_token": "at", "refresh_token": "rt", "expires_in": 500}"#,
        )
        .unwrap();
        match cred {
            Credential::BearerToken {
                refresh_token,
                expires_in,
                ..
            } => {
                assert!(refresh_token.is_some());
                assert_eq!(expires_in, Some(500));
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_with_scopes_only_touches_grant_variants() {
        let cred = Credential::client_credentials("secret").with_scopes(["profile"]);
        match cred {
            Credential::ClientCredentials { scopes, .. } => {
                assert_eq!(scopes, Some(vec!["profile".to_string()]));
            }
            other => panic!("unexpected variant {other:?}"),
        }

        let cred = Credential::api_key("key").with_scopes(["ignored"]);
        assert_eq!(cred.kind(), "api_key");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = [
            Credential::api_key("super-secret-key"),
            Credential::client_credentials("super-secret-client"),
            Credential::password("bob", "super-secret-password"),
            Credential::bearer_token(
                "super-secret-access",
                Some("super-secret-refresh".to_string()),
                None,
            ),
        ];
        for cred in creds {
            let debug = format!("{cred:?}");
            assert!(debug.contains("[REDACTED]"));
            assert!(!debug.contains("super-secret"), "leaked: {debug}");
        }
    }
}
