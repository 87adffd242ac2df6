//! Connection Configuration
//!
//! Everything [`Connection::connect`](crate::Connection::connect) needs to
//! know before the first network call. Can be built in code, deserialized
//! from a configuration file, or read from `WEAVIATE_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_with::{DurationSecondsWithFrac, serde_as};
use url::Url;

use crate::credentials::Credential;
use crate::error::{AuthError, AuthResult};
use crate::refresher::DEFAULT_REFRESH_MARGIN;

/// Default bound on discovery plus the initial credential exchange
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-request timeout once connected
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable names read by [`ConnectionConfig::from_env`]
pub mod env {
    /// Server base URL (required)
    pub const URL: &str = "WEAVIATE_URL";
    /// API key
    pub const API_KEY: &str = "WEAVIATE_API_KEY";
    /// Client secret for the client credentials grant
    pub const CLIENT_SECRET: &str = "WEAVIATE_CLIENT_SECRET";
    /// Username for the password grant
    pub const USERNAME: &str = "WEAVIATE_USERNAME";
    /// Password for the password grant
    pub const PASSWORD: &str = "WEAVIATE_PASSWORD";
    /// Pre-issued access token
    pub const BEARER_TOKEN: &str = "WEAVIATE_BEARER_TOKEN";
    /// Refresh token accompanying the bearer token
    pub const REFRESH_TOKEN: &str = "WEAVIATE_REFRESH_TOKEN";
    /// Scopes, separated by whitespace or commas
    pub const SCOPES: &str = "WEAVIATE_SCOPES";
}

/// Connection configuration
///
/// ```json
/// {
///   "url": "https://my-cluster.weaviate.network",
///   "credential": { "type": "api_key", "value": "..." },
///   "additional_headers": { "X-OpenAI-Api-Key": "..." },
///   "startup_timeout": 10,
///   "request_timeout": 60.5
/// }
/// ```
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Server base URL
    pub url: Url,

    /// Credential to authenticate with; `None` connects anonymously
    #[serde(default)]
    pub credential: Option<Credential>,

    /// Headers sent with every request. An `Authorization` entry here takes
    /// precedence over `credential`.
    #[serde(default)]
    pub additional_headers: HashMap<String, String>,

    /// Bound on discovery and the initial grant, in seconds
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: Duration,

    /// Per-request timeout after startup, in seconds
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// How long before expiry a token is refreshed, in seconds
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: Duration,
}

fn default_startup_timeout() -> Duration {
    DEFAULT_STARTUP_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_refresh_margin() -> Duration {
    DEFAULT_REFRESH_MARGIN
}

impl ConnectionConfig {
    /// Anonymous configuration for `url` with default timeouts
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidUrl`] if `url` does not parse.
    pub fn new(url: &str) -> AuthResult<Self> {
        let url = Url::parse(url).map_err(|e| AuthError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_url(url))
    }

    /// Anonymous configuration for an already parsed URL
    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            credential: None,
            additional_headers: HashMap::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    /// Read the configuration from `WEAVIATE_*` environment variables.
    ///
    /// The first credential source present wins, in this order: API key,
    /// client secret, username and password, bearer token.
    ///
    /// # Errors
    ///
    /// [`AuthError::Configuration`] if `WEAVIATE_URL` is missing or only half
    /// of a username/password pair is set, [`AuthError::InvalidUrl`] if the
    /// URL does not parse.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let url = get(env::URL)
            .ok_or_else(|| AuthError::Configuration(format!("{} is not set", env::URL)))?;
        let mut config = Self::new(&url)?;

        let credential = if let Some(key) = get(env::API_KEY) {
            Some(Credential::api_key(key))
        } else if let Some(secret) = get(env::CLIENT_SECRET) {
            Some(Credential::client_credentials(secret))
        } else {
            match (get(env::USERNAME), get(env::PASSWORD)) {
                (Some(username), Some(password)) => Some(Credential::password(username, password)),
                (Some(_), None) | (None, Some(_)) => {
                    return Err(AuthError::Configuration(format!(
                        "{} and {} must be set together",
                        env::USERNAME,
                        env::PASSWORD
                    )));
                }
                (None, None) => get(env::BEARER_TOKEN).map(|token| {
                    Credential::bearer_token(token, get(env::REFRESH_TOKEN), None)
                }),
            }
        };

        config.credential = match (credential, get(env::SCOPES)) {
            (Some(credential), Some(scopes)) => Some(credential.with_scopes(
                scopes
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty()),
            )),
            (credential, _) => credential,
        };

        Ok(config)
    }

    /// Set the credential
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Add a header sent with every request
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name.into(), value.into());
        self
    }

    /// Set the startup timeout
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the refresh safety margin
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Whether `additional_headers` carries its own `Authorization` header
    pub fn has_authorization_header(&self) -> bool {
        self.additional_headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("authorization"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::secret_eq;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = ConnectionConfig::new("http://localhost:8080").unwrap();
        assert!(config.credential.is_none());
        assert_eq!(config.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.refresh_margin, Duration::from_secs(30));
        assert!(ConnectionConfig::new("not a url").is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{
                "url": "http://localhost:8080/weaviate",
                "credential": {"type": "api_key", "value": "k"},
                "additional_headers": {"X-Custom": "1"},
                "startup_timeout": 2.5
            }"#,
        )
        .unwrap();

        assert_eq!(config.url.as_str(), "http://localhost:8080/weaviate");
        assert_eq!(config.startup_timeout, Duration::from_millis(2500));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.additional_headers["X-Custom"], "1");
        assert!(matches!(config.credential, Some(Credential::ApiKey { .. })));
    }

    #[test]
    fn test_from_lookup_requires_url() {
        let err = ConnectionConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[test]
    fn test_from_lookup_prefers_api_key() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::URL, "http://localhost:8080"),
            (env::API_KEY, "key"),
            (env::CLIENT_SECRET, "secret"),
        ]))
        .unwrap();

        match config.credential {
            Some(Credential::ApiKey { value }) => assert!(secret_eq(&value, "key")),
            other => panic!("expected api key, got {other:?}"),
        }
    }

    #[test]
    fn test_from_lookup_password_with_scopes() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::URL, "http://localhost:8080"),
            (env::USERNAME, "alice"),
            (env::PASSWORD, "pw"),
            (env::SCOPES, "openid, offline_access profile"),
        ]))
        .unwrap();

        match config.credential {
            Some(Credential::ResourceOwnerPassword {
                username, scopes, ..
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(
                    scopes.unwrap(),
                    vec!["openid", "offline_access", "profile"]
                );
            }
            other => panic!("expected password credential, got {other:?}"),
        }
    }

    #[test]
    fn test_from_lookup_rejects_half_password_pair() {
        let err = ConnectionConfig::from_lookup(lookup(&[
            (env::URL, "http://localhost:8080"),
            (env::USERNAME, "alice"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(env::PASSWORD));
    }

    #[test]
    fn test_from_lookup_bearer_token_with_refresh() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::URL, "http://localhost:8080"),
            (env::BEARER_TOKEN, "tok"),
            (env::REFRESH_TOKEN, "ref"),
        ]))
        .unwrap();

        match config.credential {
            Some(Credential::BearerToken {
                access_token,
                refresh_token,
                expires_in,
            }) => {
                assert!(secret_eq(&access_token, "tok"));
                assert!(secret_eq(&refresh_token.unwrap(), "ref"));
                assert_eq!(expires_in, None);
            }
            other => panic!("expected bearer token, got {other:?}"),
        }
    }

    #[test]
    fn test_authorization_header_detection_is_case_insensitive() {
        let config = ConnectionConfig::new("http://localhost:8080")
            .unwrap()
            .with_header("authorization", "Bearer x");
        assert!(config.has_authorization_header());
        assert!(
            !ConnectionConfig::new("http://localhost:8080")
                .unwrap()
                .has_authorization_header()
        );
    }
}
