//! # Discovery Resolver
//!
//! Probes the server's well-known OIDC path and, when authentication is
//! enabled, follows `href` to the identity provider to find the token
//! endpoint.

use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use super::types::{DiscoveryOutcome, OidcConfiguration, ProviderMetadata};
use crate::error::{AuthError, AuthResult};
use crate::transport::join_path;

/// Path of the OIDC configuration relative to the server root.
pub const OIDC_CONFIGURATION_PATH: &str = "v1/.well-known/openid-configuration";

/// Discovery resolver
///
/// Stateless apart from the HTTP client; [`resolve`](Self::resolve) is
/// idempotent and safe to retry.
#[derive(Debug, Clone)]
pub struct DiscoveryResolver {
    http: reqwest::Client,
}

impl DiscoveryResolver {
    /// Create a resolver using the given HTTP client (which carries the
    /// startup timeout)
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Probe `server` and classify its authentication setup.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Discovery`] if the server answers with a status other
    ///   than 2xx or 404, or if the identity provider document is unusable
    /// - [`AuthError::Http`] on network failure
    /// - [`AuthError::InvalidUrl`] if the server URL cannot be extended
    pub async fn resolve(&self, server: &Url) -> AuthResult<DiscoveryOutcome> {
        let url = Self::build_oidc_url(server)?;
        debug!(%url, "Probing OIDC configuration");

        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            info!("Server reports no OIDC configuration; authentication disabled");
            return Ok(DiscoveryOutcome::NoAuthConfigured);
        }

        if status != StatusCode::OK {
            return Err(AuthError::Discovery {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let config: OidcConfiguration = match serde_json::from_str(&body) {
            Ok(config) => config,
            Err(e) => {
                debug!(%url, error = %e, "OIDC configuration is not valid JSON");
                return Ok(DiscoveryOutcome::Unparseable);
            }
        };

        let token_endpoint = self.fetch_token_endpoint(&config.href).await?;
        debug!(client_id = %config.client_id, %token_endpoint, "OIDC configuration discovered");

        Ok(DiscoveryOutcome::Discovered {
            issuer_href: config.href,
            client_id: config.client_id,
            scopes: config.scopes,
            token_endpoint,
        })
    }

    /// Fetch the identity provider document and extract `token_endpoint`.
    async fn fetch_token_endpoint(&self, href: &str) -> AuthResult<String> {
        let response = self.http.get(href).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::Discovery {
                url: href.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let metadata: ProviderMetadata =
            serde_json::from_str(&body).map_err(|e| AuthError::Discovery {
                url: href.to_string(),
                status: status.as_u16(),
                body: format!("invalid provider metadata: {e}"),
            })?;

        if metadata.token_endpoint.trim().is_empty() {
            return Err(AuthError::Discovery {
                url: href.to_string(),
                status: status.as_u16(),
                body: "provider metadata has an empty token_endpoint".to_string(),
            });
        }

        Ok(metadata.token_endpoint)
    }

    /// `<server>/v1/.well-known/openid-configuration`, keeping any path
    /// prefix the server URL already has.
    fn build_oidc_url(server: &Url) -> AuthResult<Url> {
        join_path(server, OIDC_CONFIGURATION_PATH)
    }
}
