//! Connection setup.
//!
//! Runs discovery once, runs the credential strategy, installs the refresher
//! and background refresh task, and hands out the authenticated transport.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::diagnostics::{AuthWarning, Diagnostics, TracingDiagnostics};
use crate::discovery::{DiscoveryOutcome, DiscoveryResolver, OIDC_CONFIGURATION_PATH};
use crate::error::{AuthError, AuthResult};
use crate::refresher::TokenRefresher;
use crate::strategy::{self, AcquireContext, Acquired};
use crate::transport::{AuthenticatedTransport, Authorizer, join_path};

#[derive(Debug)]
struct ConnectionInner {
    transport: AuthenticatedTransport,
    discovery: DiscoveryOutcome,
    shutdown: Arc<Notify>,
    refresh_task: Option<JoinHandle<()>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if self.refresh_task.is_some() {
            self.shutdown.notify_one();
            debug!("Token refresh task shutdown initiated");
        }
    }
}

/// An authenticated connection to a Weaviate server.
///
/// Cheap to clone. The background refresh task, if any, stops once the last
/// clone is dropped.
///
/// ```rust,no_run
/// use weaviate_auth::{Connection, ConnectionConfig, Credential};
///
/// # async fn example() -> Result<(), weaviate_auth::AuthError> {
/// let config = ConnectionConfig::new("http://localhost:8080")?
///     .with_credential(Credential::client_credentials("my-secret"));
/// let connection = Connection::connect(config).await?;
///
/// let meta = connection.transport().get("/v1/meta").await?.send().await?;
/// println!("status: {}", meta.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect, reporting warnings through `tracing`.
    ///
    /// # Errors
    ///
    /// Any fatal [`AuthError`]; see
    /// [`connect_with_diagnostics`](Self::connect_with_diagnostics).
    pub async fn connect(config: ConnectionConfig) -> AuthResult<Self> {
        Self::connect_with_diagnostics(config, Arc::new(TracingDiagnostics)).await
    }

    /// Connect, reporting warnings to `diagnostics`.
    ///
    /// Discovery and the initial credential exchange must finish within
    /// `config.startup_timeout`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::StartupTimeout`] if setup takes too long
    /// - [`AuthError::Discovery`] if the server or identity provider answers
    ///   discovery unexpectedly
    /// - [`AuthError::AuthFlow`] if the identity provider rejects the credential
    /// - [`AuthError::Http`] on network failure
    /// - [`AuthError::InvalidHeader`] for unusable additional headers
    pub async fn connect_with_diagnostics(
        config: ConnectionConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> AuthResult<Self> {
        let startup_timeout = config.startup_timeout;
        match tokio::time::timeout(startup_timeout, Self::establish(config, diagnostics)).await {
            Ok(Err(AuthError::Http(e))) if e.is_timeout() => {
                Err(AuthError::StartupTimeout(startup_timeout))
            }
            Ok(result) => result,
            Err(_) => Err(AuthError::StartupTimeout(startup_timeout)),
        }
    }

    async fn establish(
        config: ConnectionConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> AuthResult<Self> {
        let additional_headers = header_map(&config.additional_headers)?;
        let startup_http = reqwest::Client::builder()
            .timeout(config.startup_timeout)
            .build()?;
        let request_http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let discovery = DiscoveryResolver::new(startup_http.clone())
            .resolve(&config.url)
            .await?;

        let credential = match &config.credential {
            Some(_) if config.has_authorization_header() => {
                diagnostics.warn(AuthWarning::AuthHeaderOverridesCredential);
                None
            }
            credential => credential.as_ref(),
        };

        match (&discovery, credential) {
            (DiscoveryOutcome::NoAuthConfigured, Some(_)) => {
                diagnostics.warn(AuthWarning::AuthWithAnonymousServer);
            }
            (DiscoveryOutcome::Unparseable, _) => {
                let url = join_path(&config.url, OIDC_CONFIGURATION_PATH)
                    .map_or_else(|_| config.url.to_string(), |url| url.to_string());
                diagnostics.warn(AuthWarning::UnparseableDiscovery { url });
            }
            _ => {}
        }

        let authorizer = match credential {
            None => Authorizer::None,
            Some(credential) => {
                let ctx = AcquireContext {
                    startup_http: &startup_http,
                    refresh_http: &request_http,
                    diagnostics: diagnostics.as_ref(),
                };
                let acquired = strategy::acquire(credential, &discovery, ctx).await?;
                match acquired {
                    Acquired::Unauthenticated => Authorizer::None,
                    Acquired::Static(headers) => Authorizer::Static(headers),
                    Acquired::Token { state, grant } => Authorizer::Refreshing(
                        TokenRefresher::new(state, grant, config.refresh_margin, diagnostics),
                    ),
                }
            }
        };

        let shutdown = Arc::new(Notify::new());
        let refresh_task = match &authorizer {
            Authorizer::Refreshing(refresher) => refresher.spawn_scheduler(Arc::clone(&shutdown)),
            _ => None,
        };

        info!(
            url = %config.url,
            authenticated = !matches!(authorizer, Authorizer::None),
            background_refresh = refresh_task.is_some(),
            "Connection established"
        );

        let transport =
            AuthenticatedTransport::new(request_http, config.url, additional_headers, authorizer);

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                transport,
                discovery,
                shutdown,
                refresh_task,
            }),
        })
    }

    /// Transport for building authenticated requests
    pub fn transport(&self) -> AuthenticatedTransport {
        self.inner.transport.clone()
    }

    /// What discovery concluded at connect time
    pub fn discovery(&self) -> &DiscoveryOutcome {
        &self.inner.discovery
    }

    /// Whether a background refresh task is still running
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .refresh_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

fn header_map(headers: &HashMap<String, String>) -> AuthResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| AuthError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| AuthError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
