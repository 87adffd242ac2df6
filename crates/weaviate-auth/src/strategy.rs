//! Credential strategies.
//!
//! Turns a [`Credential`] plus the [`DiscoveryOutcome`] into whatever the
//! transport needs: nothing, a static header, or an initial token with an
//! optional way to renew it.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info};

use crate::credentials::{Credential, DEFAULT_BEARER_EXPIRES_IN, DEFAULT_PASSWORD_SCOPE};
use crate::diagnostics::{AuthWarning, Diagnostics};
use crate::discovery::DiscoveryOutcome;
use crate::error::{AuthError, AuthResult};
use crate::grant::TokenEndpoint;
use crate::refresher::RefreshGrant;
use crate::token::TokenState;

/// Identity providers that expect `<client_id>/.default` when no scope is given.
const DEFAULT_SCOPE_PROVIDER_MARKER: &str = "microsoftonline";

/// Result of running a credential strategy.
#[derive(Debug)]
pub enum Acquired {
    /// Requests go out without authentication
    Unauthenticated,
    /// Fixed headers attached to every request
    Static(HeaderMap),
    /// Bearer token, renewed through `grant` when present
    Token {
        /// Initial token
        state: TokenState,
        /// How to renew it; `None` means it is served until it expires
        grant: Option<RefreshGrant>,
    },
}

/// Collaborators a strategy runs with.
#[derive(Debug, Clone, Copy)]
pub struct AcquireContext<'a> {
    /// Client for the initial grant (startup timeout)
    pub startup_http: &'a reqwest::Client,
    /// Client the refresher will use later (request timeout)
    pub refresh_http: &'a reqwest::Client,
    /// Warning sink
    pub diagnostics: &'a dyn Diagnostics,
}

/// Run the strategy for `credential`.
///
/// # Errors
///
/// [`AuthError::AuthFlow`] when the identity provider rejects a grant,
/// [`AuthError::Http`] on network failure and [`AuthError::InvalidHeader`]
/// for an API key that cannot be sent as a header value.
pub async fn acquire(
    credential: &Credential,
    discovery: &DiscoveryOutcome,
    ctx: AcquireContext<'_>,
) -> AuthResult<Acquired> {
    debug!(credential = credential.kind(), "Acquiring credentials");

    match credential {
        Credential::ApiKey { value } => {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, bearer_header(value.expose_secret())?);
            Ok(Acquired::Static(headers))
        }

        Credential::ClientCredentials {
            client_secret,
            scopes,
        } => {
            let DiscoveryOutcome::Discovered {
                client_id,
                scopes: server_scopes,
                token_endpoint,
                ..
            } = discovery
            else {
                return Ok(Acquired::Unauthenticated);
            };

            let mut scopes = merge_scopes(scopes.as_deref().unwrap_or_default(), server_scopes);
            if scopes.is_empty() && token_endpoint.contains(DEFAULT_SCOPE_PROVIDER_MARKER) {
                scopes.push(format!("{client_id}/.default"));
            }

            let endpoint = TokenEndpoint::new(token_endpoint, client_id, ctx.startup_http.clone());
            let state = endpoint
                .client_credentials(client_secret, &scopes)
                .await?
                .into_state(ctx.diagnostics);
            info!(expires_at = %state.expires_at(), "Client credentials token acquired");

            Ok(Acquired::Token {
                state,
                grant: Some(RefreshGrant::ClientCredentials {
                    endpoint: endpoint.with_http(ctx.refresh_http.clone()),
                    client_secret: client_secret.clone(),
                    scopes,
                }),
            })
        }

        Credential::ResourceOwnerPassword {
            username,
            password,
            scopes,
        } => {
            let DiscoveryOutcome::Discovered {
                client_id,
                scopes: server_scopes,
                token_endpoint,
                ..
            } = discovery
            else {
                return Ok(Acquired::Unauthenticated);
            };

            let requested = match scopes {
                Some(scopes) => scopes.clone(),
                None => vec![DEFAULT_PASSWORD_SCOPE.to_string()],
            };
            let scopes = merge_scopes(&requested, server_scopes);

            let endpoint = TokenEndpoint::new(token_endpoint, client_id, ctx.startup_http.clone());
            let state = endpoint
                .password(username, password, &scopes)
                .await?
                .into_state(ctx.diagnostics);
            info!(%username, expires_at = %state.expires_at(), "Password grant token acquired");

            let grant = refresh_token_grant(&state, Some(endpoint), scopes, ctx);
            Ok(Acquired::Token { state, grant })
        }

        Credential::BearerToken {
            access_token,
            refresh_token,
            expires_in,
        } => {
            let lifetime = Duration::from_secs(expires_in.unwrap_or(DEFAULT_BEARER_EXPIRES_IN));
            let mut state = TokenState::new(access_token.expose_secret().as_str(), lifetime);
            if let Some(refresh_token) = refresh_token {
                let issued_at = state.issued_at();
                state = state.with_refresh_secret(refresh_token.clone(), issued_at, None);
            }

            let endpoint = match discovery {
                DiscoveryOutcome::Discovered {
                    client_id,
                    token_endpoint,
                    ..
                } => Some(TokenEndpoint::new(
                    token_endpoint,
                    client_id,
                    ctx.startup_http.clone(),
                )),
                _ => None,
            };

            // the scopes behind a caller-issued token are unknown
            let grant = refresh_token_grant(&state, endpoint, Vec::new(), ctx);
            Ok(Acquired::Token { state, grant })
        }
    }
}

/// Refresh-token grant for `state`, or `Auth002` if there is no way to renew.
fn refresh_token_grant(
    state: &TokenState,
    endpoint: Option<TokenEndpoint>,
    scopes: Vec<String>,
    ctx: AcquireContext<'_>,
) -> Option<RefreshGrant> {
    match endpoint {
        Some(endpoint) if state.refresh_secret().is_some() => Some(RefreshGrant::RefreshToken {
            endpoint: endpoint.with_http(ctx.refresh_http.clone()),
            scopes,
        }),
        _ => {
            ctx.diagnostics.warn(AuthWarning::NoRefreshToken {
                expires_in_secs: state.remaining_secs().max(0),
            });
            None
        }
    }
}

/// `Bearer <value>` as a sensitive header value.
pub(crate) fn bearer_header(value: &str) -> AuthResult<HeaderValue> {
    let mut header =
        HeaderValue::from_str(&format!("Bearer {value}")).map_err(|e| AuthError::InvalidHeader {
            name: AUTHORIZATION.to_string(),
            reason: e.to_string(),
        })?;
    header.set_sensitive(true);
    Ok(header)
}

/// Union of both scope lists, first occurrence wins.
fn merge_scopes(caller: &[String], server: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(caller.len() + server.len());
    for scope in caller.iter().chain(server) {
        if !merged.contains(scope) {
            merged.push(scope.clone());
        }
    }
    merged
}
