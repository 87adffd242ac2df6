//! OAuth2 token endpoint exchanges.
//!
//! Client credentials, resource owner password and refresh token grants are
//! all a form-encoded `POST` to the same endpoint, differing only in the
//! credential-specific fields. Numeric fields in the response are parsed
//! tolerantly here, once, so nothing downstream has to care whether the
//! provider sent `3600` or `"3600"`.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tracing::debug;

use crate::diagnostics::{AuthWarning, Diagnostics};
use crate::error::{AuthError, AuthResult};
use crate::token::{TokenState, offset};

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(60);

/// Successful token endpoint response.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Issued access token
    pub access_token: String,
    /// Lifetime in seconds; number or numeric string
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub expires_in: Option<i64>,
    /// Refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Refresh token lifetime in seconds; number or numeric string
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub refresh_expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert into an absolute-time [`TokenState`], anchored at now.
    pub(crate) fn into_state(self, diagnostics: &dyn Diagnostics) -> TokenState {
        let expires_in = lifetime(self.expires_in, diagnostics);
        let state = TokenState::new(self.access_token, expires_in);

        match self.refresh_token {
            Some(refresh) => {
                let refresh_expires_in = self
                    .refresh_expires_in
                    .map(|secs| Duration::from_secs(secs.max(0) as u64));
                let refresh_expires_at =
                    refresh_expires_in.map(|d| offset(state.issued_at(), d));
                let issued_at = state.issued_at();
                state.with_refresh_secret(SecretString::new(refresh), issued_at, refresh_expires_at)
            }
            None => state,
        }
    }

    /// Like [`into_state`](Self::into_state), for a response to a refresh.
    ///
    /// Providers that do not rotate refresh tokens omit `refresh_token`; the
    /// previous one (and its expiry) stays valid in that case. A rotated
    /// token without `refresh_expires_in` inherits the previous expiry.
    pub(crate) fn into_refreshed_state(
        self,
        previous: &TokenState,
        diagnostics: &dyn Diagnostics,
    ) -> TokenState {
        let rotated_expiry = self.refresh_expires_in.is_some();
        let next = self.into_state(diagnostics);

        match (next.refresh_secret().cloned(), previous.refresh_secret()) {
            (Some(rotated), _) if !rotated_expiry => next.with_refresh_secret(
                rotated,
                previous.refresh_issued_at(),
                previous.refresh_expires_at(),
            ),
            (None, Some(kept)) => next.with_refresh_secret(
                kept.clone(),
                previous.refresh_issued_at(),
                previous.refresh_expires_at(),
            ),
            _ => next,
        }
    }
}

/// Error payload defined by RFC 6749 section 5.2
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn lifetime(expires_in: Option<i64>, diagnostics: &dyn Diagnostics) -> Duration {
    match expires_in {
        None => DEFAULT_EXPIRES_IN,
        Some(secs) if secs < 0 => {
            diagnostics.warn(AuthWarning::NegativeExpiration { expires_in: secs });
            Duration::ZERO
        }
        Some(secs) => Duration::from_secs(secs as u64),
    }
}

/// Token endpoint bound to a client id.
#[derive(Clone)]
pub struct TokenEndpoint {
    url: String,
    client_id: String,
    http: reqwest::Client,
}

impl TokenEndpoint {
    /// Create an endpoint handle using the given HTTP client
    pub fn new(url: impl Into<String>, client_id: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            http,
        }
    }

    /// Same endpoint, issuing requests through `http`
    #[must_use]
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Token endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// OAuth2 client id
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `grant_type=client_credentials`
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthFlow`] if the provider rejects the secret or scopes,
    /// [`AuthError::Http`] on network failure.
    pub async fn client_credentials(
        &self,
        client_secret: &SecretString,
        scopes: &[String],
    ) -> AuthResult<TokenResponse> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.client_id.clone()),
            ("client_secret", client_secret.expose_secret().clone()),
        ];
        push_scope(&mut form, scopes);
        self.exchange("client_credentials", &form).await
    }

    /// `grant_type=password`
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthFlow`] if the provider rejects the username/password,
    /// [`AuthError::Http`] on network failure.
    pub async fn password(
        &self,
        username: &str,
        password: &SecretString,
        scopes: &[String],
    ) -> AuthResult<TokenResponse> {
        let mut form = vec![
            ("grant_type", "password".to_string()),
            ("client_id", self.client_id.clone()),
            ("username", username.to_string()),
            ("password", password.expose_secret().clone()),
        ];
        push_scope(&mut form, scopes);
        self.exchange("password", &form).await
    }

    /// `grant_type=refresh_token`
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthFlow`] if the refresh token was revoked or expired,
    /// [`AuthError::Http`] on network failure.
    pub async fn refresh_token(
        &self,
        refresh_token: &SecretString,
        scopes: &[String],
    ) -> AuthResult<TokenResponse> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", self.client_id.clone()),
            ("refresh_token", refresh_token.expose_secret().clone()),
        ];
        push_scope(&mut form, scopes);
        self.exchange("refresh_token", &form).await
    }

    async fn exchange(
        &self,
        grant: &'static str,
        form: &[(&'static str, String)],
    ) -> AuthResult<TokenResponse> {
        debug!(grant, token_endpoint = %self.url, "Requesting token");

        let response = self.http.post(&self.url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(TokenErrorResponse {
                    error,
                    error_description: Some(description),
                }) => format!("{error}: {description}"),
                Ok(TokenErrorResponse { error, .. }) => error,
                Err(_) => body,
            };
            return Err(AuthError::AuthFlow {
                grant,
                status: status.as_u16(),
                detail,
            });
        }

        serde_json::from_str(&body).map_err(|e| AuthError::AuthFlow {
            grant,
            status: status.as_u16(),
            detail: format!("invalid token response: {e}"),
        })
    }
}

impl std::fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpoint")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .finish()
    }
}

fn push_scope(form: &mut Vec<(&'static str, String)>, scopes: &[String]) {
    if !scopes.is_empty() {
        form.push(("scope", scopes.join(" ")));
    }
}
