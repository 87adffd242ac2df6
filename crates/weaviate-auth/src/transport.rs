//! Authenticated HTTP transport.
//!
//! Request builders elsewhere in the client ask the transport for a
//! `reqwest::RequestBuilder` and never learn which credential is in use:
//! the transport attaches the static API key header, a fresh bearer token,
//! or nothing.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap};
use reqwest::{Method, RequestBuilder};
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::refresher::TokenRefresher;
use crate::strategy::bearer_header;

/// Where the `Authorization` header comes from.
#[derive(Debug, Clone)]
pub enum Authorizer {
    /// No authentication header
    None,
    /// Fixed headers (API key mode)
    Static(HeaderMap),
    /// Current token of a refresher
    Refreshing(TokenRefresher),
}

#[derive(Debug)]
struct TransportInner {
    http: reqwest::Client,
    base_url: Url,
    additional_headers: HeaderMap,
    authorizer: Authorizer,
}

/// HTTP transport that authenticates every request it builds.
///
/// Cheap to clone; clones share the HTTP connection pool and token state.
#[derive(Debug, Clone)]
pub struct AuthenticatedTransport {
    inner: Arc<TransportInner>,
}

impl AuthenticatedTransport {
    /// Create a transport. `http` should carry the request timeout.
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        additional_headers: HeaderMap,
        authorizer: Authorizer,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                http,
                base_url,
                additional_headers,
                authorizer,
            }),
        }
    }

    /// Server base URL
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Active authorizer
    pub fn authorizer(&self) -> &Authorizer {
        &self.inner.authorizer
    }

    /// Token refresher, when running in token mode
    pub fn refresher(&self) -> Option<&TokenRefresher> {
        match &self.inner.authorizer {
            Authorizer::Refreshing(refresher) => Some(refresher),
            _ => None,
        }
    }

    /// Whether requests carry an `Authorization` header
    pub fn is_authenticated(&self) -> bool {
        !matches!(self.inner.authorizer, Authorizer::None)
            || self.inner.additional_headers.contains_key(AUTHORIZATION)
    }

    /// Headers that do not change over the connection's lifetime: the
    /// additional headers from configuration plus the API key, if any.
    ///
    /// For channels that set headers once at setup; token mode callers should
    /// use [`headers`](Self::headers) per request instead.
    pub fn static_headers(&self) -> HeaderMap {
        let mut headers = self.inner.additional_headers.clone();
        if let Authorizer::Static(fixed) = &self.inner.authorizer {
            headers.extend(fixed.clone());
        }
        headers
    }

    /// Full header set for the next request.
    ///
    /// In token mode this refreshes first if the token is due.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidHeader`] if the token cannot be sent as a header.
    pub async fn headers(&self) -> AuthResult<HeaderMap> {
        let mut headers = self.static_headers();
        if let Authorizer::Refreshing(refresher) = &self.inner.authorizer {
            let token = refresher.access_token().await;
            headers.insert(AUTHORIZATION, bearer_header(&token)?);
        }
        Ok(headers)
    }

    /// Resolve `path` against the server base URL.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidUrl`] if the result is not a valid URL.
    pub fn url(&self, path: &str) -> AuthResult<Url> {
        join_path(&self.inner.base_url, path)
    }

    /// Authenticated request builder for `path` (relative to the server).
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidUrl`] or [`AuthError::InvalidHeader`].
    pub async fn request(&self, method: Method, path: &str) -> AuthResult<RequestBuilder> {
        let url = self.url(path)?;
        let headers = self.headers().await?;
        Ok(self.inner.http.request(method, url).headers(headers))
    }

    /// `GET` request builder
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get(&self, path: &str) -> AuthResult<RequestBuilder> {
        self.request(Method::GET, path).await
    }

    /// `POST` request builder
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post(&self, path: &str) -> AuthResult<RequestBuilder> {
        self.request(Method::POST, path).await
    }
}

/// `base` + `path`, keeping any path prefix `base` already has.
pub(crate) fn join_path(base: &Url, path: &str) -> AuthResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| AuthError::InvalidUrl {
            url: format!("{base}{path}"),
            reason: e.to_string(),
        })
}
