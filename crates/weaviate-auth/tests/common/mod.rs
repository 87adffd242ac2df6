//! Common test utilities for integration tests
//!
//! A single wiremock server plays both the Weaviate instance and its identity
//! provider: `/v1/...` paths belong to Weaviate, `/idp/...` to the provider.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use weaviate_auth::ConnectionConfig;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{method, path},
};

pub const OIDC_PATH: &str = "/v1/.well-known/openid-configuration";
pub const PROVIDER_PATH: &str = "/idp/.well-known/openid-configuration";
pub const TOKEN_PATH: &str = "/idp/token";
pub const META_PATH: &str = "/v1/meta";

/// Mock Weaviate server with an embedded identity provider
pub struct MockWeaviate {
    pub server: MockServer,
}

impl MockWeaviate {
    /// Start a server with `GET /v1/meta` answering 200
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(META_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hostname": "http://[::]:8080",
                "version": "1.25.0",
            })))
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}{}", self.server.uri(), TOKEN_PATH)
    }

    /// Anonymous configuration pointing at this server
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.server.uri()).expect("mock server URI is valid")
    }

    /// Discovery answers 404: authentication disabled
    pub async fn mock_no_auth(&self) {
        Mock::given(method("GET"))
            .and(path(OIDC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&self.server)
            .await;
    }

    /// Discovery answers 200 with a body that is not JSON
    pub async fn mock_unparseable(&self) {
        Mock::given(method("GET"))
            .and(path(OIDC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("NotAValidJsonResponse"))
            .mount(&self.server)
            .await;
    }

    /// Discovery answers `status` with `body`
    pub async fn mock_discovery_status(&self, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(OIDC_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Full OIDC setup pointing at `/idp/token`
    pub async fn mock_oidc(&self, client_id: &str, scopes: &[&str]) {
        self.mock_oidc_with_token_endpoint(client_id, scopes, &self.token_endpoint())
            .await;
    }

    /// Full OIDC setup with an explicit token endpoint URL
    pub async fn mock_oidc_with_token_endpoint(
        &self,
        client_id: &str,
        scopes: &[&str],
        token_endpoint: &str,
    ) {
        Mock::given(method("GET"))
            .and(path(OIDC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "href": format!("{}{}", self.server.uri(), PROVIDER_PATH),
                "clientId": client_id,
                "scopes": scopes,
            })))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(PROVIDER_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": format!("{}/idp", self.server.uri()),
                "token_endpoint": token_endpoint,
            })))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint answering every grant with `body`
    pub async fn mock_token(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint answering with an error status and body
    pub async fn mock_token_error(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint issuing numbered tokens through `issuer`
    pub async fn mock_token_issuer(&self, issuer: TokenIssuer) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(issuer)
            .mount(&self.server)
            .await;
    }

    /// All requests received on `request_path`
    pub async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }

    /// Number of token endpoint calls so far
    pub async fn token_calls(&self) -> usize {
        self.requests_to(TOKEN_PATH).await.len()
    }

    /// Form bodies of all token endpoint calls
    pub async fn token_forms(&self) -> Vec<HashMap<String, String>> {
        self.requests_to(TOKEN_PATH)
            .await
            .iter()
            .map(|r| parse_form(&r.body))
            .collect()
    }

    /// `Authorization` header of every request to `request_path`
    pub async fn authorization_headers(&self, request_path: &str) -> Vec<Option<String>> {
        self.requests_to(request_path)
            .await
            .iter()
            .map(|r| {
                r.headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .collect()
    }
}

/// Decode an `application/x-www-form-urlencoded` body
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Token endpoint responder issuing `access-1`, `access-2`, ... and
/// remembering when each token was issued.
#[derive(Clone)]
pub struct TokenIssuer {
    counter: Arc<AtomicUsize>,
    issued: Arc<Mutex<HashMap<String, Instant>>>,
    expires_in: u64,
    refresh_expires_in: Option<u64>,
}

impl TokenIssuer {
    pub fn new(expires_in: u64, refresh_expires_in: Option<u64>) -> Self {
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
            issued: Arc::new(Mutex::new(HashMap::new())),
            expires_in,
            refresh_expires_in,
        }
    }

    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }

    /// When `access_token` was issued, if it came from this issuer
    pub fn issued_at(&self, access_token: &str) -> Option<Instant> {
        self.issued.lock().unwrap().get(access_token).copied()
    }

    pub fn issued_count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Respond for TokenIssuer {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let access_token = format!("access-{n}");
        self.issued
            .lock()
            .unwrap()
            .insert(access_token.clone(), Instant::now());

        let mut body = json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": self.expires_in,
        });
        if let Some(refresh_expires_in) = self.refresh_expires_in {
            body["refresh_token"] = json!(format!("refresh-{n}"));
            // Keycloak sends this one as a string on some versions
            body["refresh_expires_in"] = json!(refresh_expires_in.to_string());
        }
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// Strip the `Bearer ` prefix from an authorization header value
pub fn bearer(header: &reqwest::header::HeaderValue) -> String {
    header
        .to_str()
        .expect("header is ASCII")
        .trim_start_matches("Bearer ")
        .to_string()
}
