//! # Weaviate Auth - Token Lifecycle Management for Weaviate Clients
//!
//! Discovers whether a Weaviate server requires authentication, exchanges the
//! caller's credential for an access token, and keeps that token fresh for
//! the lifetime of the connection. Concurrent requests never race on a stale
//! token.
//!
//! ## Credential Flows
//!
//! - **API key** - static `Authorization: Bearer <key>` header, no token endpoint
//! - **Client credentials** - OAuth2 grant, renewed by repeating the grant
//! - **Resource owner password** - OAuth2 grant, renewed with the refresh token
//! - **Bearer token** - pre-issued token, renewed with its refresh token if any
//!
//! ## Architecture
//!
//! - [`discovery`] - probes `/v1/.well-known/openid-configuration` and the
//!   identity provider document
//! - [`credentials`] - the [`Credential`] enum
//! - [`strategy`] - turns a credential plus discovery into headers or a token
//! - [`grant`] - token endpoint exchanges and tolerant response parsing
//! - [`token`] - immutable [`TokenState`] snapshots
//! - [`refresher`] - single-flight refresh and the background refresh task
//! - [`transport`] - [`AuthenticatedTransport`] that request builders use
//! - [`connection`] - wires it all together
//! - [`diagnostics`] - `Auth001`..`Auth006` warnings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use weaviate_auth::{Connection, ConnectionConfig, Credential};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::new("https://my-cluster.example.com")?
//!     .with_credential(Credential::password("alice", "s3cret").with_scopes(["offline_access"]))
//!     .with_startup_timeout(Duration::from_secs(10));
//!
//! let connection = Connection::connect(config).await?;
//! let response = connection
//!     .transport()
//!     .get("/v1/schema")
//!     .await?
//!     .send()
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Warnings
//!
//! Non-fatal conditions are reported through a [`Diagnostics`] sink with a
//! stable code. The default sink logs them with `tracing::warn!`:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `Auth001` | credentials supplied, server runs without authentication |
//! | `Auth002` | token cannot be refreshed and will expire |
//! | `Auth003` | identity provider returned a negative `expires_in` |
//! | `Auth004` | explicit `Authorization` header overrides the credential |
//! | `Auth005` | discovery response could not be parsed |
//! | `Auth006` | token refresh failed, previous token kept |

pub mod config;
pub mod connection;
pub mod credentials;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod grant;
pub mod refresher;
pub mod strategy;
pub mod token;
pub mod transport;

#[doc(inline)]
pub use config::ConnectionConfig;
#[doc(inline)]
pub use connection::Connection;
#[doc(inline)]
pub use credentials::Credential;
#[doc(inline)]
pub use diagnostics::{AuthWarning, CollectingDiagnostics, Diagnostics, TracingDiagnostics};
#[doc(inline)]
pub use discovery::DiscoveryOutcome;
#[doc(inline)]
pub use error::{AuthError, AuthResult};
#[doc(inline)]
pub use refresher::{RefreshGrant, TokenRefresher};
#[doc(inline)]
pub use token::TokenState;
#[doc(inline)]
pub use transport::{AuthenticatedTransport, Authorizer};
