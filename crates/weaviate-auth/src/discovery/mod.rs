//! # OIDC Discovery
//!
//! Determines whether a Weaviate server requires authentication and, if so,
//! where tokens are issued.
//!
//! ## Flow
//!
//! 1. `GET <server>/v1/.well-known/openid-configuration`
//!    - `404` → [`DiscoveryOutcome::NoAuthConfigured`]
//!    - `200` with an unparseable body → [`DiscoveryOutcome::Unparseable`]
//!    - `200` with `{href, clientId, scopes?}` → step 2
//!    - anything else → [`AuthError::Discovery`](crate::AuthError::Discovery)
//! 2. `GET <href>` (usually on the identity provider's host) →
//!    `{token_endpoint}` → [`DiscoveryOutcome::Discovered`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use weaviate_auth::discovery::{DiscoveryOutcome, DiscoveryResolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = DiscoveryResolver::new(reqwest::Client::new());
//! let server = url::Url::parse("http://localhost:8080")?;
//!
//! match resolver.resolve(&server).await? {
//!     DiscoveryOutcome::Discovered { token_endpoint, .. } => {
//!         println!("tokens are issued by {token_endpoint}");
//!     }
//!     other => println!("no usable auth configuration: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod resolver;
mod types;

pub use resolver::{DiscoveryResolver, OIDC_CONFIGURATION_PATH};
pub use types::{DiscoveryOutcome, OidcConfiguration, ProviderMetadata};
