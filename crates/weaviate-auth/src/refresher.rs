//! Token refresher with single-flight refresh and a background scheduler.
//!
//! The current [`TokenState`] lives behind an `RwLock<Arc<_>>` together with
//! a generation counter. Readers clone the `Arc` and never block on network
//! I/O. Refreshes are serialized by an async mutex and keyed on the generation
//! the caller observed: whoever gets the mutex first performs the grant, the
//! others find the generation already bumped and return the new state.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::diagnostics::{AuthWarning, Diagnostics};
use crate::error::{AuthError, AuthResult};
use crate::grant::TokenEndpoint;
use crate::token::{TokenState, until};

/// Refresh lead time used when none is configured.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// First retry delay after a failed background refresh.
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Upper bound for the retry delay.
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Lower bound between two successful background refreshes, for providers
/// that hand out already-expired tokens.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// How a token is renewed.
#[derive(Clone)]
pub enum RefreshGrant {
    /// Repeat the client credentials grant
    ClientCredentials {
        /// Where to send the grant
        endpoint: TokenEndpoint,
        /// Client secret
        client_secret: SecretString,
        /// Merged scopes from the original request
        scopes: Vec<String>,
    },
    /// Exchange the current refresh token
    RefreshToken {
        /// Where to send the grant
        endpoint: TokenEndpoint,
        /// Scopes of the original grant; empty omits `scope`
        scopes: Vec<String>,
    },
}

impl RefreshGrant {
    /// Whether renewal depends on the refresh token held in the state
    pub fn uses_refresh_token(&self) -> bool {
        matches!(self, Self::RefreshToken { .. })
    }

    /// Whether `state` can still be renewed by this grant at the current time
    pub fn can_refresh(&self, state: &TokenState) -> bool {
        match self {
            Self::ClientCredentials { .. } => true,
            Self::RefreshToken { .. } => {
                state.refresh_secret().is_some() && !state.refresh_window_closed(Utc::now())
            }
        }
    }

    async fn execute(
        &self,
        current: &TokenState,
        diagnostics: &dyn Diagnostics,
    ) -> AuthResult<TokenState> {
        match self {
            Self::ClientCredentials {
                endpoint,
                client_secret,
                scopes,
            } => {
                let response = endpoint.client_credentials(client_secret, scopes).await?;
                Ok(response.into_state(diagnostics))
            }
            Self::RefreshToken { endpoint, scopes } => {
                let refresh_token = current
                    .refresh_secret()
                    .ok_or_else(|| AuthError::Refresh("no refresh token held".to_string()))?;
                let response = endpoint.refresh_token(refresh_token, scopes).await?;
                Ok(response.into_refreshed_state(current, diagnostics))
            }
        }
    }
}

impl std::fmt::Debug for RefreshGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientCredentials {
                endpoint, scopes, ..
            } => f
                .debug_struct("ClientCredentials")
                .field("endpoint", endpoint)
                .field("client_secret", &"[REDACTED]")
                .field("scopes", scopes)
                .finish(),
            Self::RefreshToken { endpoint, scopes } => f
                .debug_struct("RefreshToken")
                .field("endpoint", endpoint)
                .field("scopes", scopes)
                .finish(),
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    generation: u64,
    token: Arc<TokenState>,
}

/// Last failed attempt, used to coalesce callers arriving right after it.
#[derive(Debug, Default)]
struct RefreshGate {
    last_failure: Option<(u64, Instant)>,
}

#[derive(Debug)]
struct RefresherInner {
    snapshot: RwLock<Snapshot>,
    gate: Mutex<RefreshGate>,
    grant: Option<RefreshGrant>,
    margin: Duration,
    diagnostics: Arc<dyn Diagnostics>,
}

/// Holds the current token and keeps it fresh.
///
/// Cheap to clone; all clones share the same state.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    inner: Arc<RefresherInner>,
}

impl TokenRefresher {
    /// Create a refresher around an initial token.
    ///
    /// With `grant = None` the token is served as-is until it expires.
    pub fn new(
        initial: TokenState,
        grant: Option<RefreshGrant>,
        margin: Duration,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                snapshot: RwLock::new(Snapshot {
                    generation: 0,
                    token: Arc::new(initial),
                }),
                gate: Mutex::new(RefreshGate::default()),
                grant,
                margin,
                diagnostics,
            }),
        }
    }

    /// Current token snapshot.
    pub fn current(&self) -> Arc<TokenState> {
        self.snapshot().1
    }

    /// Number of refreshes installed so far.
    pub fn generation(&self) -> u64 {
        self.snapshot().0
    }

    /// Whether the current token can still be renewed.
    pub fn is_refreshable(&self) -> bool {
        self.can_refresh(&self.current())
    }

    /// Access token to attach to the next request.
    ///
    /// Refreshes first if the token is due and renewable. A failed refresh
    /// is reported as `Auth006` and the previous token is returned.
    pub async fn access_token(&self) -> String {
        let (generation, token) = self.snapshot();
        if Utc::now() < self.due_at(&token) || !self.can_refresh(&token) {
            return token.access_token().to_string();
        }

        match self.refresh_from(generation).await {
            Ok(fresh) => fresh.access_token().to_string(),
            Err(_) => self.current().access_token().to_string(),
        }
    }

    /// Refresh unless someone already moved past `observed_generation`.
    ///
    /// Returns the state that is current once the call completes. Callers
    /// that arrive within the retry backoff of a failed attempt against the
    /// same generation get that failure back instead of a new request.
    ///
    /// # Errors
    ///
    /// [`AuthError::Refresh`] if the grant failed; the previous token remains
    /// installed.
    pub async fn refresh_from(&self, observed_generation: u64) -> AuthResult<Arc<TokenState>> {
        self.attempt(observed_generation, true).await
    }

    async fn attempt(
        &self,
        observed_generation: u64,
        coalesce_failures: bool,
    ) -> AuthResult<Arc<TokenState>> {
        let mut gate = self.inner.gate.lock().await;

        let (generation, current) = self.snapshot();
        if generation != observed_generation {
            debug!(generation, "Token already refreshed by another caller");
            return Ok(current);
        }

        if coalesce_failures
            && let Some((failed_generation, at)) = gate.last_failure
            && failed_generation == generation
            && at.elapsed() < RETRY_BACKOFF_INITIAL
        {
            return Err(AuthError::Refresh(
                "previous refresh attempt failed moments ago".to_string(),
            ));
        }

        let Some(grant) = &self.inner.grant else {
            return Ok(current);
        };

        match grant.execute(&current, self.inner.diagnostics.as_ref()).await {
            Ok(next) => {
                let next = Arc::new(next);
                let installed = self.install(generation, Arc::clone(&next));
                gate.last_failure = None;
                info!(
                    generation = installed,
                    expires_at = %next.expires_at(),
                    "Access token refreshed"
                );
                Ok(next)
            }
            Err(e) => {
                let reason = e.to_string();
                gate.last_failure = Some((generation, Instant::now()));
                self.inner
                    .diagnostics
                    .warn(AuthWarning::RefreshFailed {
                        reason: reason.clone(),
                    });
                Err(AuthError::Refresh(reason))
            }
        }
    }

    /// Start the background refresh task.
    ///
    /// The task ends when the token stops being renewable or `shutdown` is
    /// notified. Returns `None` if there is nothing to schedule.
    pub fn spawn_scheduler(&self, shutdown: Arc<Notify>) -> Option<JoinHandle<()>> {
        if !self.is_refreshable() {
            return None;
        }

        let refresher = self.clone();
        Some(tokio::spawn(async move {
            debug!("Token refresh task started");
            refresher.run_scheduler(shutdown).await;
            debug!("Token refresh task stopped");
        }))
    }

    async fn run_scheduler(&self, shutdown: Arc<Notify>) {
        let mut backoff = RETRY_BACKOFF_INITIAL;
        let mut just_refreshed = false;

        loop {
            let (generation, token) = self.snapshot();
            if !self.can_refresh(&token) {
                info!(
                    expires_at = %token.expires_at(),
                    "Token can no longer be refreshed; stopping refresh task"
                );
                return;
            }

            let mut wait = until(self.due_at(&token));
            if just_refreshed {
                wait = wait.max(MIN_REFRESH_INTERVAL);
            }

            tokio::select! {
                biased;
                _ = shutdown.notified() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            if !self.can_refresh(&self.current()) {
                continue;
            }

            match self.attempt(generation, false).await {
                Ok(_) => {
                    backoff = RETRY_BACKOFF_INITIAL;
                    just_refreshed = true;
                }
                Err(_) => {
                    debug!(retry_in = ?backoff, "Scheduling refresh retry");
                    tokio::select! {
                        biased;
                        _ = shutdown.notified() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                    just_refreshed = false;
                }
            }
        }
    }

    fn snapshot(&self) -> (u64, Arc<TokenState>) {
        let guard = self
            .inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (guard.generation, Arc::clone(&guard.token))
    }

    /// Install `next` on top of `observed`; returns the new generation.
    fn install(&self, observed: u64, next: Arc<TokenState>) -> u64 {
        let mut guard = self
            .inner
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug_assert_eq!(guard.generation, observed);
        guard.generation = observed + 1;
        guard.token = next;
        guard.generation
    }

    fn can_refresh(&self, state: &TokenState) -> bool {
        self.inner
            .grant
            .as_ref()
            .is_some_and(|grant| grant.can_refresh(state))
    }

    fn due_at(&self, state: &TokenState) -> chrono::DateTime<Utc> {
        let uses_refresh_token = self
            .inner
            .grant
            .as_ref()
            .is_some_and(RefreshGrant::uses_refresh_token);
        state.refresh_due_at(self.inner.margin, uses_refresh_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnostics;

    fn refresher(state: TokenState, grant: Option<RefreshGrant>) -> TokenRefresher {
        TokenRefresher::new(
            state,
            grant,
            DEFAULT_REFRESH_MARGIN,
            Arc::new(CollectingDiagnostics::new()),
        )
    }

    fn endpoint() -> TokenEndpoint {
        TokenEndpoint::new("http://127.0.0.1:9/token", "client", reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_fresh_token_is_served_without_refresh() {
        let r = refresher(
            TokenState::new("a", Duration::from_secs(3600)),
            Some(RefreshGrant::RefreshToken {
                endpoint: endpoint(),
                scopes: vec![],
            }),
        );
        assert_eq!(r.access_token().await, "a");
        assert_eq!(r.generation(), 0);
    }

    #[tokio::test]
    async fn test_unrefreshable_token_is_served_after_expiry() {
        let r = refresher(TokenState::new("a", Duration::ZERO), None);
        assert!(!r.is_refreshable());
        assert_eq!(r.access_token().await, "a");
        assert!(r.spawn_scheduler(Arc::new(Notify::new())).is_none());
    }

    #[test]
    fn test_refresh_token_grant_needs_open_window() {
        let grant = RefreshGrant::RefreshToken {
            endpoint: endpoint(),
            scopes: vec![],
        };
        assert!(!grant.can_refresh(&TokenState::new("a", Duration::from_secs(60))));
        assert!(grant.can_refresh(
            &TokenState::new("a", Duration::from_secs(60)).with_refresh_token("r", None)
        ));
        assert!(!grant.can_refresh(
            &TokenState::new("a", Duration::from_secs(60))
                .with_refresh_token("r", Some(Duration::ZERO))
        ));
    }

    #[test]
    fn test_client_credentials_grant_is_always_renewable() {
        let grant = RefreshGrant::ClientCredentials {
            endpoint: endpoint(),
            client_secret: SecretString::new("s".to_string()),
            scopes: vec![],
        };
        assert!(grant.can_refresh(&TokenState::new("a", Duration::ZERO)));
        assert!(!format!("{grant:?}").contains("\"s\""));
    }

    #[tokio::test]
    async fn test_stale_generation_returns_current_state() {
        let r = refresher(
            TokenState::new("a", Duration::ZERO),
            Some(RefreshGrant::RefreshToken {
                endpoint: endpoint(),
                scopes: vec![],
            }),
        );
        // Nothing was installed at generation 7, so no grant is attempted
        let state = tokio_test::assert_ok!(r.refresh_from(7).await);
        assert_eq!(state.access_token(), "a");
    }
}
