//! Token state snapshots.
//!
//! A [`TokenState`] is immutable: every refresh produces a new one which is
//! swapped in by the [`TokenRefresher`](crate::TokenRefresher). All expiry
//! times are absolute, computed once from the relative `expires_in` at the
//! moment the token was received.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Access token plus everything needed to decide when to refresh it.
#[derive(Clone)]
pub struct TokenState {
    access_token: SecretString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    refresh_token: Option<SecretString>,
    refresh_issued_at: DateTime<Utc>,
    refresh_expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    /// Token issued now, valid for `expires_in`.
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self::issued(access_token, now, offset(now, expires_in))
    }

    /// Token with explicit absolute timestamps.
    pub fn issued(
        access_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            issued_at,
            expires_at,
            refresh_token: None,
            refresh_issued_at: issued_at,
            refresh_expires_at: None,
        }
    }

    /// Attach a refresh token. `refresh_expires_in` is relative to `issued_at`.
    #[must_use]
    pub fn with_refresh_token(
        mut self,
        refresh_token: impl Into<String>,
        refresh_expires_in: Option<Duration>,
    ) -> Self {
        self.refresh_token = Some(SecretString::new(refresh_token.into()));
        self.refresh_issued_at = self.issued_at;
        self.refresh_expires_at = refresh_expires_in.map(|d| offset(self.issued_at, d));
        self
    }

    /// Attach an already-held refresh token with absolute timestamps.
    #[must_use]
    pub(crate) fn with_refresh_secret(
        mut self,
        refresh_token: SecretString,
        refresh_issued_at: DateTime<Utc>,
        refresh_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.refresh_token = Some(refresh_token);
        self.refresh_issued_at = refresh_issued_at;
        self.refresh_expires_at = refresh_expires_at;
        self
    }

    /// The access token value
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// The refresh token value, if any
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    pub(crate) fn refresh_secret(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// When the token was received
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// When the access token expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// When the refresh token was issued; differs from `issued_at` once a
    /// refresh kept the previous refresh token
    pub fn refresh_issued_at(&self) -> DateTime<Utc> {
        self.refresh_issued_at
    }

    /// When the refresh token expires, if the provider said so
    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        self.refresh_expires_at
    }

    /// Whether the access token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the refresh token is known to have expired at `now`
    pub fn refresh_window_closed(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|exp| now >= exp)
    }

    /// Whole seconds until the access token expires (negative once expired)
    pub fn remaining_secs(&self) -> i64 {
        self.expires_at
            .signed_duration_since(Utc::now())
            .num_seconds()
    }

    /// Point in time at which a refresh should happen.
    ///
    /// Each window (access token, and refresh token if that is what will be
    /// used) is refreshed `margin` before it ends, with the lead capped at half
    /// of that window's own lifetime so short-lived tokens are not refreshed
    /// the instant they arrive. The earlier of the two wins.
    ///
    /// A refresh token carried over from an earlier state whose due point had
    /// already passed when this state was issued is ignored: refreshing again
    /// cannot extend it.
    pub fn refresh_due_at(&self, margin: Duration, uses_refresh_token: bool) -> DateTime<Utc> {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        let access_due = due_before(self.issued_at, self.expires_at, margin);

        match self.refresh_expires_at {
            Some(refresh_exp) if uses_refresh_token => {
                let refresh_due = due_before(self.refresh_issued_at, refresh_exp, margin);
                if refresh_due < self.issued_at {
                    access_due
                } else {
                    access_due.min(refresh_due)
                }
            }
            _ => access_due,
        }
    }
}

/// `end` minus `margin`, the lead capped at half of `start..end`.
fn due_before(start: DateTime<Utc>, end: DateTime<Utc>, margin: TimeDelta) -> DateTime<Utc> {
    let lifetime = end.signed_duration_since(start);
    let lead = margin.min(lifetime / 2).max(TimeDelta::zero());
    end.checked_sub_signed(lead).unwrap_or(end)
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// `start + d`, saturating at the far future.
pub(crate) fn offset(start: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `at`, zero if it already passed.
pub(crate) fn until(at: DateTime<Utc>) -> Duration {
    at.signed_duration_since(Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
}
