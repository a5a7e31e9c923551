use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::KeyValueStore;

/// Tokens are treated as expired this long before their real expiry, so a
/// token never runs out in the middle of a Calendar API call.
pub const EXPIRY_MARGIN_MS: i64 = 5 * 60 * 1000;

const ACCESS_TOKEN_KEY: &str = "google_calendar_access_token";
const REFRESH_TOKEN_KEY: &str = "google_calendar_refresh_token";
const TOKEN_EXPIRY_KEY: &str = "google_calendar_token_expiry";

/// OAuth credential held by the auth session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token for API requests
    pub access_token: Option<String>,

    /// Refresh token for silent renewal
    pub refresh_token: Option<String>,

    /// Access token expiry, epoch milliseconds
    pub expires_at_ms: Option<i64>,
}

impl Credential {
    /// Build a credential from a token endpoint response received at `now_ms`.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: u64,
        now_ms: i64,
    ) -> Self {
        let lifetime_ms = i64::try_from(expires_in_secs)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        Self {
            access_token: Some(access_token),
            refresh_token,
            expires_at_ms: Some(now_ms.saturating_add(lifetime_ms)),
        }
    }

    /// True iff an access token is present and outside the safety margin.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        match (&self.access_token, self.expires_at_ms) {
            (Some(_), Some(expires_at)) => now_ms < expires_at.saturating_sub(EXPIRY_MARGIN_MS),
            _ => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.expires_at_ms.is_none()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Persists a [`Credential`] as three string entries in a [`KeyValueStore`].
///
/// Persistence is best-effort: failures are logged and the caller carries
/// on with its in-memory state.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the stored credential, or `None` if nothing usable is stored.
    pub fn load(&self) -> Option<Credential> {
        let read = |key: &str| match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to read {} from token storage: {}", key, e);
                None
            }
        };

        let access_token = read(ACCESS_TOKEN_KEY);
        let refresh_token = read(REFRESH_TOKEN_KEY);
        let expires_at_ms = read(TOKEN_EXPIRY_KEY).and_then(|raw| match raw.parse::<i64>() {
            Ok(ms) => Some(ms),
            Err(_) => {
                tracing::warn!("Ignoring unparsable token expiry in storage");
                None
            }
        });

        let credential = Credential {
            access_token,
            refresh_token,
            expires_at_ms,
        };

        if credential.is_empty() {
            None
        } else {
            tracing::debug!("Loaded stored credential");
            Some(credential)
        }
    }

    /// Save a credential, dropping entries for fields that are unset.
    pub fn save(&self, credential: &Credential) {
        let expiry = credential.expires_at_ms.map(|ms| ms.to_string());

        let mut set: Vec<(&str, &str)> = Vec::with_capacity(3);
        let mut remove: Vec<&str> = Vec::new();

        for (key, value) in [
            (ACCESS_TOKEN_KEY, credential.access_token.as_deref()),
            (REFRESH_TOKEN_KEY, credential.refresh_token.as_deref()),
            (TOKEN_EXPIRY_KEY, expiry.as_deref()),
        ] {
            match value {
                Some(v) => set.push((key, v)),
                None => remove.push(key),
            }
        }

        if let Err(e) = self.store.apply(&set, &remove) {
            tracing::warn!(
                "Failed to persist credential, continuing with in-memory tokens: {}",
                e
            );
        }
    }

    /// Remove all three entries in one operation.
    pub fn clear(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear token storage: {}", e);
        }
    }
}
