//! OAuth session state machine for the Google Calendar integration.

use std::sync::Arc;

use parking_lot::Mutex;
use wayfare_core::{AuthError, Clock};

use crate::google::{GoogleTokenClient, TokenGrant};
use crate::oauth::{AuthorizationPrompt, OAuth2Config, PromptOutcome};
use crate::token::{Credential, TokenStore};

/// Externally visible session state. Carries no token material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone)]
enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated(Credential),
    Refreshing,
}

impl AuthState {
    fn status(&self) -> AuthStatus {
        match self {
            AuthState::Unauthenticated => AuthStatus::Unauthenticated,
            AuthState::Authenticating => AuthStatus::Authenticating,
            AuthState::Authenticated(_) => AuthStatus::Authenticated,
            AuthState::Refreshing => AuthStatus::Refreshing,
        }
    }
}

/// Owns the Google credential and drives login, refresh and logout.
///
/// Share it as `Arc<AuthSession>`; every method takes `&self`.
pub struct AuthSession {
    config: OAuth2Config,
    prompt: Arc<dyn AuthorizationPrompt>,
    tokens: TokenStore,
    token_client: GoogleTokenClient,
    clock: Arc<dyn Clock>,
    state: Mutex<AuthState>,
    // Held across the token endpoint call so only one refresh is in flight.
    refresh_guard: tokio::sync::Mutex<()>,
    // Serializes interactive logins.
    auth_guard: tokio::sync::Mutex<()>,
}

impl AuthSession {
    pub fn new(
        config: OAuth2Config,
        prompt: Arc<dyn AuthorizationPrompt>,
        tokens: TokenStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let token_client = GoogleTokenClient::new(&config);
        Self {
            config,
            prompt,
            tokens,
            token_client,
            clock,
            state: Mutex::new(AuthState::Unauthenticated),
            refresh_guard: tokio::sync::Mutex::new(()),
            auth_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.state.lock().status()
    }

    /// True while a usable credential is held: either a valid access token
    /// or a refresh token to renew it with.
    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now_ms();
        match &*self.state.lock() {
            AuthState::Authenticated(c) => c.is_valid_at(now) || c.can_refresh(),
            AuthState::Refreshing => true,
            _ => false,
        }
    }

    /// Restore the session from storage.
    ///
    /// A valid stored token is used as is; an expired one is refreshed when
    /// a refresh token exists; anything else is cleared.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn initialize(&self) -> AuthStatus {
        let _guard = self.refresh_guard.lock().await;

        let Some(stored) = self.tokens.load() else {
            tracing::debug!("No stored Google credential");
            *self.state.lock() = AuthState::Unauthenticated;
            return AuthStatus::Unauthenticated;
        };

        if stored.is_valid_at(self.clock.now_ms()) {
            tracing::info!("Restored Google session from storage");
            *self.state.lock() = AuthState::Authenticated(stored);
            return AuthStatus::Authenticated;
        }

        if stored.can_refresh() {
            tracing::info!("Stored access token expired, refreshing");
            return match self.refresh(stored).await {
                Ok(_) => AuthStatus::Authenticated,
                Err(_) => AuthStatus::Unauthenticated,
            };
        }

        tracing::info!("Stored credential unusable, clearing");
        self.tokens.clear();
        *self.state.lock() = AuthState::Unauthenticated;
        AuthStatus::Unauthenticated
    }

    /// Run the interactive authorization-code flow.
    ///
    /// Returns immediately when the session already holds a valid token.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        let _guard = self.auth_guard.lock().await;

        if self.current_valid_token().is_some() {
            return Ok(());
        }

        *self.state.lock() = AuthState::Authenticating;

        match self.run_authorization().await {
            Ok(credential) => {
                self.tokens.save(&credential);
                *self.state.lock() = AuthState::Authenticated(credential);
                tracing::info!("Google authentication complete");
                Ok(())
            }
            Err(e) => {
                match &e {
                    AuthError::Cancelled => tracing::info!("Google authentication cancelled"),
                    other => tracing::warn!("Google authentication failed: {}", other),
                }
                *self.state.lock() = AuthState::Unauthenticated;
                Err(e)
            }
        }
    }

    async fn run_authorization(&self) -> Result<Credential, AuthError> {
        let grant = match self.prompt.authorize(&self.config).await? {
            PromptOutcome::Granted(grant) => grant,
            PromptOutcome::Cancelled => return Err(AuthError::Cancelled),
        };

        let TokenGrant {
            access_token,
            refresh_token,
            expires_in,
        } = self
            .token_client
            .exchange_code(&grant.code, grant.pkce_verifier.as_deref())
            .await?;

        Ok(Credential::issued(
            access_token,
            refresh_token,
            expires_in,
            self.clock.now_ms(),
        ))
    }

    /// Access token that is valid right now, refreshing it if needed.
    ///
    /// Returns `None` when nothing is held, no refresh token exists, or the
    /// refresh fails. Concurrent callers share one refresh request.
    pub async fn valid_access_token(&self) -> Option<String> {
        if let Some(token) = self.current_valid_token() {
            return Some(token);
        }

        let _guard = self.refresh_guard.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.current_valid_token() {
            return Some(token);
        }

        let credential = match &*self.state.lock() {
            AuthState::Authenticated(c) if c.can_refresh() => c.clone(),
            _ => return None,
        };

        self.refresh(credential).await.ok()
    }

    /// Renew the access token after the provider rejected `rejected`.
    ///
    /// When another caller already replaced that token, the replacement is
    /// returned without a second refresh.
    pub async fn refresh_rejected(&self, rejected: &str) -> Option<String> {
        let _guard = self.refresh_guard.lock().await;
        let now = self.clock.now_ms();

        let credential = match &*self.state.lock() {
            AuthState::Authenticated(c)
                if c.access_token.as_deref() != Some(rejected) && c.is_valid_at(now) =>
            {
                return c.access_token.clone();
            }
            AuthState::Authenticated(c) if c.can_refresh() => c.clone(),
            _ => return None,
        };

        tracing::info!("Access token rejected by provider, refreshing");
        self.refresh(credential).await.ok()
    }

    fn current_valid_token(&self) -> Option<String> {
        let now = self.clock.now_ms();
        match &*self.state.lock() {
            AuthState::Authenticated(c) if c.is_valid_at(now) => c.access_token.clone(),
            _ => None,
        }
    }

    /// Renew `credential`. Caller must hold `refresh_guard`.
    async fn refresh(&self, credential: Credential) -> Result<String, AuthError> {
        let Some(refresh_token) = credential.refresh_token.clone() else {
            return Err(AuthError::NotAuthenticated);
        };

        *self.state.lock() = AuthState::Refreshing;

        let result = self.token_client.refresh(&refresh_token).await;

        let mut state = self.state.lock();
        if !matches!(*state, AuthState::Refreshing) {
            // logout() ran while the request was in flight
            tracing::debug!("Discarding refresh result after logout");
            return Err(AuthError::NotAuthenticated);
        }

        match result {
            Ok(grant) => {
                let renewed = Credential::issued(
                    grant.access_token,
                    grant.refresh_token.or(Some(refresh_token)),
                    grant.expires_in,
                    self.clock.now_ms(),
                );
                self.tokens.save(&renewed);
                let token = renewed.access_token.clone().unwrap_or_default();
                *state = AuthState::Authenticated(renewed);
                tracing::info!("Google access token refreshed");
                Ok(token)
            }
            Err(e) => {
                tracing::warn!("Token refresh failed, signing out: {}", e);
                self.tokens.clear();
                *state = AuthState::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Drop the credential from memory and storage.
    pub fn logout(&self) {
        self.tokens.clear();
        *self.state.lock() = AuthState::Unauthenticated;
        tracing::info!("Signed out of Google");
    }
}
