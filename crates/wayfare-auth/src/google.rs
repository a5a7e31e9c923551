//! Google OAuth2 token endpoint client.

use serde::{Deserialize, Serialize};
use wayfare_core::{AuthError, ReqwestErrorExt};

use crate::oauth::OAuth2Config;

/// Raw token endpoint response. Every field is optional so a malformed
/// response surfaces as an auth failure rather than a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Error body returned by the token endpoint on failure.
#[derive(Debug, Deserialize)]
struct GoogleTokenError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Validated token grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl TryFrom<GoogleTokenResponse> for TokenGrant {
    type Error = AuthError;

    fn try_from(resp: GoogleTokenResponse) -> Result<Self, Self::Error> {
        let access_token = resp
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Failed("token response missing access_token".into()))?;
        let expires_in = resp
            .expires_in
            .ok_or_else(|| AuthError::Failed("token response missing expires_in".into()))?;

        Ok(Self {
            access_token,
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
            expires_in,
        })
    }
}

/// Client for the authorization-code and refresh-token grants.
pub struct GoogleTokenClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
}

impl GoogleTokenClient {
    pub fn new(config: &OAuth2Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    /// Exchange an authorization code for tokens.
    #[tracing::instrument(skip(self, code, pkce_verifier), level = "info")]
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        if let Some(verifier) = pkce_verifier {
            form.push(("code_verifier", verifier));
        }
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        self.post_form(&form, "Token exchange").await
    }

    /// Renew an access token with a refresh token.
    #[tracing::instrument(skip(self, refresh_token), level = "info")]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        self.post_form(&form, "Token refresh").await
    }

    async fn post_form(&self, form: &[(&str, &str)], what: &str) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<GoogleTokenError>(&text) {
                Ok(GoogleTokenError {
                    error_description: Some(desc),
                    ..
                }) => desc,
                Ok(GoogleTokenError {
                    error: Some(code), ..
                }) => code,
                _ => text,
            };
            return Err(AuthError::Failed(format!(
                "{} failed: {} {}",
                what,
                status.as_u16(),
                detail
            )));
        }

        let body: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Failed(format!("{} returned invalid JSON: {}", what, e)))?;

        TokenGrant::try_from(body)
    }
}
