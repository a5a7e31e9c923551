use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl,
    Scope, TokenUrl,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use url::Url;
use warp::Filter;
use wayfare_core::{AuthError, GoogleConfig};

/// OAuth2 configuration
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// Client ID from OAuth provider
    pub client_id: String,

    /// Client secret, if the client type has one
    pub client_secret: Option<String>,

    /// Authorization endpoint URL
    pub auth_url: String,

    /// Token endpoint URL
    pub token_url: String,

    /// Redirect URI for OAuth callback
    pub redirect_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,
}

impl From<&GoogleConfig> for OAuth2Config {
    fn from(google: &GoogleConfig) -> Self {
        Self {
            client_id: google.client_id.clone(),
            client_secret: google.client_secret.clone(),
            auth_url: google.auth_url.clone(),
            token_url: google.token_url.clone(),
            redirect_uri: google.redirect_uri.clone(),
            scopes: google.scopes.clone(),
        }
    }
}

/// Authorization code handed back by the identity provider.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    /// PKCE verifier matching the challenge sent with the request
    pub pkce_verifier: Option<String>,
}

/// How the interactive step ended.
#[derive(Debug, Clone)]
pub enum PromptOutcome {
    Granted(AuthorizationGrant),
    /// The user closed the flow or denied consent
    Cancelled,
}

/// Interactive half of the authorization-code flow.
///
/// Implementations present the consent screen and return the code; the
/// token exchange is done by the session.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn authorize(&self, config: &OAuth2Config) -> Result<PromptOutcome, AuthError>;
}

/// Authorization URL plus the secrets needed to verify the callback.
pub struct AuthorizationUrl {
    pub url: String,
    pub csrf_state: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

/// Build the Google authorization URL with CSRF state and a PKCE challenge.
///
/// `access_type=offline` and `prompt=consent` make Google return a refresh
/// token on every consent.
pub fn authorization_url(config: &OAuth2Config) -> Result<AuthorizationUrl, AuthError> {
    let client = BasicClient::new(
        ClientId::new(config.client_id.clone()),
        config.client_secret.clone().map(ClientSecret::new),
        AuthUrl::new(config.auth_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("auth URL: {}", e)))?,
        Some(
            TokenUrl::new(config.token_url.clone())
                .map_err(|e| AuthError::InvalidConfig(format!("token URL: {}", e)))?,
        ),
    )
    .set_redirect_uri(
        RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("redirect URI: {}", e)))?,
    );

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut auth_request = client.authorize_url(CsrfToken::new_random);
    for scope in &config.scopes {
        auth_request = auth_request.add_scope(Scope::new(scope.clone()));
    }

    let (url, csrf_state) = auth_request
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    Ok(AuthorizationUrl {
        url: url.to_string(),
        csrf_state,
        pkce_verifier,
    })
}

/// Opens the authorization URL for the user.
pub type UrlOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<HashMap<String, String>>>>>;

/// Browser + loopback callback server prompt for desktop use.
pub struct LoopbackPrompt {
    timeout: Duration,
    opener: UrlOpener,
}

impl LoopbackPrompt {
    /// Open the system browser and wait up to `timeout` for the callback.
    pub fn new(timeout: Duration) -> Self {
        Self::with_opener(timeout, Arc::new(|url: &str| webbrowser::open(url)))
    }

    /// Use a custom opener (print the URL, drive a test client, ...).
    pub fn with_opener(timeout: Duration, opener: UrlOpener) -> Self {
        Self { timeout, opener }
    }

    fn callback_target(redirect_uri: &str) -> Result<(SocketAddr, String), AuthError> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::InvalidConfig(format!("redirect URI: {}", e)))?;
        let port = url
            .port()
            .ok_or_else(|| AuthError::InvalidConfig("redirect URI has no port".into()))?;
        let ip = match url.host() {
            Some(url::Host::Ipv4(ip)) => std::net::IpAddr::V4(ip),
            Some(url::Host::Ipv6(ip)) => std::net::IpAddr::V6(ip),
            Some(url::Host::Domain("localhost")) => {
                std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
            }
            _ => {
                return Err(AuthError::InvalidConfig(
                    "redirect URI must be a loopback address".into(),
                ))
            }
        };
        Ok((SocketAddr::new(ip, port), url.path().to_string()))
    }

    fn interpret_callback(
        params: &HashMap<String, String>,
        expected_state: &CsrfToken,
    ) -> Result<Option<String>, AuthError> {
        if let Some(error) = params.get("error") {
            return if error == "access_denied" {
                Ok(None)
            } else {
                Err(AuthError::Failed(format!("authorization error: {}", error)))
            };
        }

        let state = params.get("state").map(String::as_str).unwrap_or_default();
        if state != expected_state.secret() {
            return Err(AuthError::Failed("CSRF state mismatch".into()));
        }

        match params.get("code") {
            Some(code) if !code.is_empty() => Ok(Some(code.clone())),
            _ => Err(AuthError::Failed("callback carried no authorization code".into())),
        }
    }
}

#[async_trait]
impl AuthorizationPrompt for LoopbackPrompt {
    async fn authorize(&self, config: &OAuth2Config) -> Result<PromptOutcome, AuthError> {
        let request = authorization_url(config)?;
        let (addr, callback_path) = Self::callback_target(&config.redirect_uri)?;

        let (tx, rx) = oneshot::channel();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        let routes = warp::get()
            .and(warp::path::full())
            .and(warp::query::<HashMap<String, String>>())
            .map(move |full: warp::path::FullPath, params: HashMap<String, String>| {
                if full.as_str() != callback_path {
                    return warp::reply::with_status(
                        warp::reply::html("<html><body>Not found</body></html>"),
                        warp::http::StatusCode::NOT_FOUND,
                    );
                }

                if let Some(sender) = tx.lock().take() {
                    let _ = sender.send(params);
                }

                warp::reply::with_status(
                    warp::reply::html(
                        "<html><body><h1>Wayfare is connected</h1><p>You can close this window.</p></body></html>",
                    ),
                    warp::http::StatusCode::OK,
                )
            });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async {
                let _ = shutdown_rx.await;
            })
            .map_err(|e| {
                tracing::warn!("Failed to bind OAuth callback server on {}: {}", addr, e);
                AuthError::PortInUse(addr.port())
            })?;
        tokio::spawn(server);
        tracing::debug!("OAuth callback server listening on {}", bound);

        tracing::info!("Opening browser for Google authorization");
        if let Err(e) = (self.opener)(&request.url) {
            tracing::warn!(
                "Could not open a browser ({}); visit this URL to continue: {}",
                e,
                request.url
            );
        }

        let received = tokio::time::timeout(self.timeout, rx).await;
        let _ = shutdown_tx.send(());

        let params = match received {
            Err(_) => return Err(AuthError::CallbackTimeout),
            Ok(Err(_)) => return Ok(PromptOutcome::Cancelled),
            Ok(Ok(params)) => params,
        };

        match Self::interpret_callback(&params, &request.csrf_state)? {
            Some(code) => Ok(PromptOutcome::Granted(AuthorizationGrant {
                code,
                pkce_verifier: Some(request.pkce_verifier.secret().clone()),
            })),
            None => {
                tracing::info!("User denied consent");
                Ok(PromptOutcome::Cancelled)
            }
        }
    }
}
