pub mod google;
pub mod oauth;
pub mod session;
pub mod storage;
pub mod token;

pub use google::{GoogleTokenClient, TokenGrant};
pub use oauth::{
    authorization_url, AuthorizationGrant, AuthorizationPrompt, LoopbackPrompt, OAuth2Config,
    PromptOutcome, UrlOpener,
};
pub use session::{AuthSession, AuthStatus};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
pub use token::{Credential, TokenStore, EXPIRY_MARGIN_MS};
