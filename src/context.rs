//! Composition root: builds every service once from the loaded config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use wayfare_auth::{
    AuthSession, FileStore, KeyValueStore, KeyringStore, LoopbackPrompt, MemoryStore,
    OAuth2Config, TokenStore,
};
use wayfare_calendar::{CalendarClient, CalendarSyncService};
use wayfare_core::{Clock, Config, SharingBackend, SystemClock, TokenBackend};
use wayfare_sharing::{
    DocumentStore, FirestoreDocumentStore, InMemoryDocumentStore, SharingService, TripCache,
};

pub struct AppContext {
    pub session: Arc<AuthSession>,
    pub calendar: CalendarSyncService,
    pub sharing: SharingService,
}

impl AppContext {
    pub fn new(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let tokens = TokenStore::new(key_value_store(config));
        let prompt = Arc::new(LoopbackPrompt::new(Duration::from_secs(
            config.google.callback_timeout_secs,
        )));
        let session = Arc::new(AuthSession::new(
            OAuth2Config::from(&config.google),
            prompt,
            tokens,
            clock.clone(),
        ));

        let calendar = CalendarSyncService::new(
            session.clone(),
            CalendarClient::new(&config.google),
            clock.clone(),
        );

        let cache_path = config.sharing_cache_path();
        let cache = match TripCache::open(&cache_path) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                tracing::warn!(
                    "Shared trip cache at {} unavailable, continuing without it: {}",
                    cache_path.display(),
                    e
                );
                None
            }
        };
        let sharing = SharingService::new(
            document_store(config)?,
            cache,
            clock,
            &config.sharing,
        );

        tracing::debug!(
            "Context ready (tokens: {:?}, sharing: {:?})",
            config.storage.backend,
            config.sharing.effective_backend()
        );

        Ok(Self {
            session,
            calendar,
            sharing,
        })
    }
}

fn key_value_store(config: &Config) -> Arc<dyn KeyValueStore> {
    let namespace = &config.storage.namespace;
    match config.storage.backend {
        TokenBackend::File => Arc::new(FileStore::new(config.tokens_dir(), namespace)),
        TokenBackend::Keyring => Arc::new(KeyringStore::new(namespace)),
        TokenBackend::Memory => Arc::new(MemoryStore::new()),
    }
}

fn document_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    Ok(match config.sharing.effective_backend() {
        SharingBackend::Memory => Arc::new(InMemoryDocumentStore::new()),
        SharingBackend::Firestore => {
            let firestore = config
                .sharing
                .firestore
                .as_ref()
                .context("sharing.backend is firestore but [sharing.firestore] is missing")?;
            Arc::new(FirestoreDocumentStore::new(firestore))
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wayfare_auth::AuthStatus;
    use wayfare_core::FirestoreConfig;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            config_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_context_with_file_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(&config_in(dir.path())).unwrap();

        assert_eq!(ctx.session.initialize().await, AuthStatus::Unauthenticated);
        assert!(!ctx.calendar.is_logged_in());
        assert!(dir.path().join("shared_trips.db").exists());
        assert!(ctx
            .sharing
            .collaborators("lisbon")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_memory_sharing_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.storage.backend = TokenBackend::Memory;
        let ctx = AppContext::new(&config).unwrap();

        ctx.sharing
            .share("lisbon", "jane@example.com", wayfare_sharing::Permission::defaults())
            .await
            .unwrap();

        assert!(ctx.sharing.can_edit("lisbon", "jane@example.com").await.unwrap());
    }

    #[test]
    fn test_firestore_requires_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.sharing.backend = Some(SharingBackend::Firestore);

        assert!(document_store(&config).is_err());

        config.sharing.firestore = Some(FirestoreConfig {
            project_id: "wayfare-test".to_string(),
            api_key: None,
            base_url: "http://127.0.0.1:9".to_string(),
            poll_interval_secs: 30,
        });
        assert!(document_store(&config).is_ok());
    }

    #[tokio::test]
    async fn test_firestore_section_persists_grants_by_default() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.storage.backend = TokenBackend::Memory;
        config.sharing.firestore = Some(FirestoreConfig {
            project_id: "wayfare-test".to_string(),
            api_key: None,
            base_url: server.uri(),
            poll_interval_secs: 30,
        });
        let ctx = AppContext::new(&config).unwrap();

        assert!(ctx.sharing.collaborators("lisbon").await.unwrap().is_empty());
    }
}
