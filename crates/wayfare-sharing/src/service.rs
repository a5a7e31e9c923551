//! Trip sharing: who may see and edit a trip.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use wayfare_core::{Clock, SharingConfig, Trip};

use crate::cache::TripCache;
use crate::error::SharingError;
use crate::grant::{normalize_email, Permission, SharingGrant};
use crate::lookup::Lookup;
use crate::store::{encode, Document, DocumentStore, DocumentStream, Filter};

const SHARED_WITH_FIELD: &str = "sharedWith";

/// Live view of the grants that include one collaborator.
pub struct GrantWatch {
    stream: DocumentStream,
}

impl GrantWatch {
    /// Next snapshot, or `None` once the store stops the listener.
    pub async fn next(&mut self) -> Option<Result<Vec<SharingGrant>, SharingError>> {
        let snapshot = self.stream.recv().await?;
        Some(snapshot.and_then(|docs| decode_grants(&docs)))
    }
}

fn decode_grants(docs: &[Document]) -> Result<Vec<SharingGrant>, SharingError> {
    docs.iter().map(Document::decode).collect()
}

pub struct SharingService {
    store: Arc<dyn DocumentStore>,
    cache: Option<Arc<TripCache>>,
    clock: Arc<dyn Clock>,
    grants_collection: String,
    trips_collection: String,
    // Grant updates are read-modify-write.
    write_lock: Mutex<()>,
}

impl SharingService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Option<Arc<TripCache>>,
        clock: Arc<dyn Clock>,
        config: &SharingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            grants_collection: config.grants_collection.clone(),
            trips_collection: config.trips_collection.clone(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load_grant(&self, trip_id: &str) -> Result<Option<SharingGrant>, SharingError> {
        match self.store.get(&self.grants_collection, trip_id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Share a trip with `email`, creating the grant on first share.
    ///
    /// Adding an existing collaborator is a no-op for the member set; the
    /// grant's permissions are replaced by `permissions` either way.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn share(
        &self,
        trip_id: &str,
        email: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<SharingGrant, SharingError> {
        let email = normalize_email(email)?;
        if permissions.is_empty() {
            return Err(SharingError::NoPermissions);
        }

        let _guard = self.write_lock.lock().await;

        let grant = match self.load_grant(trip_id).await? {
            Some(mut grant) => {
                grant.shared_with.insert(email.clone());
                grant.permissions = permissions;
                grant
            }
            None => SharingGrant {
                trip_id: trip_id.to_string(),
                shared_with: BTreeSet::from([email.clone()]),
                permissions,
            },
        };

        self.store
            .set(&self.grants_collection, trip_id, encode(&grant)?)
            .await?;

        let granted: Vec<&str> = grant.permissions.iter().map(Permission::as_str).collect();
        tracing::info!(
            "Trip {} shared with {} ({})",
            trip_id,
            email,
            granted.join(", ")
        );
        Ok(grant)
    }

    /// Remove `email` from a trip's grant, deleting the grant when no
    /// collaborator is left. Returns the remaining grant, if any.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn revoke(
        &self,
        trip_id: &str,
        email: &str,
    ) -> Result<Option<SharingGrant>, SharingError> {
        let email = normalize_email(email)?;
        let _guard = self.write_lock.lock().await;

        let Some(mut grant) = self.load_grant(trip_id).await? else {
            tracing::debug!("Trip {} is not shared", trip_id);
            return Ok(None);
        };

        if !grant.shared_with.remove(&email) {
            return Ok(Some(grant));
        }

        if grant.shared_with.is_empty() {
            self.store.delete(&self.grants_collection, trip_id).await?;
            tracing::info!("Removed {} from trip {}; trip no longer shared", email, trip_id);
            return Ok(None);
        }

        self.store
            .update(&self.grants_collection, trip_id, encode(&grant)?)
            .await?;
        tracing::info!("Removed {} from trip {}", email, trip_id);
        Ok(Some(grant))
    }

    /// True iff the trip is shared with `email` including edit rights.
    pub async fn can_edit(&self, trip_id: &str, email: &str) -> Result<bool, SharingError> {
        let email = normalize_email(email)?;
        Ok(self
            .load_grant(trip_id)
            .await?
            .is_some_and(|g| g.includes(&email) && g.allows(Permission::Edit)))
    }

    /// Collaborator emails of a trip; empty when it is not shared.
    pub async fn collaborators(&self, trip_id: &str) -> Result<Vec<String>, SharingError> {
        Ok(self
            .load_grant(trip_id)
            .await?
            .map(|g| g.shared_with.into_iter().collect())
            .unwrap_or_default())
    }

    /// Trips shared with `email`.
    ///
    /// On success the result is cached; when the store is unreachable the
    /// cached copy is served as `Lookup::Degraded`.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn list_shared_trips(&self, email: &str) -> Lookup<Vec<Trip>> {
        let email = match normalize_email(email) {
            Ok(email) => email,
            Err(e) => return Lookup::Failed(e),
        };

        match self.fetch_shared_trips(&email).await {
            Ok(trips) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(&email, &trips, self.clock.now_ms()) {
                        tracing::warn!("Failed to cache shared trips: {}", e);
                    }
                }
                Lookup::Fresh(trips)
            }
            Err(e) if e.is_unavailable() => self.cached_or_failed(&email, e),
            Err(e) => {
                tracing::error!("Shared trip lookup failed: {}", e);
                Lookup::Failed(e)
            }
        }
    }

    async fn fetch_shared_trips(&self, email: &str) -> Result<Vec<Trip>, SharingError> {
        let grants = self
            .store
            .query(
                &self.grants_collection,
                &Filter::array_contains(SHARED_WITH_FIELD, email),
            )
            .await?;

        let mut trips = Vec::with_capacity(grants.len());
        for grant in decode_grants(&grants)? {
            match self.store.get(&self.trips_collection, &grant.trip_id).await? {
                Some(doc) => trips.push(doc.decode::<Trip>()?),
                None => tracing::warn!(
                    "Grant references missing trip {}; skipping",
                    grant.trip_id
                ),
            }
        }
        Ok(trips)
    }

    fn cached_or_failed(&self, email: &str, error: SharingError) -> Lookup<Vec<Trip>> {
        let Some(cache) = &self.cache else {
            tracing::warn!("Shared trip lookup failed and no cache is configured: {}", error);
            return Lookup::Failed(error);
        };

        match cache.load(email) {
            Ok(Some(cached)) => {
                tracing::warn!(
                    "Shared trip lookup failed, serving {} cached trips: {}",
                    cached.trips.len(),
                    error
                );
                Lookup::Degraded {
                    stale: cached.trips,
                    cached_at_ms: cached.cached_at_ms,
                    reason: error.to_string(),
                }
            }
            Ok(None) => {
                tracing::warn!("Shared trip lookup failed with nothing cached: {}", error);
                Lookup::Failed(error)
            }
            Err(cache_err) => {
                tracing::warn!("Trip cache unreadable: {}", cache_err);
                Lookup::Failed(error)
            }
        }
    }

    /// Follow the grants that include `email` as they change.
    pub fn watch_grants(&self, email: &str) -> Result<GrantWatch, SharingError> {
        let email = normalize_email(email)?;
        let stream = self.store.listen(
            &self.grants_collection,
            Filter::array_contains(SHARED_WITH_FIELD, email),
        );
        Ok(GrantWatch { stream })
    }
}
