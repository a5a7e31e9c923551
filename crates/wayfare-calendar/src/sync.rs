//! Trip → Google Calendar sync.

use std::sync::Arc;

use wayfare_auth::{AuthSession, AuthStatus};
use wayfare_core::{AuthError, Clock, Trip};

use crate::client::CalendarClient;
use crate::error::CalendarError;
use crate::events::{restaurant_event, trip_events, RestaurantReservation};
use crate::types::CalendarEvent;

/// Creates calendar events for trips and reservations on behalf of the
/// signed-in user.
pub struct CalendarSyncService {
    session: Arc<AuthSession>,
    client: CalendarClient,
    clock: Arc<dyn Clock>,
}

impl CalendarSyncService {
    pub fn new(session: Arc<AuthSession>, client: CalendarClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            session,
            client,
            clock,
        }
    }

    /// Restore a stored Google session, if any.
    pub async fn initialize(&self) -> bool {
        self.session.initialize().await == AuthStatus::Authenticated
    }

    pub async fn authenticate(&self) -> Result<(), CalendarError> {
        self.session.authenticate().await?;
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn logout(&self) {
        self.session.logout();
        tracing::info!("Calendar sync signed out");
    }

    /// Create one event with the current access token.
    ///
    /// A 401 forces one token refresh and a single retry.
    pub async fn create_event(&self, event: &CalendarEvent) -> Result<String, CalendarError> {
        let token = self
            .session
            .valid_access_token()
            .await
            .ok_or(CalendarError::Auth(AuthError::NotAuthenticated))?;

        let created = match self.client.create_event(&token, event).await {
            Err(e) if e.should_refresh_token() => {
                tracing::warn!("Calendar rejected the access token for {}: {}", event.id, e);
                let renewed = self
                    .session
                    .refresh_rejected(&token)
                    .await
                    .ok_or(CalendarError::Auth(AuthError::NotAuthenticated))?;
                self.client.create_event(&renewed, event).await?
            }
            other => other?,
        };
        tracing::info!(
            "Created calendar event {} for {} in {}",
            created.id,
            event.id,
            self.client.calendar_id()
        );
        Ok(created.id)
    }

    /// Make sure a token can be had, running the interactive flow if not.
    async fn ensure_signed_in(&self) -> Result<(), CalendarError> {
        if self.session.valid_access_token().await.is_some() {
            return Ok(());
        }
        tracing::info!("No valid Google token, starting sign-in");
        self.session.authenticate().await?;
        Ok(())
    }

    /// Create every event for a trip, one at a time, in derivation order.
    ///
    /// Stops at the first failure; events created before it stay in the
    /// calendar. Returns the provider ids of the created events.
    #[tracing::instrument(skip(self, trip), fields(trip_id = %trip.id), level = "info")]
    pub async fn sync_trip(&self, trip: &Trip) -> Result<Vec<String>, CalendarError> {
        let events = trip_events(trip)?;
        self.ensure_signed_in().await?;

        let mut created = Vec::with_capacity(events.len());
        for event in &events {
            match self.create_event(event).await {
                Ok(id) => created.push(id),
                Err(e) => {
                    tracing::error!(
                        "Trip sync stopped at {} after {} of {} events: {}",
                        event.id,
                        created.len(),
                        events.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Synced trip \"{}\": created {} events",
            trip.title,
            created.len()
        );
        Ok(created)
    }

    /// Create a two-hour event for a restaurant booking.
    #[tracing::instrument(skip(self, reservation), fields(restaurant = %reservation.name), level = "info")]
    pub async fn sync_restaurant(
        &self,
        reservation: &RestaurantReservation,
    ) -> Result<String, CalendarError> {
        let event = restaurant_event(reservation, self.clock.now_ms());
        self.ensure_signed_in().await?;
        self.create_event(&event).await
    }
}
