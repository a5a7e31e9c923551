pub mod client;
pub mod error;
pub mod events;
pub mod sync;
pub mod types;

pub use client::CalendarClient;
pub use error::CalendarError;
pub use events::{trip_events, RestaurantReservation};
pub use sync::CalendarSyncService;
pub use types::{CalendarEvent, EventRequest};
