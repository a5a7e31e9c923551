//! Calendar event types and API payloads.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Wire format for event start/end, without offset; the zone travels in
/// `timeZone`.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Event derived from a trip item, ready to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    /// Client-side id (`flight-{id}`, `hotel-{id}`, ...). Only used for
    /// logging; the provider assigns its own id.
    pub id: String,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub description: String,
    pub location: Option<String>,
}

impl CalendarEvent {
    /// Build the insert request body for the given time zone.
    pub fn to_request(&self, time_zone: &str) -> EventRequest {
        EventRequest {
            summary: self.title.clone(),
            description: self.description.clone(),
            start: EventDateTime {
                date_time: self.start.format(EVENT_TIME_FORMAT).to_string(),
                time_zone: time_zone.to_string(),
            },
            end: EventDateTime {
                date_time: self.end.format(EVENT_TIME_FORMAT).to_string(),
                time_zone: time_zone.to_string(),
            },
            location: self.location.clone(),
        }
    }
}

// API Request/Response Types

/// Body of `POST /calendars/{calendarId}/events`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub summary: String,
    pub description: String,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    pub time_zone: String,
}

/// Subset of the Google Calendar event resource we read back.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub html_link: Option<String>,
    pub status: Option<String>,
}

/// Error envelope of the Google APIs.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub message: Option<String>,
    pub code: Option<u16>,
    pub status: Option<String>,
}
