//! Google Calendar API client.

use tracing::instrument;
use wayfare_core::GoogleConfig;

use crate::error::CalendarError;
use crate::types::*;

pub struct CalendarClient {
    client: reqwest::Client,
    base_url: String,
    calendar_id: String,
    time_zone: String,
}

impl CalendarClient {
    pub fn new(config: &GoogleConfig) -> Self {
        Self::new_with_base_url(
            &config.calendar_api_base,
            &config.calendar_id,
            &config.time_zone,
        )
    }

    pub fn new_with_base_url(base_url: &str, calendar_id: &str, time_zone: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            calendar_id: calendar_id.to_string(),
            time_zone: time_zone.to_string(),
        }
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// Insert an event into the configured calendar.
    #[instrument(skip(self, access_token, event), fields(event_id = %event.id), level = "info")]
    pub async fn create_event(
        &self,
        access_token: &str,
        event: &CalendarEvent,
    ) -> Result<ApiEvent, CalendarError> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id),
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&event.to_request(&self.time_zone))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CalendarError> {
        let status = response.status();

        if status.is_success() {
            return response.json().await.map_err(|e| CalendarError::Api {
                status: status.as_u16(),
                message: format!("JSON parse error: {}", e),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(ApiErrorBody {
                error: Some(ApiErrorDetail {
                    message: Some(message),
                    ..
                }),
            }) => message,
            Ok(_) => "Unknown error".to_string(),
            Err(_) if text.trim().is_empty() => "Unknown error".to_string(),
            Err(_) => text,
        };

        Err(CalendarError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> CalendarEvent {
        let day = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        CalendarEvent {
            id: "restaurant-1".into(),
            title: "🍽️ Restaurant: Septime".into(),
            start: day.and_hms_opt(19, 30, 0).unwrap(),
            end: day.and_hms_opt(21, 30, 0).unwrap(),
            description: "Dinner at Septime".into(),
            location: Some("80 Rue de Charonne".into()),
        }
    }

    #[tokio::test]
    async fn test_create_event() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(header("Authorization", "Bearer test_token"))
            .and(body_partial_json(serde_json::json!({
                "summary": "🍽️ Restaurant: Septime",
                "start": {"dateTime": "2025-06-03T19:30:00", "timeZone": "UTC"},
                "end": {"dateTime": "2025-06-03T21:30:00", "timeZone": "UTC"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt123",
                "status": "confirmed",
                "htmlLink": "https://calendar.google.com/event?eid=evt123"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = CalendarClient::new_with_base_url(&mock_server.uri(), "primary", "UTC");
        let created = client.create_event("test_token", &event()).await.unwrap();

        assert_eq!(created.id, "evt123");
    }

    #[tokio::test]
    async fn test_calendar_id_is_escaped() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/team%40group.calendar.google.com/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "e"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = CalendarClient::new_with_base_url(
            &mock_server.uri(),
            "team@group.calendar.google.com",
            "UTC",
        );

        client.create_event("t", &event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_message_is_extracted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "insufficient scope"}
            })))
            .mount(&mock_server)
            .await;

        let client = CalendarClient::new_with_base_url(&mock_server.uri(), "primary", "UTC");
        let err = client.create_event("t", &event()).await.unwrap_err();

        match err {
            CalendarError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "insufficient scope");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_without_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": {"code": 500}
            })))
            .mount(&mock_server)
            .await;

        let client = CalendarClient::new_with_base_url(&mock_server.uri(), "primary", "UTC");
        let err = client.create_event("t", &event()).await.unwrap_err();

        assert!(matches!(
            err,
            CalendarError::Api { status: 500, ref message } if message == "Unknown error"
        ));
        assert!(!err.should_refresh_token());
    }
}
