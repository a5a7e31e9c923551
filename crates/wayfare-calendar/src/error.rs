//! Calendar-specific error types.

use thiserror::Error;
use wayfare_core::AuthError;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Google Calendar API error: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl CalendarError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(e) => e.user_message().to_string(),
            Self::Api { status: 401, .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Api { status: 429, .. } => {
                "Too many requests. Please try again shortly.".to_string()
            }
            Self::Api { message, .. } => format!("Calendar error: {}", message),
            Self::InvalidEventData(msg) => format!("Invalid event: {}", msg),
            Self::Network(_) => "Network error. Check your connection.".to_string(),
        }
    }

    /// Whether this error should trigger a token refresh.
    pub fn should_refresh_token(&self) -> bool {
        matches!(self, Self::Api { status: 401, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, message: &str) -> CalendarError {
        CalendarError::Api {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_error_user_messages() {
        assert!(api(403, "insufficient scope")
            .user_message()
            .contains("insufficient scope"));
        assert!(api(401, "x").user_message().contains("sign in"));
        assert!(CalendarError::Auth(AuthError::Cancelled)
            .user_message()
            .contains("cancelled"));
    }

    #[test]
    fn test_display_carries_provider_message() {
        assert_eq!(
            api(403, "insufficient scope").to_string(),
            "Google Calendar API error: insufficient scope"
        );
    }

    #[test]
    fn test_should_refresh_token() {
        assert!(api(401, "x").should_refresh_token());
        assert!(!api(403, "x").should_refresh_token());
    }
}
