//! Sharing-specific error types.

use thiserror::Error;
use wayfare_core::DatabaseError;

#[derive(Error, Debug)]
pub enum SharingError {
    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error("At least one permission is required")]
    NoPermissions,

    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("Malformed document {id}: {message}")]
    InvalidDocument { id: String, message: String },

    #[error("Document store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Document store unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Trip cache error: {0}")]
    Cache(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SharingError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidEmail(email) => format!("\"{}\" is not a valid email address.", email),
            Self::NoPermissions => "Choose at least one permission to share with.".to_string(),
            Self::NotFound { .. } => "That trip is no longer shared.".to_string(),
            Self::InvalidDocument { .. } | Self::Serialization(_) => {
                "Shared trip data is corrupted.".to_string()
            }
            Self::Remote { status: 401 | 403, .. } => {
                "Not allowed to access shared trips.".to_string()
            }
            Self::Remote { .. } | Self::Network(_) => {
                "Could not reach the sharing service. Check your connection.".to_string()
            }
            Self::Cache(e) => e.user_message().to_string(),
        }
    }

    /// Whether the remote store could not be reached or answered with a
    /// transient failure (the case served from cache).
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert!(SharingError::InvalidEmail("bob".into())
            .user_message()
            .contains("bob"));
        assert!(SharingError::Remote {
            status: 403,
            message: "denied".into()
        }
        .user_message()
        .contains("Not allowed"));
    }

    #[test]
    fn test_is_unavailable() {
        let remote = |status| SharingError::Remote {
            status,
            message: String::new(),
        };
        assert!(remote(503).is_unavailable());
        assert!(remote(429).is_unavailable());
        assert!(!remote(404).is_unavailable());
        assert!(!SharingError::NoPermissions.is_unavailable());
    }
}
