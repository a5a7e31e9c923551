//! Centralized error types for Wayfare.
//!
//! This module provides a typed error hierarchy that:
//! - Enables precise error handling throughout the workspace
//! - Provides user-friendly messages suitable for UI display
//! - Preserves full error context for debugging/logging

use thiserror::Error;

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The server is experiencing issues. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
            NetworkError::InvalidResponse(_) => {
                "Received an unexpected response. Please try again."
            }
        }
    }
}

/// Local database errors (the SQLite trip cache).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed(_) => {
                "Unable to access local data. Try restarting the app."
            }
            DatabaseError::QueryFailed(_) => "A data operation failed. Please try again.",
            DatabaseError::Corruption(_) => {
                "Local data may be corrupted. Consider resetting app data."
            }
        }
    }
}

/// Authentication errors (OAuth flow, token endpoint).
#[derive(Debug, Error)]
pub enum AuthError {
    /// The interactive flow was aborted or the user denied consent.
    #[error("OAuth flow cancelled by user")]
    Cancelled,

    /// The code exchange or refresh was rejected, or the response was unusable.
    #[error("OAuth flow failed: {0}")]
    Failed(String),

    /// No usable access token and no way to obtain one silently.
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Timed out waiting for the OAuth callback")]
    CallbackTimeout,

    #[error("Port {0} already in use for OAuth callback")]
    PortInUse(u16),

    #[error("Invalid OAuth configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error during OAuth: {0}")]
    Network(#[from] NetworkError),
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::Cancelled => "Sign-in was cancelled.",
            AuthError::Failed(_) => "Sign-in failed. Please try again.",
            AuthError::NotAuthenticated => "Not signed in. Please connect your Google account.",
            AuthError::CallbackTimeout => "Sign-in took too long. Please try again.",
            AuthError::PortInUse(_) => "Sign-in port is busy. Close other apps and try again.",
            AuthError::InvalidConfig(_) => "Google sign-in is not configured. Check your settings.",
            AuthError::Network(e) => e.user_message(),
        }
    }
}

/// Local key/value persistence errors.
///
/// These are logged by the token layer and never propagated past it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("System keyring error: {0}")]
    Keyring(String),

    #[error("Storage location unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::Io(_) | StorageError::Serialization(_) => {
                "Failed to save credentials. You may need to sign in again next time."
            }
            StorageError::Keyring(_) => "The system keyring is unavailable.",
            StorageError::Unavailable(_) => "No location to store credentials was found.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

/// Extension trait for converting rusqlite errors to our error types.
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                DatabaseError::Corruption(self.to_string())
            }
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("unable to open") => {
                DatabaseError::ConnectionFailed(self.to_string())
            }
            _ => DatabaseError::QueryFailed(self.to_string()),
        }
    }
}
