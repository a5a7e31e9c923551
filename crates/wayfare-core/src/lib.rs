pub mod clock;
pub mod config;
pub mod error;
pub mod trip;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, FirestoreConfig, GoogleConfig, LoggingConfig, SharingBackend, SharingConfig,
    StorageConfig, TokenBackend, ValidationResult,
};
pub use error::{
    AuthError, DatabaseError, NetworkError, ReqwestErrorExt, RusqliteErrorExt, StorageError,
};
pub use trip::{
    CabinClass, Destination, DestinationCategory, Flight, FlightLeg, GeoPoint, Hotel, Trip,
    TripStatus,
};

use anyhow::Result;

/// Initialize logging.
///
/// `RUST_LOG` wins over `default_filter`; an unparsable filter falls back to `info`.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("Wayfare core initialized");
    Ok(())
}
