//! SQLite cache of the last successful shared-trip lookup per collaborator.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use wayfare_core::{RusqliteErrorExt, Trip};

use crate::error::SharingError;

const SCHEMA_VERSION: i32 = 1;

/// Trips served the last time the lookup succeeded.
#[derive(Debug, Clone)]
pub struct CachedTrips {
    pub trips: Vec<Trip>,
    pub cached_at_ms: i64,
}

pub struct TripCache {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> SharingError {
    SharingError::Cache(e.into_database_error())
}

impl TripCache {
    /// Open or create the cache database.
    pub fn open(path: &Path) -> Result<Self, SharingError> {
        if let Some(parent) = path.parent() {
            // Connection::open reports the missing directory otherwise
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, SharingError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, SharingError> {
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), SharingError> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            [],
        )
        .map_err(db_err)?;

        let version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            tracing::warn!(
                "Trip cache schema v{} is newer than supported v{}",
                version,
                SCHEMA_VERSION
            );
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS lookups (
                email TEXT PRIMARY KEY,
                cached_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS shared_trips (
                email TEXT NOT NULL,
                position INTEGER NOT NULL,
                trip_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (email, position),
                FOREIGN KEY (email) REFERENCES lookups(email)
            );

            CREATE INDEX IF NOT EXISTS idx_shared_trips_email ON shared_trips(email);",
        )
        .map_err(db_err)?;

        if version == 0 {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(db_err)?;
        }

        Ok(())
    }

    /// Replace the cached result for `email`.
    pub fn store(&self, email: &str, trips: &[Trip], cached_at_ms: i64) -> Result<(), SharingError> {
        let bodies = trips
            .iter()
            .map(|t| serde_json::to_string(t).map(|body| (t.id.as_str(), body)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        tx.execute("DELETE FROM shared_trips WHERE email = ?1", params![email])
            .map_err(db_err)?;
        tx.execute(
            "INSERT INTO lookups (email, cached_at) VALUES (?1, ?2)
             ON CONFLICT(email) DO UPDATE SET cached_at = excluded.cached_at",
            params![email, cached_at_ms],
        )
        .map_err(db_err)?;

        for (position, (trip_id, body)) in bodies.iter().enumerate() {
            tx.execute(
                "INSERT INTO shared_trips (email, position, trip_id, body) VALUES (?1, ?2, ?3, ?4)",
                params![email, position as i64, trip_id, body],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        tracing::debug!("Cached {} shared trips for {}", trips.len(), email);
        Ok(())
    }

    /// Last cached result for `email`, or `None` if it was never cached.
    pub fn load(&self, email: &str) -> Result<Option<CachedTrips>, SharingError> {
        let conn = self.conn.lock();

        let cached_at_ms: Option<i64> = conn
            .query_row(
                "SELECT cached_at FROM lookups WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        let Some(cached_at_ms) = cached_at_ms else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT body FROM shared_trips WHERE email = ?1 ORDER BY position")
            .map_err(db_err)?;
        let bodies = stmt
            .query_map(params![email], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let trips = bodies
            .iter()
            .map(|body| serde_json::from_str(body))
            .collect::<Result<Vec<Trip>, _>>()?;

        Ok(Some(CachedTrips {
            trips,
            cached_at_ms,
        }))
    }
}
