//! Subcommand handlers.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use wayfare_auth::AuthStatus;
use wayfare_calendar::RestaurantReservation;
use wayfare_core::{Config, Trip};
use wayfare_sharing::{Lookup, Permission};

use crate::cli::{AuthAction, ConfigAction, ShareAction, SyncTarget};
use crate::context::AppContext;

pub async fn auth(ctx: &AppContext, action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login => {
            if ctx.calendar.initialize().await {
                println!("Already signed in.");
                return Ok(());
            }
            println!("Opening your browser to sign in with Google...");
            ctx.calendar
                .authenticate()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Signed in.");
        }
        AuthAction::Logout => {
            ctx.calendar.logout();
            println!("Signed out.");
        }
        AuthAction::Status => {
            let status = ctx.session.initialize().await;
            match status {
                AuthStatus::Authenticated => println!("Signed in."),
                AuthStatus::Unauthenticated => println!("Not signed in."),
                other => println!("{:?}", other),
            }
        }
    }
    Ok(())
}

fn read_trip(path: &Path) -> Result<Trip> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trip file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse trip file {}", path.display()))
}

pub async fn sync(ctx: &AppContext, target: SyncTarget) -> Result<()> {
    ctx.calendar.initialize().await;

    match target {
        SyncTarget::Trip { file } => {
            let trip = read_trip(&file)?;
            let ids = ctx
                .calendar
                .sync_trip(&trip)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Added {} events for \"{}\":", ids.len(), trip.title);
            for id in ids {
                println!("  {}", id);
            }
        }
        SyncTarget::Restaurant {
            name,
            date,
            time,
            address,
            trip_title,
        } => {
            let reservation = RestaurantReservation {
                name,
                date,
                time,
                address,
                trip_title,
            };
            let id = ctx
                .calendar
                .sync_restaurant(&reservation)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Added reservation at {} ({})", reservation.name, id);
        }
    }
    Ok(())
}

pub async fn share(ctx: &AppContext, action: ShareAction) -> Result<()> {
    let sharing = &ctx.sharing;
    match action {
        ShareAction::Add {
            trip_id,
            email,
            permissions,
        } => {
            let permissions = if permissions.is_empty() {
                Permission::defaults()
            } else {
                permissions.into_iter().collect::<BTreeSet<_>>()
            };
            let grant = sharing
                .share(&trip_id, &email, permissions)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let granted: Vec<&str> = grant.permissions.iter().map(Permission::as_str).collect();
            println!(
                "Shared {} with {} collaborator(s) [{}]",
                trip_id,
                grant.shared_with.len(),
                granted.join(", ")
            );
        }
        ShareAction::Revoke { trip_id, email } => {
            match sharing
                .revoke(&trip_id, &email)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?
            {
                Some(grant) => println!(
                    "{} is still shared with {} collaborator(s)",
                    trip_id,
                    grant.shared_with.len()
                ),
                None => println!("{} is no longer shared", trip_id),
            }
        }
        ShareAction::List { email } => match sharing.list_shared_trips(&email).await {
            Lookup::Fresh(trips) => print_trips(&trips),
            Lookup::Degraded {
                stale,
                cached_at_ms,
                reason,
            } => {
                let cached_at = chrono::DateTime::from_timestamp_millis(cached_at_ms)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| cached_at_ms.to_string());
                eprintln!("Offline ({}); showing trips cached at {}", reason, cached_at);
                print_trips(&stale);
            }
            Lookup::Failed(e) => anyhow::bail!(e.user_message()),
        },
        ShareAction::CanEdit { trip_id, email } => {
            let allowed = sharing
                .can_edit(&trip_id, &email)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", if allowed { "yes" } else { "no" });
        }
        ShareAction::Collaborators { trip_id } => {
            let emails = sharing
                .collaborators(&trip_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            if emails.is_empty() {
                println!("{} is not shared", trip_id);
            }
            for email in emails {
                println!("{}", email);
            }
        }
    }
    Ok(())
}

fn print_trips(trips: &[Trip]) {
    if trips.is_empty() {
        println!("No shared trips.");
    }
    for trip in trips {
        println!(
            "{}  {}  {} → {}",
            trip.id, trip.title, trip.start_date, trip.end_date
        );
    }
}

/// Handle `config` subcommands. These run without building an `AppContext`.
pub fn config(config: &Config, path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Check => {
            let result = config.validate();
            for warning in &result.warnings {
                println!("warning: {}", warning);
            }
            for error in &result.errors {
                println!("error: {}", error);
            }
            if !result.is_valid() {
                anyhow::bail!("Configuration has {} error(s)", result.errors.len());
            }
            println!("Configuration OK.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_read_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trip.json");
        std::fs::write(
            &path,
            r#"{
                "id": "lisbon",
                "title": "Lisbon",
                "description": "",
                "startDate": "2025-05-01",
                "endDate": "2025-05-04",
                "budget": 1200,
                "destinations": [],
                "flights": [],
                "hotels": [],
                "status": "planned",
                "sharedWith": [],
                "createdBy": "john@example.com",
                "lastModified": ""
            }"#,
        )
        .unwrap();

        let trip = read_trip(&path).unwrap();

        assert_eq!(trip.id, "lisbon");
        assert!(read_trip(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_config_check_reports_errors() {
        let mut cfg = Config::default();
        assert!(config(&cfg, Path::new("config.toml"), ConfigAction::Check).is_ok());

        cfg.google.scopes.clear();
        assert!(config(&cfg, Path::new("config.toml"), ConfigAction::Check).is_err());
    }
}
