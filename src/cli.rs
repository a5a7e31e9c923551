//! Command-line interface definition.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use wayfare_sharing::Permission;

/// wayfare - plan trips, share them, put them on your calendar
#[derive(Debug, Parser)]
#[command(name = "wayfare")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "WAYFARE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Google sign-in
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Push trips and bookings to Google Calendar
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },

    /// Share trips with collaborators
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum AuthAction {
    /// Sign in through the browser
    Login,
    /// Forget stored tokens
    Logout,
    /// Show whether a usable sign-in is stored
    Status,
}

#[derive(Debug, Subcommand)]
pub enum SyncTarget {
    /// Create calendar events for every part of a trip
    Trip {
        /// Trip JSON file
        file: PathBuf,
    },

    /// Create a two-hour event for a restaurant booking
    Restaurant {
        #[arg(long)]
        name: String,

        /// Reservation date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Reservation time (HH:MM)
        #[arg(long, value_parser = parse_time)]
        time: NaiveTime,

        #[arg(long)]
        address: String,

        /// Trip the booking belongs to
        #[arg(long)]
        trip_title: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ShareAction {
    /// Share a trip with someone
    Add {
        trip_id: String,
        email: String,

        /// Permission to grant (repeatable; defaults to view and edit)
        #[arg(long = "permission", short = 'p', action = clap::ArgAction::Append)]
        permissions: Vec<Permission>,
    },

    /// Stop sharing a trip with someone
    Revoke { trip_id: String, email: String },

    /// Trips shared with an email address
    List { email: String },

    /// Check whether someone may edit a trip
    CanEdit { trip_id: String, email: String },

    /// Everyone a trip is shared with
    Collaborators { trip_id: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file
    Check,
    /// Print the configuration file path
    Path,
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| format!("expected HH:MM: {}", e))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_share_add_permissions() {
        let cli = Cli::try_parse_from([
            "wayfare", "share", "add", "lisbon", "jane@example.com", "-p", "view",
        ])
        .unwrap();

        match cli.command {
            Command::Share {
                action:
                    ShareAction::Add {
                        trip_id,
                        permissions,
                        ..
                    },
            } => {
                assert_eq!(trip_id, "lisbon");
                assert_eq!(permissions, vec![Permission::View]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_restaurant_time_formats() {
        assert_eq!(
            parse_time("19:30").unwrap(),
            NaiveTime::from_hms_opt(19, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time("21:15:00").unwrap(),
            NaiveTime::from_hms_opt(21, 15, 0).unwrap()
        );
        assert!(parse_time("7pm").is_err());
    }

    #[test]
    fn test_unknown_permission_rejected() {
        assert!(Cli::try_parse_from([
            "wayfare", "share", "add", "lisbon", "jane@example.com", "-p", "admin",
        ])
        .is_err());
    }
}
