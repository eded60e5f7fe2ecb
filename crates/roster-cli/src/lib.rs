//! Roster Sync CLI - command-line interface for the roster sync pipeline
//!
//! This crate provides the `roster-sync` binary that ties the client, the
//! pipeline and the PostgreSQL store together.
//!
//! # Examples
//!
//! ```
//! use clap::Parser;
//! use roster_cli::{Command, Config};
//!
//! let config = Config::try_parse_from(["roster-sync", "stats"]).unwrap();
//! assert!(matches!(config.command, Command::Stats));
//! ```

pub mod config;

pub use config::{Command, Config};
