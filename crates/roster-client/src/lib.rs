//! Roster Client - HTTP client for the Wonde school-data API
//!
//! - [`wonde`] - authenticated, paginated access to schools, students and employees
//! - [`roster`] - filtering of upstream people down to core-subject classes
//!
//! # Overview
//!
//! The client handles bearer authentication, `meta.pagination.next` links,
//! retries on transient failures, and normalization of the upstream payload
//! into [`roster_core::SchoolRoster`].

pub mod roster;
pub mod wonde;

pub use roster::RosterBuilder;
pub use wonde::WondeClient;
