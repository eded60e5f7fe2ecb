//! Roster Core - domain types, error handling, configuration and the sync pipeline.
//!
//! The pipeline turns a filtered upstream roster into flat, id-linked rows:
//!
//! - [`lookup`] - Lookup Cache over the Country/State/LearningArea/YearLevel tables
//! - [`resolver`] - school existence check and upstream → local id translation
//! - [`batch`] - chunked, sequential batch writes
//! - [`sync`] - the stage-by-stage orchestrator
//! - [`invocation`] - the `{statusCode, body}` request/response contract

pub mod batch;
pub mod config;
pub mod error;
pub mod invocation;
pub mod lookup;
pub mod memory;
pub mod models;
pub mod resolver;
pub mod subject;
pub mod sync;
pub mod traits;

pub use batch::{batch_persist, BatchOutcome, BatchTiming};
pub use config::{
    default_config_path, load_config, DbConfig, FileConfig, HttpConfig, Region, SyncConfig,
    MAX_BATCH_SIZE,
};
pub use error::AppError;
pub use invocation::{handle_save_request, InvocationResponse, RequestClassroom, SaveSchoolRequest};
pub use lookup::{load_lookups, seed_lookups, LookupTables};
pub use memory::InMemoryStore;
pub use models::{Record, SchoolRoster, Table, UpstreamSchool};
pub use resolver::{resolve_school, IdMap, SchoolResolution};
pub use subject::LearningAreaKind;
pub use sync::{SyncError, SyncReport, SyncService, SyncStage};
pub use traits::{RecordStore, RosterSource};
