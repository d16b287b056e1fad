//! One-shot migration of legacy `test_environments` rows into the normalized
//! `configurations` table.
//!
//! The back-link column `test_environments.configuration_id` is the only
//! record of progress: a row is done once it is set, so an interrupted run is
//! resumed by running again.

pub mod cli;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod owners;
pub mod reconcile;
pub mod report;
pub mod store;
pub mod transform;

pub use engine::{EngineOptions, LinkMode, MigrationEngine, PageReport, RunSummary};
pub use error::{Aborted, ConfigError, MigrationError};
pub use owners::{OwnerDirectory, OwnerResolution};
