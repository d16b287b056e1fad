//! Error types for configuration, store and page failures.
//!
//! Every variant maps to a stable machine code that ends up in the result
//! envelope printed by the binary.

use std::fmt;
use std::path::PathBuf;

/// Startup failures. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: &'static str },

    #[error("invalid value for {key} ({value:?}): {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read env file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read owner source {}: {source}", .path.display())]
    OwnerSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open database: {message}")]
    StoreOpen { message: String },

    #[error("database schema is not migratable: {message}")]
    Schema { message: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Missing { .. } | ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::EnvFile { .. } => "config_invalid",
            ConfigError::OwnerSource { .. } => "owners_unreadable",
            ConfigError::StoreOpen { .. } => "db_open_failed",
            ConfigError::Schema { .. } => "schema_invalid",
        }
    }
}

/// Step of a run in which a store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Count,
    Begin,
    Fetch,
    Persist,
    Link,
    Commit,
    Sweep,
    Reconcile,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Count => "count",
            Phase::Begin => "begin",
            Phase::Fetch => "fetch",
            Phase::Persist => "persist",
            Phase::Link => "link",
            Phase::Commit => "commit",
            Phase::Sweep => "sweep",
            Phase::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("{phase} failed{}: {source}", page_suffix(.page))]
    Store {
        phase: Phase,
        page: Option<u64>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("page {page}: linked {linked} source rows, expected {expected}")]
    LinkMismatch {
        page: u64,
        expected: usize,
        linked: usize,
    },
}

impl MigrationError {
    pub fn store(phase: Phase, page: Option<u64>) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| MigrationError::Store {
            phase,
            page,
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::Store { phase, .. } => match phase {
                Phase::Begin => "db_tx_failed",
                Phase::Count | Phase::Fetch => "db_query_failed",
                Phase::Persist => "db_insert_failed",
                Phase::Link | Phase::Sweep | Phase::Reconcile => "db_update_failed",
                Phase::Commit => "db_commit_failed",
            },
            MigrationError::LinkMismatch { .. } => "link_mismatch",
        }
    }

    pub fn page(&self) -> Option<u64> {
        match self {
            MigrationError::Store { page, .. } => *page,
            MigrationError::LinkMismatch { page, .. } => Some(*page),
        }
    }
}

fn page_suffix(page: &Option<u64>) -> String {
    match page {
        Some(n) => format!(" on page {n}"),
        None => String::new(),
    }
}

/// Terminal failure of a run. Pages committed before the failure stay durable.
#[derive(Debug, thiserror::Error)]
#[error("migration aborted after {processed} rows in {pages_committed} committed pages: {source}")]
pub struct Aborted {
    pub processed: u64,
    pub pages_committed: u64,
    #[source]
    pub source: MigrationError,
}
