//! Settings for a migration run.
//!
//! Values come from a key lookup so the binary can layer the process
//! environment over an optional `.env` file and tests can pass a plain map.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::LinkMode;
use crate::error::ConfigError;

pub const DEFAULT_OWNERS_FILE: &str = "admin_users.csv";
pub const DEFAULT_FALLBACK_OWNER: i64 = 1;
pub const DEFAULT_PAUSE_MS: u64 = 1000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Store credentials, kept as discrete fields until a connection string is needed.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl DbConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }

    /// Same as `connection_string` with the password masked, for logs.
    pub fn redacted(&self) -> String {
        format!(
            "{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.name
        )
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSettings {
    pub owners_file: PathBuf,
    pub fallback_owner: i64,
    pub pause: Duration,
    pub link_mode: LinkMode,
    pub busy_timeout: Duration,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            owners_file: PathBuf::from(DEFAULT_OWNERS_FILE),
            fallback_owner: DEFAULT_FALLBACK_OWNER,
            pause: Duration::from_millis(DEFAULT_PAUSE_MS),
            link_mode: LinkMode::default(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub db: DbConfig,
    pub migration: MigrationSettings,
}

impl Settings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = DbConfig {
            host: required(&lookup, "DB_HOST")?,
            port: parse_required(&lookup, "DB_PORT")?,
            user: required(&lookup, "DB_USER")?,
            // Present but possibly empty.
            password: lookup("DB_PASSWORD").ok_or(ConfigError::Missing { key: "DB_PASSWORD" })?,
            name: required(&lookup, "DB_NAME")?,
        };

        let defaults = MigrationSettings::default();
        let migration = MigrationSettings {
            owners_file: optional(&lookup, "OWNERS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.owners_file),
            fallback_owner: parse_optional(&lookup, "FALLBACK_OWNER_ID")?
                .unwrap_or(defaults.fallback_owner),
            pause: parse_optional::<u64, _>(&lookup, "MIGRATION_PAUSE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.pause),
            link_mode: parse_optional(&lookup, "MIGRATION_LINK_MODE")?
                .unwrap_or(defaults.link_mode),
            busy_timeout: parse_optional::<u64, _>(&lookup, "DB_BUSY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
        };

        Ok(Self { db, migration })
    }

    /// Process environment first, then the env file.
    pub fn from_env(env_file: &Path) -> Result<Self, ConfigError> {
        let file_vars = load_env_file(env_file)?;
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }
}

fn optional<F>(lookup: &F, key: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or(ConfigError::Missing { key })
}

fn parse_optional<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
    }
}

fn parse_required<T, F>(lookup: &F, key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    parse_optional(lookup, key)?.ok_or(ConfigError::Missing { key })
}

/// Reads a dotenv file. A missing file yields no variables.
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_env_file(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no env file");
            Ok(HashMap::new())
        }
        Err(source) => Err(ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn parse_env_file(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw in text.lines() {
        let t = raw.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        let t = t.strip_prefix("export ").unwrap_or(t);
        let Some((key, value)) = t.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    vars
}

fn unquote(v: &str) -> &str {
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}
