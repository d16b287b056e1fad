use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;

use envconf_migrate::cli::Cli;
use envconf_migrate::config::Settings;
use envconf_migrate::logging::{init_logging, LogFormat};
use envconf_migrate::{report, store, ConfigError, EngineOptions, MigrationEngine, OwnerDirectory};

const EXIT_ABORTED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    init_logging(format);

    let cli = Cli::parse();
    tracing::info!("migrating data from test_environments to configurations");

    let settings = match Settings::from_env(&cli.env_file) {
        Ok(v) => v,
        Err(e) => return config_failure(&e),
    };
    tracing::info!(db = %settings.db.redacted(), "connecting");

    let conn = match store::open_db(&settings.db, settings.migration.busy_timeout) {
        Ok(c) => c,
        Err(e) => {
            return config_failure(&ConfigError::StoreOpen {
                message: format!("{e:#}"),
            })
        }
    };
    if let Err(e) = store::ensure_schema(&conn) {
        return config_failure(&ConfigError::Schema {
            message: format!("{e:#}"),
        });
    }
    tracing::info!("db connection successful");

    let owners = match OwnerDirectory::load(
        &settings.migration.owners_file,
        settings.migration.fallback_owner,
    ) {
        Ok(v) => v,
        Err(e) => return config_failure(&e),
    };

    let options = EngineOptions {
        page_size: cli.page_size(),
        pause: settings.migration.pause,
        link_mode: settings.migration.link_mode,
    };
    let mut engine = MigrationEngine::new(&conn, &owners, options);

    match engine.run() {
        Ok(summary) => {
            tracing::info!(
                processed = summary.processed,
                fallback_rows = summary.fallback_rows,
                "migration completed successfully"
            );
            emit(&report::completed(&summary));
            ExitCode::SUCCESS
        }
        Err(aborted) => {
            emit(&report::aborted(&aborted));
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

fn config_failure(error: &ConfigError) -> ExitCode {
    tracing::error!(code = error.code(), "{error}");
    emit(&report::config_failed(error));
    ExitCode::from(EXIT_CONFIG)
}

fn emit(value: &serde_json::Value) {
    let mut stdout = io::stdout();
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}
