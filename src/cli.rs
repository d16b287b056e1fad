use std::path::PathBuf;

use clap::Parser;

use crate::cursor::DEFAULT_PAGE_SIZE;

/// Migrate test_environments rows into configurations.
#[derive(Debug, Parser)]
#[command(name = "envconf-migrate", version, about, long_about = None)]
pub struct Cli {
    /// Rows per page. Zero, negative or absent means 200.
    #[arg(
        long = "batch-size",
        visible_alias = "page-size",
        alias = "batchSize",
        allow_negative_numbers = true
    )]
    pub batch_size: Option<i64>,

    /// Optional dotenv file with DB_* settings. Ignored when missing.
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,
}

impl Cli {
    pub fn page_size(&self) -> usize {
        page_size_or_default(self.batch_size)
    }
}

pub fn page_size_or_default(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(DEFAULT_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}
