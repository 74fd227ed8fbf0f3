//! Command-line parsing, and the top-level download-and-load pipeline.

use std::{num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use tracing::{field, Span};

use crate::common::*;
use crate::decode::decompress_gzip;
use crate::fetch::{download_file, http_client};
use crate::load::{self, LoadOptions, LoadOutcome, LoadReport, DEFAULT_CHUNK_SIZE};
use crate::logging::LogFormat;
use crate::postgres::{self, PgName, PgTableSink, PostgresConfig};
use crate::work_files::WorkFiles;

/// Command-line options.
///
/// This deliberately doesn't derive `Debug`, because it holds a password.
#[derive(Parser)]
#[command(
    name = "tripload",
    version,
    about = "Download a gzipped CSV file and load it into PostgreSQL.",
    after_help = r#"EXAMPLE:
    tripload --user root --password root --host localhost --port 5432 \
        --db ny_taxi --table-name yellow_taxi_trips \
        --url https://example.com/yellow_tripdata_2021-01.csv.gz
"#
)]
pub(crate) struct Opt {
    /// PostgreSQL user name.
    #[arg(long)]
    pub(crate) user: String,

    /// PostgreSQL password.
    #[arg(long)]
    pub(crate) password: String,

    /// PostgreSQL host name or address.
    #[arg(long)]
    pub(crate) host: String,

    /// PostgreSQL port.
    #[arg(long)]
    pub(crate) port: u16,

    /// PostgreSQL database name.
    #[arg(long)]
    pub(crate) db: String,

    /// Destination table, optionally qualified as `schema.table`. Any
    /// existing table with this name is replaced.
    #[arg(long = "table-name", alias = "table_name")]
    pub(crate) table_name: String,

    /// URL of the gzipped CSV file to load.
    #[arg(long)]
    pub(crate) url: Url,

    /// Number of rows to load per transaction.
    #[arg(long = "chunk-size", default_value_t = default_chunk_size())]
    pub(crate) chunk_size: NonZeroUsize,

    /// Exit with an error if any chunk fails to load. By default, we log the
    /// error and exit successfully with the chunks loaded so far.
    #[arg(long = "fail-on-chunk-error")]
    pub(crate) fail_on_chunk_error: bool,

    /// Directory for the downloaded and decompressed files.
    #[arg(long = "work-dir", default_value = ".")]
    pub(crate) work_dir: PathBuf,

    /// One of `pretty`, `compact` or `json`.
    #[arg(long = "log-format", default_value = "pretty")]
    pub(crate) log_format: LogFormat,
}

fn default_chunk_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN)
}

impl Opt {
    /// Our PostgreSQL connection parameters.
    pub(crate) fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            user: self.user.clone(),
            password: self.password.clone(),
            host: self.host.clone(),
            port: self.port,
            db: self.db.clone(),
        }
    }

    /// Options for the loader.
    pub(crate) fn load_options(&self) -> LoadOptions {
        LoadOptions {
            chunk_size: self.chunk_size,
        }
    }
}

/// Download, decompress and load.
#[instrument(level = "info", name = "tripload", skip_all, fields(url = %opt.url, table, db))]
pub(crate) async fn run(opt: Opt) -> Result<()> {
    let table_name = opt.table_name.parse::<PgName>()?;
    let db_url = opt.postgres_config().to_url()?;

    // Fill in our span fields.
    let span = Span::current();
    span.record("table", field::display(&table_name));
    span.record("db", field::display(&db_url));

    let files = WorkFiles::in_dir(&opt.work_dir);

    // Fetch.
    let client = http_client()?;
    let downloaded = download_file(&client, &opt.url, &files.compressed).await?;
    info!(
        "downloaded {} bytes to {}",
        downloaded,
        files.compressed.display()
    );

    // Decode.
    let decompressed = decompress_gzip(&files.compressed, &files.decompressed).await?;
    info!(
        "decompressed {} bytes to {}",
        decompressed,
        files.decompressed.display()
    );

    // Load.
    let mut pg_client = postgres::connect(&db_url).await?;
    let mut sink = PgTableSink::new(&mut pg_client);
    let report = load::run(
        &files.decompressed,
        &table_name,
        &mut sink,
        &opt.load_options(),
    )
    .await;
    finish_load(report, &files, &table_name, opt.fail_on_chunk_error).await
}

/// Clean up after the Loader and decide how we exit.
///
/// If the Loader returned an error, the work files are left in place so they
/// can be inspected, just as when an earlier stage fails.
async fn finish_load(
    report: Result<LoadReport>,
    files: &WorkFiles,
    table_name: &PgName,
    fail_on_chunk_error: bool,
) -> Result<()> {
    let report = report?;
    files.remove().await;

    match report.outcome {
        LoadOutcome::Exhausted => {
            info!("finished loading {}: {}", table_name, report);
            Ok(())
        }
        LoadOutcome::Failed { chunk, error } if fail_on_chunk_error => Err(error
            .context(format!(
                "stopped at chunk {} after loading {} rows into {}",
                chunk, report.rows_loaded, table_name,
            ))),
        LoadOutcome::Failed { .. } => {
            warn!("stopped loading {} early: {}", table_name, report);
            Ok(())
        }
    }
}
