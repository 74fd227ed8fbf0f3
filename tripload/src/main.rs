//! Download a gzipped CSV file and load it into PostgreSQL, one chunk at a
//! time.

#![warn(rust_2018_idioms, unused_extern_crates, clippy::all)]

use clap::Parser;

mod cmd;
mod decode;
mod errors;
mod fetch;
mod load;
mod logging;
mod postgres;
mod separator;
mod tls;
mod tokio_glue;
mod url_with_hidden_password;
mod work_files;

/// Definitions included by all the files in this crate.
///
/// This forms the dialect of Rust we use for implementing the pipeline, with
/// an emphasis on `tokio` and structured logging.
#[allow(unused_imports)]
pub(crate) mod common {
    pub(crate) use anyhow::{format_err, Context as _, Error, Result};
    pub(crate) use futures::{Future, FutureExt, Stream, StreamExt, TryStreamExt};
    pub(crate) use tracing::{
        debug, debug_span, error, info, instrument, trace, warn, Instrument,
    };
    pub(crate) use url::Url;

    pub(crate) use crate::{
        errors::IngestError, url_with_hidden_password::UrlWithHiddenPassword,
    };
}

use crate::common::*;

fn main() -> Result<()> {
    let opt = cmd::Opt::parse();
    logging::init_logging(opt.log_format)?;
    tls::install_crypto_provider();

    // Every stage runs to completion before the next one starts, so a single
    // thread is all we need. The PostgreSQL connection driver runs as a task
    // on this same thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not start tokio runtime")?;
    runtime.block_on(cmd::run(opt))
}
