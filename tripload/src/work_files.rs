//! Intermediate files written while loading.

use std::{
    io,
    path::{Path, PathBuf},
};

use crate::common::*;
use crate::decode::default_dest_path;

/// The downloaded file, relative to our work directory.
const COMPRESSED_FILE_NAME: &str = "output.csv.gz";

/// Where we put the downloaded and decompressed files.
#[derive(Clone, Debug)]
pub(crate) struct WorkFiles {
    /// The gzipped file, exactly as downloaded.
    pub(crate) compressed: PathBuf,
    /// The decompressed CSV file.
    pub(crate) decompressed: PathBuf,
}

impl WorkFiles {
    /// Work files inside `dir`. Nothing is created yet.
    pub(crate) fn in_dir(dir: &Path) -> Self {
        let compressed = dir.join(COMPRESSED_FILE_NAME);
        let decompressed = default_dest_path(&compressed);
        Self {
            compressed,
            decompressed,
        }
    }

    /// Delete our files. Files that don't exist are skipped, and other errors
    /// are only logged, because by now the real work is done.
    pub(crate) async fn remove(&self) {
        for path in [&self.compressed, &self.decompressed] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("could not remove {}: {}", path.display(), err),
            }
        }
    }
}
