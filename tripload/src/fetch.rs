//! Downloading the source file over HTTP(S).

use std::{io, path::Path};

use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::StreamReader;

use crate::common::*;

/// How much of the response body we read at a time.
const DOWNLOAD_BUFFER_SIZE: usize = 8 * 1024;

/// Build the HTTP client used for downloads.
///
/// Requires a RusTLS crypto provider to be installed.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("could not create HTTP client")
}

/// Download `url` to `dest`, replacing anything already there. Returns the
/// number of bytes written.
///
/// The body is streamed to disk, so files larger than memory are fine. All
/// errors are reported as [`IngestError::Transfer`].
#[instrument(level = "debug", skip(client), fields(url = %url, dest = %dest.display()))]
pub(crate) async fn download_file(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
) -> Result<u64> {
    download_file_helper(client, url, dest)
        .await
        .map_err(|err| IngestError::Transfer(err).into())
}

async fn download_file_helper(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
) -> Result<u64> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("could not fetch {}", url))?
        .error_for_status()
        .with_context(|| format!("could not fetch {}", url))?;
    if let Some(len) = response.content_length() {
        debug!("server reports {} bytes", len);
    }

    let stream = response
        .bytes_stream()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
        .boxed();
    let mut rdr = StreamReader::new(stream);
    let mut file = fs::File::create(dest)
        .await
        .with_context(|| format!("cannot create {}", dest.display()))?;

    let mut buf = vec![0; DOWNLOAD_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let count = rdr
            .read(&mut buf)
            .await
            .with_context(|| format!("error reading response from {}", url))?;
        if count == 0 {
            break;
        }
        file.write_all(&buf[..count])
            .await
            .with_context(|| format!("error writing to {}", dest.display()))?;
        written += count as u64;
    }
    file.flush()
        .await
        .with_context(|| format!("error writing to {}", dest.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("error writing to {}", dest.display()))?;

    debug!("downloaded {} bytes", written);
    Ok(written)
}
