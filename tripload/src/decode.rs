//! Decompressing the downloaded gzip file.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::read::MultiGzDecoder;

use crate::common::*;
use crate::tokio_glue::spawn_blocking;

/// Buffer size for reading compressed data and writing decompressed data.
const DECODE_BUFFER_SIZE: usize = 64 * 1024;

/// Decompress the gzip file at `src` into `dest`, replacing anything already
/// there. Returns the number of decompressed bytes.
///
/// Concatenated gzip members are decompressed in order. An empty or invalid
/// source file is reported as [`IngestError::Decode`], as is any I/O error.
#[instrument(level = "debug", fields(src = %src.display(), dest = %dest.display()))]
pub(crate) async fn decompress_gzip(src: &Path, dest: &Path) -> Result<u64> {
    let src = src.to_owned();
    let dest = dest.to_owned();
    let written = spawn_blocking(move || decompress_gzip_sync(&src, &dest))
        .await
        .map_err(IngestError::Decode)?;
    debug!("decompressed {} bytes", written);
    Ok(written)
}

fn decompress_gzip_sync(src: &Path, dest: &Path) -> Result<u64> {
    let src_file =
        File::open(src).with_context(|| format!("cannot open {}", src.display()))?;
    let src_len = src_file
        .metadata()
        .with_context(|| format!("cannot read metadata for {}", src.display()))?
        .len();
    if src_len == 0 {
        return Err(format_err!("{} is empty", src.display()));
    }

    let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(
        DECODE_BUFFER_SIZE,
        src_file,
    ));
    let dest_file = File::create(dest)
        .with_context(|| format!("cannot create {}", dest.display()))?;
    let mut wtr = BufWriter::with_capacity(DECODE_BUFFER_SIZE, dest_file);
    let written = io::copy(&mut decoder, &mut wtr)
        .with_context(|| format!("cannot decompress {}", src.display()))?;
    wtr.flush()
        .with_context(|| format!("error writing to {}", dest.display()))?;
    Ok(written)
}

/// The path we'd decompress `src` to by default: `src` minus its `.gz`
/// extension.
pub(crate) fn default_dest_path(src: &Path) -> PathBuf {
    if src.extension().map_or(false, |ext| ext == "gz") {
        src.with_extension("")
    } else {
        let mut name = src.as_os_str().to_owned();
        name.push(".out");
        PathBuf::from(name)
    }
}

#[test]
fn default_dest_path_strips_gz() {
    assert_eq!(
        default_dest_path(Path::new("work/output.csv.gz")),
        Path::new("work/output.csv")
    );
    assert_eq!(
        default_dest_path(Path::new("work/output")),
        Path::new("work/output.out")
    );
}

#[cfg(test)]
mod test {
    use std::fs;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(vec![], Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn decompress_bytes(compressed: &[u8]) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("output.csv.gz");
        let dest = default_dest_path(&src);
        fs::write(&src, compressed).unwrap();
        let written = decompress_gzip(&src, &dest).await?;
        let output = fs::read(&dest).unwrap();
        assert_eq!(written, output.len() as u64);
        Ok(output)
    }

    fn assert_decode_error(err: &Error) {
        assert!(
            matches!(
                err.downcast_ref::<IngestError>(),
                Some(IngestError::Decode(_))
            ),
            "expected decode error, got {:#}",
            err
        );
    }

    #[tokio::test]
    async fn decompresses_csv() {
        let csv = b"VendorID,tpep_pickup_datetime\n1,2021-01-01 00:30:10\n".repeat(5000);
        assert_eq!(decompress_bytes(&gzip(&csv)).await.unwrap(), csv);
    }

    #[tokio::test]
    async fn decompresses_concatenated_members() {
        let mut compressed = gzip(b"a,b\n1,2\n");
        compressed.extend(gzip(b"3,4\n"));
        assert_eq!(
            decompress_bytes(&compressed).await.unwrap(),
            b"a,b\n1,2\n3,4\n"
        );
    }

    #[tokio::test]
    async fn rejects_data_that_is_not_gzip() {
        let err = decompress_bytes(b"a,b\n1,2\n").await.unwrap_err();
        assert_decode_error(&err);
    }

    #[tokio::test]
    async fn rejects_truncated_data() {
        let compressed = gzip(&b"a,b\n1,2\n".repeat(1000));
        let err = decompress_bytes(&compressed[..compressed.len() / 2])
            .await
            .unwrap_err();
        assert_decode_error(&err);
    }

    #[tokio::test]
    async fn rejects_empty_file() {
        let err = decompress_bytes(b"").await.unwrap_err();
        assert_decode_error(&err);
    }

    #[tokio::test]
    async fn missing_source_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = decompress_gzip(
            &dir.path().join("missing.csv.gz"),
            &dir.path().join("missing.csv"),
        )
        .await
        .unwrap_err();
        assert_decode_error(&err);
    }
}
