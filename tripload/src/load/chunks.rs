//! Reading a CSV file as a lazy sequence of fixed-size row chunks.

use std::{fs::File, io::Read, path::Path, sync::Arc};

use csv::StringRecord;

use crate::common::*;

/// Up to `chunk_size` rows read from a CSV file.
#[derive(Clone, Debug)]
pub(crate) struct Chunk {
    /// 1-based position of this chunk in the file.
    pub(crate) index: usize,
    /// The header row shared by every chunk of the file.
    pub(crate) columns: Arc<StringRecord>,
    /// Our rows, in file order. Each row remembers its source position.
    pub(crate) rows: Vec<StringRecord>,
}

impl Chunk {
    /// Number of rows in this chunk.
    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Source line of the first row, if any.
    pub(crate) fn first_line(&self) -> Option<u64> {
        self.rows
            .first()
            .and_then(|row| row.position())
            .map(|pos| pos.line())
    }
}

/// A finite iterator over the chunks of a CSV file.
///
/// This consumes the underlying reader as it goes, so it cannot be restarted.
/// Only one chunk is held in memory at a time, and only if the caller keeps it.
pub(crate) struct ChunkReader<R: Read> {
    rdr: csv::Reader<R>,
    columns: Arc<StringRecord>,
    chunk_size: usize,
    next_index: usize,
    done: bool,
}

impl ChunkReader<File> {
    /// Open the CSV file at `path`.
    pub(crate) fn from_path(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        Self::from_reader(file, chunk_size)
            .with_context(|| format!("cannot read CSV file {}", path.display()))
    }
}

impl<R: Read> ChunkReader<R> {
    /// Read CSV data from `rdr`. The header row is read immediately.
    pub(crate) fn from_reader(rdr: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(format_err!("chunk size must be at least 1"));
        }
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(rdr);
        let columns = rdr.headers().context("cannot read CSV header")?.clone();
        if columns.is_empty() {
            return Err(format_err!("CSV data has no header row"));
        }
        Ok(Self {
            rdr,
            columns: Arc::new(columns),
            chunk_size,
            next_index: 1,
            done: false,
        })
    }

    /// The CSV header row.
    pub(crate) fn columns(&self) -> &Arc<StringRecord> {
        &self.columns
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut rows = Vec::with_capacity(self.chunk_size.min(4096));
        while rows.len() < self.chunk_size {
            let mut row = StringRecord::new();
            match self.rdr.read_record(&mut row) {
                Ok(true) => rows.push(row),
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(err) => {
                    // A CSV parse error leaves us without a reliable place to
                    // resume, so this is the end of the sequence.
                    self.done = true;
                    return Some(Err(Error::new(err).context(format!(
                        "cannot read rows for chunk {}",
                        self.next_index
                    ))));
                }
            }
        }

        if rows.is_empty() {
            None
        } else {
            let chunk = Chunk {
                index: self.next_index,
                columns: self.columns.clone(),
                rows,
            };
            self.next_index += 1;
            Some(Ok(chunk))
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    /// Build a CSV file with `rows` data rows.
    fn numbered_csv(rows: usize) -> String {
        let mut csv = String::from("id,pickup_datetime\n");
        for i in 0..rows {
            csv.push_str(&format!("{},2020-01-15 08:30:00\n", i));
        }
        csv
    }

    fn chunk_lens(csv: &str, chunk_size: usize) -> Vec<usize> {
        ChunkReader::from_reader(Cursor::new(csv.to_owned()), chunk_size)
            .unwrap()
            .map(|chunk| chunk.unwrap().len())
            .collect()
    }

    #[test]
    fn splits_250k_rows_into_three_chunks() {
        assert_eq!(
            chunk_lens(&numbered_csv(250_000), 100_000),
            vec![100_000, 100_000, 50_000]
        );
    }

    #[test]
    fn exact_multiple_has_no_empty_trailing_chunk() {
        assert_eq!(chunk_lens(&numbered_csv(20), 10), vec![10, 10]);
    }

    #[test]
    fn header_only_yields_no_chunks() {
        let mut chunks =
            ChunkReader::from_reader(Cursor::new("a,b\n"), 10).unwrap();
        assert_eq!(chunks.columns().len(), 2);
        assert!(chunks.next().is_none());
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(ChunkReader::from_reader(Cursor::new(""), 10).is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(ChunkReader::from_reader(Cursor::new("a\n1\n"), 0).is_err());
    }

    #[test]
    fn chunks_are_numbered_and_remember_lines() {
        let chunks = ChunkReader::from_reader(Cursor::new(numbered_csv(5)), 2)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // Line 1 is the header.
        assert_eq!(
            chunks.iter().map(|c| c.first_line()).collect::<Vec<_>>(),
            vec![Some(2), Some(4), Some(6)]
        );
        assert_eq!(&chunks[2].columns[0], "id");
    }

    #[test]
    fn malformed_row_ends_the_sequence_with_an_error() {
        let csv = "a,b\n1,2\n3,4\n5\n7,8\n";
        let mut chunks = ChunkReader::from_reader(Cursor::new(csv), 2).unwrap();
        assert_eq!(chunks.next().unwrap().unwrap().len(), 2);
        assert!(chunks.next().unwrap().is_err());
        assert!(chunks.next().is_none());
    }

    proptest! {
        #[test]
        fn chunk_boundaries_are_deterministic(
            rows in 0usize..300,
            chunk_size in 1usize..50,
        ) {
            let csv = numbered_csv(rows);
            let first = ChunkReader::from_reader(Cursor::new(csv.clone()), chunk_size)
                .unwrap()
                .map(|chunk| {
                    chunk
                        .unwrap()
                        .rows
                        .iter()
                        .map(|row| row[0].to_owned())
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            let second = ChunkReader::from_reader(Cursor::new(csv), chunk_size)
                .unwrap()
                .map(|chunk| {
                    chunk
                        .unwrap()
                        .rows
                        .iter()
                        .map(|row| row[0].to_owned())
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            prop_assert_eq!(&first, &second);

            // `ceil(rows / chunk_size)` chunks, every one full but the last.
            prop_assert_eq!(first.len(), (rows + chunk_size - 1) / chunk_size);
            for chunk in first.iter().rev().skip(1) {
                prop_assert_eq!(chunk.len(), chunk_size);
            }

            // Rows come out in file order.
            let ids = first.concat();
            let expected = (0..rows).map(|i| i.to_string()).collect::<Vec<_>>();
            prop_assert_eq!(ids, expected);
        }
    }
}
