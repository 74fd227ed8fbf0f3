//! Loading a CSV file into a database table, one chunk at a time.
//!
//! The table is created from the first chunk. Each chunk is then normalized
//! and appended in its own transaction. Failures after the table exists stop
//! the load but are not returned as errors: chunks that were already
//! committed stay committed, and the caller gets a [`LoadReport`] saying
//! where we stopped.

use std::{
    fmt,
    num::NonZeroUsize,
    path::Path,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use csv::StringRecord;

use crate::common::*;
use crate::postgres::{PgCreateTable, PgName, PgScalarDataType};

mod chunks;
mod infer;
mod normalize;

pub(crate) use self::chunks::{Chunk, ChunkReader};
use self::infer::infer_table;
use self::normalize::normalize_chunk;

/// Default number of rows per chunk.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Somewhere we can create a table and append chunks to it.
#[async_trait]
pub(crate) trait TableSink: Send {
    /// Drop any existing table named `table.name`, and create `table`.
    async fn create_table(&mut self, table: &PgCreateTable) -> Result<()>;

    /// Append all the rows in `chunk` to `table` as a single transaction.
    async fn append_chunk(&mut self, table: &PgCreateTable, chunk: &Chunk)
        -> Result<()>;
}

/// Options for [`run`].
#[derive(Clone, Debug)]
pub(crate) struct LoadOptions {
    /// Maximum rows per chunk.
    pub(crate) chunk_size: NonZeroUsize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// How a load ended.
#[derive(Debug)]
pub(crate) enum LoadOutcome {
    /// We loaded every row in the file.
    Exhausted,
    /// Chunk number `chunk` failed, and we stopped there.
    Failed {
        /// 1-based index of the chunk that failed.
        chunk: usize,
        /// What went wrong.
        error: Error,
    },
}

/// What [`run`] accomplished.
#[derive(Debug)]
pub(crate) struct LoadReport {
    /// Chunks committed to the database.
    pub(crate) chunks_loaded: usize,
    /// Rows committed to the database.
    pub(crate) rows_loaded: u64,
    /// Whether we finished the file.
    pub(crate) outcome: LoadOutcome,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows in {} chunks",
            self.rows_loaded, self.chunks_loaded
        )?;
        if let LoadOutcome::Failed { chunk, .. } = &self.outcome {
            write!(f, " (stopped at chunk {})", chunk)?;
        }
        Ok(())
    }
}

/// Derive a table named `table_name` from `first_chunk` and create it,
/// replacing any existing table with that name.
#[instrument(level = "debug", skip_all, fields(table = %table_name))]
pub(crate) async fn initialize_schema<S>(
    first_chunk: &Chunk,
    table_name: &PgName,
    sink: &mut S,
) -> Result<PgCreateTable>
where
    S: TableSink + ?Sized,
{
    let table = infer_table(table_name, &first_chunk.columns, &first_chunk.rows)
        .map_err(IngestError::Schema)?;
    debug!("creating destination table:\n{}", table);
    sink.create_table(&table)
        .await
        .map_err(IngestError::Schema)?;
    Ok(table)
}

/// Normalize `chunk` and append it to `table`, returning how long that took.
#[instrument(level = "debug", skip_all, fields(chunk = chunk.index, rows = chunk.len()))]
pub(crate) async fn load_chunk<S>(
    mut chunk: Chunk,
    table: &PgCreateTable,
    sink: &mut S,
) -> Result<Duration>
where
    S: TableSink + ?Sized,
{
    let start = Instant::now();
    trace!("chunk starts on line {:?}", chunk.first_line());
    let timestamp_columns = table.column_indices_of_type(PgScalarDataType::Timestamp);
    normalize_chunk(&mut chunk, &timestamp_columns)?;
    sink.append_chunk(table, &chunk)
        .await
        .map_err(IngestError::Append)?;
    Ok(start.elapsed())
}

/// Load the CSV file at `source_path` into `table_name`.
///
/// Only errors opening the file, reading the header or first chunk, or
/// creating the table are returned. See the module docs for everything else.
#[instrument(level = "info", skip(sink, options), fields(chunk_size = options.chunk_size.get()))]
pub(crate) async fn run<S>(
    source_path: &Path,
    table_name: &PgName,
    sink: &mut S,
    options: &LoadOptions,
) -> Result<LoadReport>
where
    S: TableSink + ?Sized,
{
    let chunks = ChunkReader::from_path(source_path, options.chunk_size.get())
        .map_err(IngestError::Schema)?;
    let columns = chunks.columns().clone();
    run_chunks(&columns, chunks, table_name, sink).await
}

/// Load a sequence of `chunks` with the header `columns` into `table_name`.
///
/// This is the body of [`run`], split out so it doesn't care where chunks
/// come from.
pub(crate) async fn run_chunks<I, S>(
    columns: &StringRecord,
    mut chunks: I,
    table_name: &PgName,
    sink: &mut S,
) -> Result<LoadReport>
where
    I: Iterator<Item = Result<Chunk>>,
    S: TableSink + ?Sized,
{
    // The first chunk decides our schema. If there isn't one, create the
    // table from the header alone.
    let first_chunk = match chunks.next() {
        Some(Ok(chunk)) => chunk,
        Some(Err(err)) => return Err(IngestError::Schema(err).into()),
        None => Chunk {
            index: 1,
            columns: columns.clone().into(),
            rows: vec![],
        },
    };
    let table = initialize_schema(&first_chunk, table_name, sink).await?;

    let mut report = LoadReport {
        chunks_loaded: 0,
        rows_loaded: 0,
        outcome: LoadOutcome::Exhausted,
    };
    if first_chunk.rows.is_empty() {
        info!("no data rows found; created empty table {}", table_name);
        return Ok(report);
    }

    let mut next_chunk = Some(Ok(first_chunk));
    while let Some(chunk_result) = next_chunk {
        let index = report.chunks_loaded + 1;
        let result = match chunk_result {
            Ok(chunk) => {
                let rows = chunk.len();
                load_chunk(chunk, &table, sink)
                    .await
                    .map(|elapsed| (rows, elapsed))
            }
            // We couldn't even read this chunk.
            Err(err) => Err(IngestError::Normalization(err).into()),
        };
        match result {
            Ok((rows, elapsed)) => {
                report.chunks_loaded += 1;
                report.rows_loaded += rows as u64;
                info!(
                    total_rows = report.rows_loaded,
                    "inserted chunk {} ({} rows) in {:.3} seconds",
                    index,
                    rows,
                    elapsed.as_secs_f64(),
                );
            }
            Err(err) => {
                error!("an error occurred loading chunk {}: {:#}", index, err);
                report.outcome = LoadOutcome::Failed { chunk: index, error: err };
                break;
            }
        }
        next_chunk = chunks.next();
    }
    Ok(report)
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Write};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::postgres::PgColumn;

    /// An in-memory "database" holding a single table.
    #[derive(Default)]
    struct MemorySink {
        table: Option<PgCreateTable>,
        rows: Vec<Vec<String>>,
        tables_created: usize,
        appended_chunks: Vec<usize>,
        fail_on_chunk: Option<usize>,
        fail_create: bool,
    }

    #[async_trait]
    impl TableSink for MemorySink {
        async fn create_table(&mut self, table: &PgCreateTable) -> Result<()> {
            if self.fail_create {
                return Err(format_err!("permission denied for schema public"));
            }
            self.table = Some(table.clone());
            self.rows.clear();
            self.tables_created += 1;
            Ok(())
        }

        async fn append_chunk(
            &mut self,
            table: &PgCreateTable,
            chunk: &Chunk,
        ) -> Result<()> {
            if self.fail_on_chunk == Some(chunk.index) {
                return Err(format_err!("connection reset by peer"));
            }
            assert_eq!(self.table.as_ref(), Some(table));
            self.rows.extend(
                chunk
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|s| s.to_owned()).collect()),
            );
            self.appended_chunks.push(chunk.len());
            Ok(())
        }
    }

    fn trips_csv(rows: usize, bad_row: Option<usize>) -> String {
        let mut csv =
            String::from("VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,fare\n");
        for i in 0..rows {
            let pickup = if Some(i) == bad_row {
                "not-a-date"
            } else {
                "01/15/2020 08:30:00 AM"
            };
            csv.push_str(&format!("{},{},2020-01-15 08:45:00,{}.5\n", i, pickup, i));
        }
        csv
    }

    async fn load_csv(
        csv: &str,
        chunk_size: usize,
        sink: &mut MemorySink,
    ) -> Result<LoadReport> {
        let chunks = ChunkReader::from_reader(Cursor::new(csv.to_owned()), chunk_size)?;
        let columns = chunks.columns().clone();
        let table_name = "trips".parse::<PgName>()?;
        run_chunks(&columns, chunks, &table_name, sink).await
    }

    #[tokio::test]
    async fn loads_250k_rows_in_three_chunks() {
        let mut sink = MemorySink::default();
        let report = load_csv(&trips_csv(250_000, None), 100_000, &mut sink)
            .await
            .unwrap();
        assert!(matches!(report.outcome, LoadOutcome::Exhausted));
        assert_eq!(report.chunks_loaded, 3);
        assert_eq!(report.rows_loaded, 250_000);
        assert_eq!(sink.tables_created, 1);
        assert_eq!(sink.appended_chunks, vec![100_000, 100_000, 50_000]);
        assert_eq!(sink.rows.len(), 250_000);
        assert_eq!(
            sink.table.unwrap().columns,
            vec![
                PgColumn {
                    name: "VendorID".to_owned(),
                    data_type: PgScalarDataType::Bigint,
                },
                PgColumn {
                    name: "tpep_pickup_datetime".to_owned(),
                    data_type: PgScalarDataType::Timestamp,
                },
                PgColumn {
                    name: "tpep_dropoff_datetime".to_owned(),
                    data_type: PgScalarDataType::Timestamp,
                },
                PgColumn {
                    name: "fare".to_owned(),
                    data_type: PgScalarDataType::DoublePrecision,
                },
            ]
        );
    }

    #[tokio::test]
    async fn timestamps_are_normalized_before_append() {
        let mut sink = MemorySink::default();
        load_csv(&trips_csv(2, None), 10, &mut sink).await.unwrap();
        assert_eq!(
            sink.rows[1],
            vec!["1", "2020-01-15 08:30:00", "2020-01-15 08:45:00", "1.5"]
        );
    }

    #[tokio::test]
    async fn bad_timestamp_in_second_chunk_stops_the_load() {
        let mut sink = MemorySink::default();
        let report = load_csv(&trips_csv(250_000, Some(150_000)), 100_000, &mut sink)
            .await
            .unwrap();
        assert_eq!(report.chunks_loaded, 1);
        assert_eq!(report.rows_loaded, 100_000);
        match &report.outcome {
            LoadOutcome::Failed { chunk, error } => {
                assert_eq!(*chunk, 2);
                assert!(matches!(
                    error.downcast_ref::<IngestError>(),
                    Some(IngestError::Normalization(_))
                ));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        // Chunk 2 never reached the sink, and chunk 3 was never read.
        assert_eq!(sink.appended_chunks, vec![100_000]);
        assert_eq!(sink.rows.len(), 100_000);
        assert_eq!(report.to_string(), "100000 rows in 1 chunks (stopped at chunk 2)");
    }

    #[tokio::test]
    async fn append_failure_stops_the_load() {
        let mut sink = MemorySink {
            fail_on_chunk: Some(3),
            ..MemorySink::default()
        };
        let report = load_csv(&trips_csv(25, None), 10, &mut sink).await.unwrap();
        assert_eq!(report.chunks_loaded, 2);
        assert_eq!(sink.rows.len(), 20);
        match &report.outcome {
            LoadOutcome::Failed { chunk, error } => {
                assert_eq!(*chunk, 3);
                assert!(matches!(
                    error.downcast_ref::<IngestError>(),
                    Some(IngestError::Append(_))
                ));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_row_in_later_chunk_stops_the_load() {
        let mut sink = MemorySink::default();
        let csv = "a,b\n1,2\n3,4\n5\n";
        let report = load_csv(csv, 2, &mut sink).await.unwrap();
        assert_eq!(report.rows_loaded, 2);
        assert!(matches!(report.outcome, LoadOutcome::Failed { chunk: 2, .. }));
    }

    #[tokio::test]
    async fn bad_first_chunk_is_a_schema_error() {
        let mut sink = MemorySink::default();
        let err = load_csv("a,b\n1\n", 2, &mut sink).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Schema(_))
        ));
        assert_eq!(sink.tables_created, 0);
    }

    #[tokio::test]
    async fn bad_timestamp_in_first_chunk_keeps_the_new_table() {
        let mut sink = MemorySink::default();
        let report = load_csv(&trips_csv(5, Some(0)), 10, &mut sink).await.unwrap();
        assert_eq!(sink.tables_created, 1);
        assert_eq!(report.chunks_loaded, 0);
        assert!(matches!(report.outcome, LoadOutcome::Failed { chunk: 1, .. }));
    }

    #[tokio::test]
    async fn create_failure_is_a_schema_error() {
        let mut sink = MemorySink {
            fail_create: true,
            ..MemorySink::default()
        };
        let err = load_csv(&trips_csv(5, None), 10, &mut sink).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Schema(_))
        ));
        assert!(sink.appended_chunks.is_empty());
    }

    #[tokio::test]
    async fn header_only_file_creates_an_empty_table() {
        let mut sink = MemorySink::default();
        let report = load_csv("id,pickup_datetime\n", 10, &mut sink).await.unwrap();
        assert!(matches!(report.outcome, LoadOutcome::Exhausted));
        assert_eq!(report.chunks_loaded, 0);
        assert_eq!(sink.tables_created, 1);
        assert!(sink.appended_chunks.is_empty());
    }

    #[tokio::test]
    async fn initialize_schema_replaces_existing_table() {
        let mut sink = MemorySink::default();
        load_csv(&trips_csv(5, None), 10, &mut sink).await.unwrap();
        assert_eq!(sink.rows.len(), 5);

        let mut chunks =
            ChunkReader::from_reader(Cursor::new(trips_csv(3, None)), 10).unwrap();
        let chunk = chunks.next().unwrap().unwrap();
        let table_name = "trips".parse::<PgName>().unwrap();
        initialize_schema(&chunk, &table_name, &mut sink).await.unwrap();
        assert_eq!(sink.tables_created, 2);
        assert!(sink.rows.is_empty());
    }

    #[tokio::test]
    async fn run_reads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(trips_csv(7, None).as_bytes()).unwrap();
        file.flush().unwrap();

        let mut sink = MemorySink::default();
        let options = LoadOptions {
            chunk_size: NonZeroUsize::new(3).unwrap(),
        };
        let table_name = "trips".parse::<PgName>().unwrap();
        let report = run(file.path(), &table_name, &mut sink, &options)
            .await
            .unwrap();
        assert_eq!(sink.appended_chunks, vec![3, 3, 1]);
        assert_eq!(report.rows_loaded, 7);
    }

    #[tokio::test]
    async fn run_fails_on_missing_file() {
        let mut sink = MemorySink::default();
        let table_name = "trips".parse::<PgName>().unwrap();
        let err = run(
            Path::new("/nonexistent/output.csv"),
            &table_name,
            &mut sink,
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Schema(_))
        ));
    }
}
