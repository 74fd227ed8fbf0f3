//! Writing chunks to a PostgreSQL table.

use std::mem;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{pin_mut, SinkExt};

use super::{Client, PgCreateTable};
use crate::common::*;
use crate::load::{Chunk, TableSink};

/// Send `COPY` data to the server once we've buffered this much.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A [`TableSink`] backed by a PostgreSQL connection.
pub(crate) struct PgTableSink<'a> {
    client: &'a mut Client,
}

impl<'a> PgTableSink<'a> {
    /// Write tables using `client`.
    pub(crate) fn new(client: &'a mut Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableSink for PgTableSink<'_> {
    #[instrument(level = "debug", skip_all, fields(table = %table.name))]
    async fn create_table(&mut self, table: &PgCreateTable) -> Result<()> {
        let transaction = self
            .client
            .transaction()
            .await
            .context("could not begin transaction")?;

        let drop_sql = table.drop_sql();
        debug!("{}", drop_sql);
        transaction
            .batch_execute(&drop_sql)
            .await
            .with_context(|| format!("error deleting existing {}", table.name))?;

        let create_sql = table.to_string();
        debug!("{}", create_sql);
        transaction
            .batch_execute(&create_sql)
            .await
            .with_context(|| format!("error creating table {}", table.name))?;

        transaction
            .commit()
            .await
            .with_context(|| format!("could not commit creation of {}", table.name))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(table = %table.name, chunk = chunk.index))]
    async fn append_chunk(
        &mut self,
        table: &PgCreateTable,
        chunk: &Chunk,
    ) -> Result<()> {
        let transaction = self
            .client
            .transaction()
            .await
            .context("could not begin transaction")?;

        let copy_sql = table.copy_from_stdin_sql();
        debug!("{}", copy_sql);
        let sink = transaction
            .copy_in(copy_sql.as_str())
            .await
            .with_context(|| format!("error starting copy into {}", table.name))?;
        pin_mut!(sink);

        for batch in copy_batches(chunk)? {
            sink.send(batch)
                .await
                .with_context(|| format!("error copying data into {}", table.name))?;
        }
        let copied = sink
            .as_mut()
            .finish()
            .await
            .with_context(|| format!("error copying data into {}", table.name))?;
        if copied != chunk.len() as u64 {
            return Err(format_err!(
                "expected to copy {} rows into {}, but PostgreSQL reported {}",
                chunk.len(),
                table.name,
                copied,
            ));
        }
        trace!("copied {} rows", copied);

        transaction
            .commit()
            .await
            .with_context(|| format!("could not commit chunk {}", chunk.index))?;
        Ok(())
    }
}

/// A CSV writer producing headerless `COPY` data.
fn new_copy_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(COPY_BUFFER_SIZE))
}

/// Flush `wtr` and return everything it wrote.
fn finish_copy_writer(wtr: csv::Writer<Vec<u8>>) -> Result<Bytes> {
    let buf = wtr
        .into_inner()
        .map_err(|err| format_err!("could not flush COPY data: {}", err.error()))?;
    Ok(Bytes::from(buf))
}

/// Serialize the rows of `chunk` as CSV, split into batches of roughly
/// `COPY_BUFFER_SIZE` bytes. Batches always end on a row boundary.
fn copy_batches(chunk: &Chunk) -> Result<Vec<Bytes>> {
    let mut batches = vec![];
    let mut wtr = new_copy_writer();
    for row in &chunk.rows {
        wtr.write_record(row)
            .context("could not serialize row for COPY")?;
        // The writer keeps its own buffer, so this lags a little. Finishing
        // the writer flushes that buffer, which always ends with a whole row.
        if wtr.get_ref().len() >= COPY_BUFFER_SIZE {
            let full = mem::replace(&mut wtr, new_copy_writer());
            batches.push(finish_copy_writer(full)?);
        }
    }
    let last = finish_copy_writer(wtr)?;
    if !last.is_empty() {
        batches.push(last);
    }
    Ok(batches)
}
