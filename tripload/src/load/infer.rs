//! Deriving a destination table from the first chunk of data.

use std::collections::HashSet;

use csv::StringRecord;

use super::normalize::is_timestamp_column;
use crate::common::*;
use crate::postgres::{PgColumn, PgCreateTable, PgName, PgScalarDataType};

/// The narrowest type that fits every value we've seen in a column so far.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Guess {
    /// No non-empty values yet.
    Unknown,
    Bigint,
    DoublePrecision,
    Text,
}

impl Guess {
    /// Widen this guess until it also fits `cell`.
    fn widen(self, cell: &str) -> Guess {
        if cell.is_empty() {
            return self;
        }
        let mut guess = self;
        loop {
            guess = match guess {
                Guess::Unknown => Guess::Bigint,
                Guess::Bigint if cell.parse::<i64>().is_ok() => return guess,
                Guess::Bigint => Guess::DoublePrecision,
                Guess::DoublePrecision if cell.parse::<f64>().is_ok() => {
                    return guess
                }
                Guess::DoublePrecision | Guess::Text => return Guess::Text,
            };
        }
    }

    fn to_data_type(self) -> PgScalarDataType {
        match self {
            Guess::Unknown | Guess::Text => PgScalarDataType::Text,
            Guess::Bigint => PgScalarDataType::Bigint,
            Guess::DoublePrecision => PgScalarDataType::DoublePrecision,
        }
    }
}

#[test]
fn guesses_widen_monotonically() {
    let widen_all = |cells: &[&str]| {
        cells
            .iter()
            .fold(Guess::Unknown, |guess, cell| guess.widen(cell))
    };
    assert_eq!(widen_all(&[]), Guess::Unknown);
    assert_eq!(widen_all(&["", ""]), Guess::Unknown);
    assert_eq!(widen_all(&["1", "", "-7"]), Guess::Bigint);
    assert_eq!(widen_all(&["1", "2.5"]), Guess::DoublePrecision);
    assert_eq!(widen_all(&["2.5", "1"]), Guess::DoublePrecision);
    assert_eq!(widen_all(&["1", "N"]), Guess::Text);
    assert_eq!(widen_all(&["N", "1"]), Guess::Text);
}

/// Build a `PgCreateTable` named `name` with one column per entry in
/// `columns`, typed to fit every value in `rows`.
///
/// Timestamp columns are always `timestamp`, because we normalize them before
/// loading. With no rows at all, every other column is `text`.
///
/// Only `rows` are examined, and callers pass just the first chunk. A column
/// holding only integers there becomes `bigint`, so a later chunk with a
/// decimal or text value in that column is rejected by PostgreSQL, and the
/// load stops at that chunk.
pub(crate) fn infer_table(
    name: &PgName,
    columns: &StringRecord,
    rows: &[StringRecord],
) -> Result<PgCreateTable> {
    let mut seen = HashSet::new();
    for column in columns {
        if column.is_empty() {
            return Err(format_err!("CSV header contains an empty column name"));
        }
        if !seen.insert(column) {
            return Err(format_err!(
                "CSV header contains duplicate column {:?}",
                column
            ));
        }
    }

    let mut guesses = vec![Guess::Unknown; columns.len()];
    for row in rows {
        for (guess, cell) in guesses.iter_mut().zip(row.iter()) {
            *guess = guess.widen(cell);
        }
    }

    let pg_columns = columns
        .iter()
        .zip(guesses)
        .map(|(column, guess)| {
            let data_type = if is_timestamp_column(column) {
                PgScalarDataType::Timestamp
            } else {
                guess.to_data_type()
            };
            PgColumn {
                name: column.to_owned(),
                data_type,
            }
        })
        .collect();
    Ok(PgCreateTable {
        name: name.to_owned(),
        columns: pg_columns,
    })
}
