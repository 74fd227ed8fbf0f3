//! A PostgreSQL `CREATE TABLE` declaration, plus the other SQL we generate
//! for a table.

use std::fmt;

use super::{Ident, PgName, PgScalarDataType};
use crate::separator::Separator;

/// A column in a PostgreSQL table. All our columns are nullable, because
/// empty CSV cells are loaded as `NULL`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PgColumn {
    /// The name of this column.
    pub(crate) name: String,
    /// The type of data stored in this column.
    pub(crate) data_type: PgScalarDataType,
}

impl fmt::Display for PgColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Ident(&self.name), self.data_type)
    }
}

/// A PostgreSQL table declaration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PgCreateTable {
    /// The name of the table.
    pub(crate) name: PgName,
    /// The columns in the table, in CSV order.
    pub(crate) columns: Vec<PgColumn>,
}

impl PgCreateTable {
    /// SQL to drop any existing table with our name.
    pub(crate) fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name.quoted())
    }

    /// SQL to stream headerless CSV rows into this table.
    ///
    /// `FORCE_NULL` makes quoted empty strings load as `NULL` too, which
    /// matters when a row has a single empty column and the CSV writer has to
    /// quote it.
    pub(crate) fn copy_from_stdin_sql(&self) -> String {
        let mut column_names = String::new();
        let mut sep = Separator::new(", ");
        for col in &self.columns {
            column_names.push_str(&format!("{}{}", sep.display(), Ident(&col.name)));
        }
        format!(
            "COPY {name} ({cols}) FROM STDIN WITH (FORMAT csv, FORCE_NULL ({cols}))",
            name = self.name.quoted(),
            cols = column_names,
        )
    }

    /// Indices of all columns with the specified type.
    pub(crate) fn column_indices_of_type(
        &self,
        data_type: PgScalarDataType,
    ) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, col)| col.data_type == data_type)
            .map(|(idx, _)| idx)
            .collect()
    }
}

impl fmt::Display for PgCreateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CREATE TABLE {} (", self.name.quoted())?;
        for (idx, col) in self.columns.iter().enumerate() {
            write!(f, "    {}", col)?;
            if idx + 1 == self.columns.len() {
                writeln!(f)?;
            } else {
                writeln!(f, ",")?;
            }
        }
        write!(f, ")")?;
        Ok(())
    }
}
