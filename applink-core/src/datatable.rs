//! In-memory CSV tables and byte-budget chunking for Bulk API uploads.
//!
//! A [`DataTable`] holds an ordered set of columns and rows of optional
//! string values, one per column. Tables serialize to standard CSV (UTF-8,
//! `\n` line endings, absent values as empty fields).
//!
//! The Bulk API rejects upload payloads above a fixed size, so
//! [`DataTable::chunks`] packs rows into sub-tables whose serialized size,
//! header included, stays below a byte budget. Sizes are measured on the exact
//! CSV bytes each row produces, not estimated from row counts.

use std::collections::HashMap;

use csv::{ReaderBuilder, Terminator, WriterBuilder};

/// Default upload byte budget per chunk.
pub const DEFAULT_BYTE_BUDGET: usize = 100_000_000;

/// Errors raised while building, serializing, or parsing tables.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A column name appears more than once.
    #[error("Duplicate column: {column}")]
    DuplicateColumn {
        /// The repeated column name.
        column: String,
    },
    /// A positional row has the wrong number of values.
    #[error("Row has {actual} values but the table has {expected} columns")]
    ColumnCountMismatch {
        /// Number of declared columns.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },
    /// A keyed row names a column the table does not declare.
    #[error("Unknown column: {column}")]
    UnknownColumn {
        /// The undeclared column name.
        column: String,
    },
    /// CSV encoding or decoding failed.
    #[error("CSV error: {source}")]
    Csv {
        #[source]
        source: csv::Error,
    },
    /// Flushing the CSV writer failed.
    #[error("Failed to flush CSV output: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

/// Immutable table of optional string values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Option<String>],
}

impl<'a> Row<'a> {
    /// Returns the value of `column`, or `None` if it is absent or undeclared.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values[index].as_deref()
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &'a [Option<String>] {
        self.values
    }

    /// Iterates `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, Option<&'a str>)> + 'a {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }
}

impl DataTable {
    /// Starts building a table with the given columns.
    ///
    /// ```
    /// use applink_core::datatable::DataTable;
    ///
    /// let mut builder = DataTable::builder(["Name", "Phone"])?;
    /// builder.add_row([Some("Acme"), Some("555-1234")])?;
    /// builder.add_row([Some("Globex"), None])?;
    /// let table = builder.build();
    ///
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.to_csv()?, b"Name,Phone\nAcme,555-1234\nGlobex,\n");
    /// # Ok::<(), applink_core::datatable::Error>(())
    /// ```
    pub fn builder<I, S>(columns: I) -> Result<DataTableBuilder, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataTableBuilder::new(columns)
    }

    /// Declared column names, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the row at `index`.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Iterates rows in order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Serializes the header and all rows to CSV.
    pub fn to_csv(&self) -> Result<Vec<u8>, Error> {
        let mut writer = csv_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|source| Error::Csv { source })?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|value| value.as_deref().unwrap_or("")))
                .map_err(|source| Error::Csv { source })?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::Io {
                source: e.into_error(),
            })
    }

    /// Parses CSV with a header row. Empty fields become absent values.
    pub fn from_csv(data: &[u8]) -> Result<Self, Error> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(data);

        let headers = reader
            .headers()
            .map_err(|source| Error::Csv { source })?
            .clone();
        let mut builder = DataTableBuilder::new(headers.iter())?;

        for record in reader.records() {
            let record = record.map_err(|source| Error::Csv { source })?;
            builder.add_row(record.iter().map(|field| (!field.is_empty()).then_some(field)))?;
        }

        Ok(builder.build())
    }

    /// Lazily splits the table into chunks that fit `byte_budget`.
    ///
    /// Every row appears in exactly one chunk, in the original order. A chunk
    /// is closed before the row that would bring its serialized size to or
    /// past the budget; a row that is too large on its own still gets a chunk
    /// of its own. A table without rows yields one header-only chunk.
    pub fn chunks(&self, byte_budget: usize) -> Result<Chunks<'_>, Error> {
        let header_size = measure(&self.columns)?;
        Ok(Chunks {
            table: self,
            byte_budget,
            header_size,
            position: 0,
            pending_size: None,
            emitted_any: false,
        })
    }

    /// Collects [`chunks`](Self::chunks) into a vector.
    pub fn split(&self, byte_budget: usize) -> Result<Vec<DataTable>, Error> {
        self.chunks(byte_budget)?.collect()
    }

    fn with_rows(&self, rows: &[Vec<Option<String>>]) -> DataTable {
        DataTable {
            columns: self.columns.clone(),
            rows: rows.to_vec(),
        }
    }
}

/// Incremental [`DataTable`] builder.
#[derive(Debug, Clone)]
pub struct DataTableBuilder {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Option<String>>>,
}

impl DataTableBuilder {
    fn new<I, S>(columns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if index.insert(column.clone(), position).is_some() {
                return Err(Error::DuplicateColumn {
                    column: column.clone(),
                });
            }
        }

        Ok(Self {
            columns,
            index,
            rows: Vec::new(),
        })
    }

    /// Appends a row given one value per column, in column order.
    pub fn add_row<I, V>(&mut self, values: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = Option<V>>,
        V: Into<String>,
    {
        let row: Vec<Option<String>> = values
            .into_iter()
            .map(|value| value.map(Into::into))
            .collect();
        if row.len() != self.columns.len() {
            return Err(Error::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(self)
    }

    /// Appends a row given `(column, value)` pairs. Columns that are not
    /// mentioned are absent.
    pub fn add_row_with_map<I, K, V>(&mut self, values: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut row = vec![None; self.columns.len()];
        for (column, value) in values {
            let column = column.as_ref();
            let position = *self.index.get(column).ok_or_else(|| Error::UnknownColumn {
                column: column.to_string(),
            })?;
            row[position] = value.map(Into::into);
        }
        self.rows.push(row);
        Ok(self)
    }

    /// Finalizes the table.
    pub fn build(self) -> DataTable {
        DataTable {
            columns: self.columns,
            rows: self.rows,
        }
    }
}

/// Iterator over byte-budgeted chunks of a [`DataTable`].
///
/// Created by [`DataTable::chunks`].
#[derive(Debug)]
pub struct Chunks<'a> {
    table: &'a DataTable,
    byte_budget: usize,
    header_size: usize,
    position: usize,
    // Size of the row at `position`, measured while closing the previous chunk.
    pending_size: Option<usize>,
    emitted_any: bool,
}

impl Chunks<'_> {
    fn row_size(&mut self, index: usize) -> Result<usize, Error> {
        match self.pending_size.take() {
            Some(size) => Ok(size),
            None => measure(
                self.table.rows[index]
                    .iter()
                    .map(|value| value.as_deref().unwrap_or("")),
            ),
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = Result<DataTable, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.table.rows.len();
        if self.position >= total {
            if self.emitted_any {
                return None;
            }
            self.emitted_any = true;
            return Some(Ok(self.table.with_rows(&[])));
        }

        let start = self.position;
        let mut size = self.header_size;
        while self.position < total {
            let row_size = match self.row_size(self.position) {
                Ok(row_size) => row_size,
                Err(e) => {
                    self.position = total;
                    self.emitted_any = true;
                    return Some(Err(e));
                }
            };
            if self.position > start && size + row_size >= self.byte_budget {
                self.pending_size = Some(row_size);
                break;
            }
            size += row_size;
            self.position += 1;
        }

        self.emitted_any = true;
        tracing::trace!(
            rows = self.position - start,
            bytes = size,
            "Closed data table chunk"
        );
        Some(Ok(self.table.with_rows(&self.table.rows[start..self.position])))
    }
}

fn csv_writer<W: std::io::Write>(inner: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(inner)
}

/// Serialized CSV length of one record, terminator included.
fn measure<I, T>(record: I) -> Result<usize, Error>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv_writer(Vec::new());
    writer
        .write_record(record)
        .map_err(|source| Error::Csv { source })?;
    let bytes = writer.into_inner().map_err(|e| Error::Io {
        source: e.into_error(),
    })?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table(columns: &[&str], rows: &[&[Option<&str>]]) -> DataTable {
        let mut builder = DataTable::builder(columns.iter().copied()).unwrap();
        for row in rows {
            builder.add_row(row.iter().copied()).unwrap();
        }
        builder.build()
    }

    fn all_rows(chunks: &[DataTable]) -> Vec<Vec<Option<String>>> {
        chunks.iter().flat_map(|chunk| chunk.rows.clone()).collect()
    }

    #[test]
    fn test_to_csv_escapes_values() {
        let table = table(
            &["Name", "Description"],
            &[
                &[Some("Acme, Inc."), Some("says \"hi\"")],
                &[Some("Multi"), Some("line\nvalue")],
                &[None, Some("")],
            ],
        );
        let csv = String::from_utf8(table.to_csv().unwrap()).unwrap();
        assert_eq!(
            csv,
            "Name,Description\n\"Acme, Inc.\",\"says \"\"hi\"\"\"\nMulti,\"line\nvalue\"\n,\n"
        );
    }

    #[test]
    fn test_from_csv_maps_empty_fields_to_absent() {
        let table = DataTable::from_csv(b"sf__Id,sf__Created,Name\n001xx,true,Acme\n001yy,false,\n")
            .unwrap();
        assert_eq!(table.columns(), ["sf__Id", "sf__Created", "Name"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.row(0).unwrap().get("Name"), Some("Acme"));
        assert_eq!(table.row(1).unwrap().get("Name"), None);
        assert_eq!(table.row(1).unwrap().get("sf__Id"), Some("001yy"));
    }

    #[test]
    fn test_from_csv_rejects_ragged_rows() {
        let result = DataTable::from_csv(b"A,B\n1,2\n3\n");
        assert!(matches!(result, Err(Error::Csv { .. })));
    }

    #[test]
    fn test_builder_rejects_duplicate_columns() {
        let result = DataTable::builder(["Name", "Name"]);
        assert!(matches!(result, Err(Error::DuplicateColumn { column }) if column == "Name"));
    }

    #[test]
    fn test_builder_rejects_wrong_row_length() {
        let mut builder = DataTable::builder(["A", "B"]).unwrap();
        let result = builder.add_row([Some("1")]);
        assert!(matches!(
            result,
            Err(Error::ColumnCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_add_row_with_map_fills_missing_columns() {
        let mut builder = DataTable::builder(["Name", "Phone", "Industry"]).unwrap();
        builder
            .add_row_with_map([("Industry", Some("Tech")), ("Name", Some("Acme"))])
            .unwrap();
        let table = builder.build();
        let row = table.row(0).unwrap();
        assert_eq!(
            row.iter().collect::<Vec<_>>(),
            vec![
                ("Name", Some("Acme")),
                ("Phone", None),
                ("Industry", Some("Tech"))
            ]
        );
    }

    #[test]
    fn test_add_row_with_map_rejects_unknown_column() {
        let mut builder = DataTable::builder(["Name"]).unwrap();
        let result = builder.add_row_with_map([("Nope", Some("x"))]);
        assert!(matches!(result, Err(Error::UnknownColumn { column }) if column == "Nope"));
    }

    #[test]
    fn test_empty_table_yields_header_only_chunk() {
        let table = table(&["Name"], &[]);
        let chunks = table.split(DEFAULT_BYTE_BUDGET).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
        assert_eq!(chunks[0].to_csv().unwrap(), b"Name\n");
    }

    #[test]
    fn test_single_chunk_under_budget() {
        let table = table(&["Name"], &[&[Some("a")], &[Some("b")], &[Some("c")]]);
        let chunks = table.split(DEFAULT_BYTE_BUDGET).unwrap();
        assert_eq!(chunks, vec![table]);
    }

    #[test]
    fn test_split_closes_chunk_when_budget_is_met() {
        // Header "Name\n" is 5 bytes and every row "rowN\n" is 5 bytes.
        let table = table(
            &["Name"],
            &[&[Some("row1")], &[Some("row2")], &[Some("row3")], &[Some("row4")]],
        );

        // 5 + 5 + 5 = 15 meets the budget, so only one row fits per chunk.
        let chunks = table.split(15).unwrap();
        assert_eq!(chunks.len(), 4);

        // 5 + 5 + 5 = 15 < 16, so two rows fit per chunk.
        let chunks = table.split(16).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].row(1).unwrap().get("Name"), Some("row2"));
        assert_eq!(chunks[1].row(0).unwrap().get("Name"), Some("row3"));
        for chunk in &chunks {
            assert!(chunk.to_csv().unwrap().len() < 16);
        }
    }

    #[test]
    fn test_oversized_row_gets_its_own_chunk() {
        let big = "x".repeat(100);
        let table = table(
            &["Name"],
            &[&[Some("a")], &[Some(big.as_str())], &[Some("b")]],
        );
        let chunks = table.split(20).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 1);
        assert_eq!(chunks[1].row(0).unwrap().get("Name"), Some(big.as_str()));
        assert_eq!(all_rows(&chunks), table.rows);
    }

    #[test]
    fn test_budget_below_header_keeps_every_row() {
        let table = table(&["AVeryLongHeaderName"], &[&[Some("a")], &[Some("b")]]);
        let chunks = table.split(4).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(all_rows(&chunks), table.rows);
    }

    #[test]
    fn test_chunks_are_lazy_and_fused() {
        let table = table(&["Name"], &[&[Some("row1")], &[Some("row2")]]);
        let mut chunks = table.chunks(11).unwrap();
        assert_eq!(chunks.next().unwrap().unwrap().len(), 1);
        assert_eq!(chunks.next().unwrap().unwrap().len(), 1);
        assert!(chunks.next().is_none());
        assert!(chunks.next().is_none());
    }

    fn arb_table() -> impl Strategy<Value = DataTable> {
        let cell = proptest::option::of("[a-zA-Z0-9 ,\"\n]{0,40}");
        proptest::collection::vec(proptest::collection::vec(cell, 3), 0..60).prop_map(|rows| {
            let mut builder = DataTable::builder(["A", "B", "C"]).unwrap();
            for row in rows {
                builder.add_row(row).unwrap();
            }
            builder.build()
        })
    }

    proptest! {
        #[test]
        fn prop_split_preserves_rows_in_order(table in arb_table(), budget in 1usize..2_000) {
            let chunks = table.split(budget).unwrap();
            prop_assert_eq!(all_rows(&chunks), table.rows.clone());
            if table.is_empty() {
                prop_assert_eq!(chunks.len(), 1);
            } else {
                prop_assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
            }
        }

        #[test]
        fn prop_chunks_stay_under_budget_when_rows_are_small(table in arb_table()) {
            let header = measure(table.columns()).unwrap();
            let largest_row = table
                .rows
                .iter()
                .map(|row| measure(row.iter().map(|v| v.as_deref().unwrap_or(""))).unwrap())
                .max()
                .unwrap_or(0);
            let budget = header + largest_row * 2 + 1;
            for chunk in table.split(budget).unwrap() {
                prop_assert!(chunk.to_csv().unwrap().len() <= budget);
            }
        }
    }
}
