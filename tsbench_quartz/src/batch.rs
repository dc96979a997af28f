//! Per-table accumulation of pending rows.

use indexmap::IndexMap;
use tsbench_data::{Point, RowPayload};
use tsbench_targets::{Batch, BatchFactory};

/// A batch of rows grouped by destination table, with a running total
/// across all tables.
///
/// Owned by exactly one worker at a time; `append` takes `&mut self`, so
/// the single-writer discipline is structural rather than locked.
#[derive(Debug, Default)]
pub struct TableBatch {
    tables: IndexMap<String, Vec<RowPayload>>,
    rows: usize,
}

impl TableBatch {
    /// The accumulated tables and their rows, in first-seen order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[RowPayload])> + '_ {
        self.tables
            .iter()
            .map(|(table, rows)| (table.as_str(), rows.as_slice()))
    }

    /// Consume the batch, yielding each table with its rows.
    pub(crate) fn into_tables(self) -> indexmap::map::IntoIter<String, Vec<RowPayload>> {
        self.tables.into_iter()
    }
}

impl Batch for TableBatch {
    fn len(&self) -> usize {
        self.rows
    }

    fn append(&mut self, point: Point) {
        let Point { table, row } = point;
        self.tables.entry(table).or_default().push(row);
        self.rows += 1;
    }
}

/// Hands the harness fresh empty [`TableBatch`]es.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableBatchFactory;

impl BatchFactory for TableBatchFactory {
    type Batch = TableBatch;

    fn new_batch(&self) -> TableBatch {
        TableBatch::default()
    }
}
