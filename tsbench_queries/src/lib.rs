//! Reusable query records for the companion query-benchmark runner.
//!
//! A [`QuartzQuery`] carries the label, description, target table and SQL
//! text of one benchmark query. Under high query throughput the runner
//! churns through millions of these, so instances are recycled through a
//! [`QueryPool`] rather than reallocated: releasing a query drains its
//! buffers but keeps their capacity for the next acquire.

use std::fmt;

use parking_lot::Mutex;

/// Initial capacity reserved for the SQL body of a pooled query.
const SQL_BUF_CAPACITY: usize = 1024;

/// One benchmark query: a human-readable label and description, the table
/// it targets, and the SQL text to run.
///
/// Fields are byte buffers rather than `String`s: the query generator
/// writes serialized text into them directly and the runner treats them
/// as opaque bytes until display time.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QuartzQuery {
    pub human_label: Vec<u8>,
    pub human_description: Vec<u8>,
    pub table: Vec<u8>,
    pub sql_query: Vec<u8>,
    id: u64,
}

impl QuartzQuery {
    /// A fresh query with pre-sized buffers, bypassing any pool.
    pub fn new() -> Self {
        Self {
            human_label: Vec::with_capacity(SQL_BUF_CAPACITY),
            human_description: Vec::with_capacity(SQL_BUF_CAPACITY),
            table: Vec::with_capacity(SQL_BUF_CAPACITY),
            sql_query: Vec::with_capacity(SQL_BUF_CAPACITY),
            id: 0,
        }
    }

    /// Identifier assigned by the benchmark harness.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// Clear all fields, keeping buffer capacity.
    fn drain(&mut self) {
        self.human_label.clear();
        self.human_description.clear();
        self.table.clear();
        self.sql_query.clear();
        self.id = 0;
    }
}

impl fmt::Display for QuartzQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HumanLabel: {}, HumanDescription: {}, Table: {}, Query: {}",
            String::from_utf8_lossy(&self.human_label),
            String::from_utf8_lossy(&self.human_description),
            String::from_utf8_lossy(&self.table),
            String::from_utf8_lossy(&self.sql_query),
        )
    }
}

/// Free-list pool of [`QuartzQuery`] instances.
///
/// [`acquire`](Self::acquire) hands out a drained query (recycled if one
/// is available, freshly allocated otherwise) and transfers ownership to
/// the caller; [`release`](Self::release) takes it back by value, so a
/// caller cannot keep using a query after returning it.
#[derive(Debug, Default)]
pub struct QueryPool {
    free: Mutex<Vec<QuartzQuery>>,
}

impl QueryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a drained query from the pool, allocating if the pool is
    /// empty.
    pub fn acquire(&self) -> QuartzQuery {
        self.free.lock().pop().unwrap_or_else(QuartzQuery::new)
    }

    /// Return a query to the pool, draining its fields first.
    pub fn release(&self, mut query: QuartzQuery) {
        query.drain();
        self.free.lock().push(query);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_query() -> QuartzQuery {
        let mut q = QuartzQuery::new();
        q.human_label.extend_from_slice(b"Quartz max cpu");
        q.human_description
            .extend_from_slice(b"Quartz max cpu over 1h");
        q.table.extend_from_slice(b"cpu");
        q.sql_query
            .extend_from_slice(b"SELECT max(usage_user) FROM benchmark.cpu");
        q.set_id(42);
        q
    }

    #[test]
    fn display_includes_all_fields() {
        let q = filled_query();
        assert_eq!(
            q.to_string(),
            "HumanLabel: Quartz max cpu, HumanDescription: Quartz max cpu over 1h, \
             Table: cpu, Query: SELECT max(usage_user) FROM benchmark.cpu"
        );
    }

    #[test]
    fn release_drains_fields() {
        let pool = QueryPool::new();
        pool.release(filled_query());

        let q = pool.acquire();
        assert!(q.human_label.is_empty());
        assert!(q.human_description.is_empty());
        assert!(q.table.is_empty());
        assert!(q.sql_query.is_empty());
        assert_eq!(q.id(), 0);
    }

    #[test]
    fn release_keeps_buffer_capacity() {
        let pool = QueryPool::new();
        let mut q = pool.acquire();
        q.sql_query.extend_from_slice(&[b'x'; 4096]);
        pool.release(q);

        let q = pool.acquire();
        assert!(q.sql_query.capacity() >= 4096);
        assert!(q.sql_query.is_empty());
    }

    #[test]
    fn acquire_allocates_when_pool_empty() {
        let pool = QueryPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(a, QuartzQuery::new());
        assert_eq!(b, QuartzQuery::new());
    }
}
