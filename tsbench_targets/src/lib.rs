//! Capability traits a loader target implements and a host harness drives.
//!
//! A target supplies the pieces of the ingestion pipeline — batch
//! accumulation, partition assignment, schema bootstrap and row writing —
//! behind the traits in this crate, without depending on any particular
//! harness. The bundled runner in `tsbench_load` is one such host.

use std::{fmt::Debug, num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use tsbench_data::{Headers, Point};

/// Boxed error source for transport-specific failure causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Statements attached to an [`Error::Execution`] are truncated to this
/// many bytes for readability.
const STATEMENT_PREVIEW_LEN: usize = 100;

/// Primary error type for the ingestion pipeline.
///
/// Every failure in the pipeline is fatal for the run: the harness
/// propagates these upward and the binary decides process termination.
/// There is no partial-success mode for schema bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or conflicting configuration, e.g. an unrecognized
    /// serialized column type or more than one index strategy. Never
    /// retried.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// Failure to establish a transport connection.
    #[error("connection failed: {source}")]
    Connection {
        #[source]
        source: BoxError,
    },

    /// A DDL or DML statement failed. The offending statement is attached
    /// (truncated) for diagnosis.
    #[error("could not execute sql: {statement}: {source}")]
    Execution {
        statement: String,
        #[source]
        source: BoxError,
    },

    /// The non-creator readiness poll exhausted its retry budget.
    #[error("expected table '{table}' not created after {attempts} probes")]
    Timeout { table: String, attempts: usize },

    /// The input stream violated the line-oriented format.
    #[error("malformed input: {message}")]
    Parse { message: String },

    /// The input stream could not be read at all.
    #[error("io error reading input: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection(source: impl Into<BoxError>) -> Self {
        Self::Connection {
            source: source.into(),
        }
    }

    /// Build an execution error, truncating the statement to a readable
    /// preview.
    pub fn execution(statement: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let mut statement = statement.into();
        if statement.len() > STATEMENT_PREVIEW_LEN {
            let cut = (0..=STATEMENT_PREVIEW_LEN)
                .rev()
                .find(|i| statement.is_char_boundary(*i))
                .unwrap_or(0);
            statement.truncate(cut);
        }
        Self::Execution {
            statement,
            source: source.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A batch of rows accumulated for a single worker, grouped by
/// destination table.
///
/// A batch is exclusively owned by one worker at a time; `append` takes
/// `&mut self`, so concurrent mutation of a shared batch is
/// unrepresentable and no lock is required.
pub trait Batch: Send {
    /// Total row count across all tables in this batch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a point's payload into the sequence for its table,
    /// incrementing the total row count. Unknown table names are inserted
    /// as new keys.
    fn append(&mut self, point: Point);
}

/// Creates empty batches on demand for the harness.
pub trait BatchFactory: Send + Sync {
    type Batch: Batch;

    fn new_batch(&self) -> Self::Batch;
}

/// Assigns each incoming point to one of N worker partitions.
///
/// Implementations must be safe for concurrent invocation from every
/// worker without external locking.
pub trait PointIndexer: Send + Sync + Debug {
    fn get_index(&self, point: &Point) -> usize;
}

/// Routes every point to partition 0, forcing single-worker sequential
/// ingestion — used when downstream ordering must be preserved or when
/// parallel writers would violate a uniqueness constraint the target
/// enforces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantIndexer;

impl PointIndexer for ConstantIndexer {
    fn get_index(&self, _point: &Point) -> usize {
        0
    }
}

/// Decodes the input stream into a header block and a sequence of points.
pub trait DataSource: Send {
    /// Parse the header block, or return the cached copy. Must be called
    /// before the first [`next_point`](Self::next_point).
    fn headers(&mut self) -> Result<&Headers>;

    /// Decode the next point; `None` at end of stream.
    fn next_point(&mut self) -> Result<Option<Point>>;
}

/// The schema bootstrap state machine, run once per load before any
/// worker writes.
#[async_trait]
pub trait DbCreator: Send + Debug {
    /// Record the input headers and compute the transport descriptor.
    /// Performs no network I/O; configuration errors surface here.
    async fn init(&mut self, headers: Arc<Headers>) -> Result<()>;

    /// Drop a pre-existing schema. Destructive and irreversible; only
    /// invoked on the caller's explicit opt-in.
    async fn remove_old_db(&mut self, db_name: &str) -> Result<()>;

    /// Issue the schema-creation DDL.
    async fn create_db(&mut self, db_name: &str) -> Result<()>;

    /// Create the tags table and every metric table, or — in the
    /// non-creator role — wait for another process to have created them.
    async fn post_create_db(&mut self, db_name: &str) -> Result<()>;
}

/// Row/metric counts from one processed batch, aggregated by the harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Individual field values written.
    pub metric_count: u64,
    /// Rows written.
    pub row_count: u64,
}

/// Flushes batches as DML against the already-created schema. One
/// processor instance per worker.
#[async_trait]
pub trait Processor: Send {
    type Batch: Batch;

    /// Per-worker setup, e.g. opening this worker's connection.
    async fn init(&mut self, worker_id: usize, do_load: bool) -> Result<()>;

    /// Write one batch. With `do_load` unset the batch is still consumed
    /// and counted, but nothing is sent to the target.
    async fn process_batch(&mut self, batch: Self::Batch, do_load: bool) -> Result<ProcessSummary>;
}

/// A loader target: the factory surface a host harness drives.
///
/// Every getter hands the harness a fresh instance, so the harness is free
/// to create one processor per worker while sharing nothing but what the
/// target itself chose to share internally.
pub trait Benchmark {
    type Batch: Batch + 'static;
    type DataSource: DataSource + 'static;
    type Factory: BatchFactory<Batch = Self::Batch> + 'static;
    type Processor: Processor<Batch = Self::Batch> + 'static;
    type Creator: DbCreator;

    fn data_source(&self) -> Result<Self::DataSource>;

    fn batch_factory(&self) -> Self::Factory;

    /// The partition indexer for a pool of `partitions` workers. Which
    /// variant is returned is a target configuration decision.
    fn point_indexer(&self, partitions: NonZeroUsize) -> Arc<dyn PointIndexer>;

    fn processor(&self) -> Self::Processor;

    fn db_creator(&self) -> Self::Creator;
}
