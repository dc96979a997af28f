//! Generic load harness: scans a decoded point stream into per-worker
//! batches and drives a target's processors until the stream is
//! exhausted.
//!
//! The harness owns the concurrency shape — one scanner, N workers over
//! bounded channels — while everything target-specific stays behind the
//! `tsbench_targets` traits.

use std::{
    mem,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tracing::{debug, info};
use tsbench_targets::{
    Batch, BatchFactory, Benchmark, DataSource, DbCreator, PointIndexer, ProcessSummary, Processor,
};

/// Batches a worker may have in flight before the scanner blocks.
///
/// Keeps a slow worker from pulling the whole input file into memory
/// while still letting the scanner run ahead of short stalls.
const BATCH_CHANNEL_DEPTH: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Target(#[from] tsbench_targets::Error),

    #[error("worker {worker_id} panicked")]
    WorkerPanic { worker_id: usize },

    #[error("input scan failed: {message}")]
    Scan { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Harness-level knobs for one load run. Target-specific configuration
/// lives with the target's own options.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Database (schema) name the run writes into.
    pub db_name: String,
    /// Worker count; each worker gets its own processor and channel.
    pub workers: NonZeroUsize,
    /// Points accumulated per batch before it is handed to a worker.
    pub batch_size: NonZeroUsize,
    /// Stop after this many points; `None` reads the stream to the end.
    pub limit: Option<u64>,
    /// When unset, batches are decoded and counted but nothing touches
    /// the database and schema bootstrap issues no DDL.
    pub do_load: bool,
    /// Run the create-schema steps (the creator role). Unset when another
    /// loader process owns schema creation.
    pub do_create_db: bool,
    /// Drop a pre-existing schema first. Destructive.
    pub drop_existing: bool,
    /// Emit a progress line at this interval; `None` disables reporting.
    pub reporting_period: Option<Duration>,
}

/// Totals for one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Points consumed from the data source.
    pub points: u64,
    /// Rows written (or counted, in a dry run) by the workers.
    pub rows: u64,
    /// Individual metric values across those rows.
    pub metrics: u64,
    pub elapsed: Duration,
}

/// Shared row/metric counters the workers bump and the progress reporter
/// reads.
#[derive(Debug, Default)]
struct LoadStats {
    rows: AtomicU64,
    metrics: AtomicU64,
}

impl LoadStats {
    fn record(&self, summary: ProcessSummary) {
        self.rows.fetch_add(summary.row_count, Ordering::Relaxed);
        self.metrics.fetch_add(summary.metric_count, Ordering::Relaxed);
    }

    fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    fn metrics(&self) -> u64 {
        self.metrics.load(Ordering::Relaxed)
    }
}

/// Run one load: bootstrap the schema, then scan points into batches and
/// flush them through `config.workers` parallel processors.
///
/// The creator's `init` always runs, so targets can derive per-run state
/// from the input headers even in a dry run; the steps that touch the
/// database are gated on `do_load`. The first worker error aborts the
/// run and is returned in preference to the scanner's secondary failure.
pub async fn run_benchmark<B: Benchmark>(benchmark: &B, config: &RunnerConfig) -> Result<Summary> {
    let started = Instant::now();

    let mut source = benchmark.data_source()?;
    let headers = Arc::new(source.headers()?.clone());

    let mut creator = benchmark.db_creator();
    creator.init(Arc::clone(&headers)).await?;
    if config.do_load {
        if config.do_create_db {
            if config.drop_existing {
                creator.remove_old_db(&config.db_name).await?;
            }
            creator.create_db(&config.db_name).await?;
        }
        creator.post_create_db(&config.db_name).await?;
    }

    let stats = Arc::new(LoadStats::default());
    let workers = config.workers.get();

    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let (tx, mut rx) = mpsc::channel::<B::Batch>(BATCH_CHANNEL_DEPTH);
        senders.push(tx);

        let mut processor = benchmark.processor();
        let stats = Arc::clone(&stats);
        let do_load = config.do_load;
        handles.push(tokio::spawn(async move {
            processor.init(worker_id, do_load).await?;
            while let Some(batch) = rx.recv().await {
                let summary = processor.process_batch(batch, do_load).await?;
                stats.record(summary);
            }
            Ok::<(), tsbench_targets::Error>(())
        }));
    }

    let reporter = config.reporting_period.map(|period| {
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    rows = stats.rows(),
                    metrics = stats.metrics(),
                    "load progress"
                );
            }
        })
    });

    // The scanner owns the senders; when it returns they drop, the
    // channels close and the workers drain to completion.
    let factory = benchmark.batch_factory();
    let indexer = benchmark.point_indexer(config.workers);
    let batch_size = config.batch_size.get();
    let limit = config.limit;
    let scan = tokio::task::spawn_blocking(move || {
        scan_points(source, factory, indexer, senders, batch_size, limit)
    });

    let mut first_error: Option<Error> = None;
    for (worker_id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if first_error.is_none() {
                    first_error = Some(Error::Target(error));
                }
            }
            Err(_) => {
                if first_error.is_none() {
                    first_error = Some(Error::WorkerPanic { worker_id });
                }
            }
        }
    }
    let scan_result = scan.await;

    if let Some(handle) = reporter {
        handle.abort();
    }
    if let Some(error) = first_error {
        return Err(error);
    }
    let points = match scan_result {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::Scan {
                message: "scan task panicked".to_string(),
            })
        }
    };
    debug!(points, "input stream exhausted");

    Ok(Summary {
        points,
        rows: stats.rows(),
        metrics: stats.metrics(),
        elapsed: started.elapsed(),
    })
}

/// Scanner half of the run: read points, route each to its partition's
/// batch and hand full batches to the workers, flushing partials at end
/// of stream.
fn scan_points<S, F>(
    mut source: S,
    factory: F,
    indexer: Arc<dyn PointIndexer>,
    senders: Vec<mpsc::Sender<F::Batch>>,
    batch_size: usize,
    limit: Option<u64>,
) -> Result<u64>
where
    S: DataSource,
    F: BatchFactory,
{
    let mut batches: Vec<F::Batch> = (0..senders.len()).map(|_| factory.new_batch()).collect();
    let mut points = 0u64;

    loop {
        if limit.is_some_and(|limit| points >= limit) {
            break;
        }
        let Some(point) = source.next_point()? else {
            break;
        };
        points += 1;

        let index = indexer.get_index(&point);
        let batch = &mut batches[index];
        batch.append(point);
        if batch.len() >= batch_size {
            let full = mem::replace(batch, factory.new_batch());
            if senders[index].blocking_send(full).is_err() {
                return Err(Error::Scan {
                    message: format!("worker {index} stopped receiving"),
                });
            }
        }
    }

    for (index, batch) in batches.into_iter().enumerate() {
        if batch.is_empty() {
            continue;
        }
        if senders[index].blocking_send(batch).is_err() {
            return Err(Error::Scan {
                message: format!("worker {index} stopped receiving"),
            });
        }
    }
    Ok(points)
}
