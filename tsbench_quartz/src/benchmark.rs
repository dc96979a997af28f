//! Assembles the Quartz target's pieces for one load run.

use std::{
    io::BufRead,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use once_cell::sync::OnceCell;
use tsbench_data::Point;
use tsbench_targets::{Benchmark, ConstantIndexer, PointIndexer, Result};

use crate::{
    batch::{TableBatch, TableBatchFactory},
    client::PgConnector,
    creator::QuartzCreator,
    data_source::FileDataSource,
    options::LoadingOptions,
    processor::{QuartzProcessor, TagCache},
    schema::SchemaRegistry,
};

/// Cycles points across workers in arrival order.
///
/// Correct only because tag-set ids come from the shared [`TagCache`]:
/// two workers seeing the same tag set resolve the same id, so rows for
/// one series may be written from any partition.
#[derive(Debug)]
pub struct RoundRobinIndexer {
    next: AtomicU64,
    partitions: NonZeroUsize,
}

impl RoundRobinIndexer {
    pub fn new(partitions: NonZeroUsize) -> Self {
        Self {
            next: AtomicU64::new(0),
            partitions,
        }
    }
}

impl PointIndexer for RoundRobinIndexer {
    fn get_index(&self, _point: &Point) -> usize {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        (n % self.partitions.get() as u64) as usize
    }
}

/// One configured load run against a Quartz warehouse.
///
/// Owns the state shared between the schema bootstrap and the row
/// writers: the registry published at init and the tag cache assigning
/// tag-set ids. A fresh benchmark value therefore drives exactly one run.
#[derive(Debug)]
pub struct QuartzBenchmark {
    opts: Arc<LoadingOptions>,
    file: Option<PathBuf>,
    hash_workers: bool,
    registry: Arc<OnceCell<SchemaRegistry>>,
    tag_cache: Arc<TagCache>,
}

impl QuartzBenchmark {
    /// `file` of `None` reads the input stream from stdin. With
    /// `hash_workers` unset every point routes to worker 0.
    pub fn new(opts: LoadingOptions, file: Option<PathBuf>, hash_workers: bool) -> Self {
        Self {
            opts: Arc::new(opts),
            file,
            hash_workers,
            registry: Arc::new(OnceCell::new()),
            tag_cache: Arc::new(TagCache::default()),
        }
    }
}

impl Benchmark for QuartzBenchmark {
    type Batch = TableBatch;
    type DataSource = FileDataSource<Box<dyn BufRead + Send>>;
    type Factory = TableBatchFactory;
    type Processor = QuartzProcessor<PgConnector>;
    type Creator = QuartzCreator<PgConnector>;

    fn data_source(&self) -> Result<Self::DataSource> {
        FileDataSource::open(self.file.as_deref())
    }

    fn batch_factory(&self) -> Self::Factory {
        TableBatchFactory
    }

    fn point_indexer(&self, partitions: NonZeroUsize) -> Arc<dyn PointIndexer> {
        if self.hash_workers {
            Arc::new(RoundRobinIndexer::new(partitions))
        } else {
            Arc::new(ConstantIndexer)
        }
    }

    fn processor(&self) -> Self::Processor {
        QuartzProcessor::new(
            PgConnector,
            Arc::clone(&self.opts),
            Arc::clone(&self.registry),
            Arc::clone(&self.tag_cache),
        )
    }

    fn db_creator(&self) -> Self::Creator {
        QuartzCreator::new(
            PgConnector,
            Arc::clone(&self.opts),
            Arc::clone(&self.registry),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use pretty_assertions::assert_eq;

    use super::*;

    fn point() -> Point {
        Point::new("cpu", "hostname=host_0", "1451606400000000000,58")
    }

    #[test]
    fn round_robin_cycles_through_partitions() {
        let indexer = RoundRobinIndexer::new(NonZeroUsize::new(3).unwrap());
        let indices: Vec<_> = (0..7).map(|_| indexer.get_index(&point())).collect();
        assert_eq!(indices, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn round_robin_is_collision_free_under_contention() {
        let indexer = RoundRobinIndexer::new(NonZeroUsize::new(1009).unwrap());

        let indices: HashSet<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let point = point();
                        (0..100)
                            .map(|_| indexer.get_index(&point))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        // 800 draws over 1009 partitions: a collision would mean two
        // threads observed the same counter value.
        assert_eq!(indices.len(), 800);
    }

    #[test]
    fn default_routing_pins_everything_to_worker_zero() {
        let benchmark = QuartzBenchmark::new(LoadingOptions::default(), None, false);
        let indexer = benchmark.point_indexer(NonZeroUsize::new(8).unwrap());
        for _ in 0..20 {
            assert_eq!(indexer.get_index(&point()), 0);
        }
    }

    #[test]
    fn hash_workers_routing_spreads_points() {
        let benchmark = QuartzBenchmark::new(LoadingOptions::default(), None, true);
        let indexer = benchmark.point_indexer(NonZeroUsize::new(4).unwrap());
        let indices: Vec<_> = (0..4).map(|_| indexer.get_index(&point())).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }
}
