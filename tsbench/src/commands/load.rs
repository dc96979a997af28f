//! Implementation of the `tsbench load` subcommand.

use std::{num::NonZeroUsize, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use tsbench_load::{run_benchmark, RunnerConfig};
use tsbench_quartz::QuartzBenchmark;

use super::common::QuartzConfig;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Quartz connection and schema config
    #[clap(flatten)]
    quartz_config: QuartzConfig,

    /// Number of parallel load workers
    #[clap(long = "workers", env = "TSBENCH_WORKERS", default_value = "8")]
    workers: NonZeroUsize,

    /// Points accumulated per batch before it is handed to a worker
    #[clap(long = "batch-size", default_value = "10000")]
    batch_size: NonZeroUsize,

    /// Stop after this many points; reads the whole input when unset
    #[clap(long = "limit")]
    limit: Option<u64>,

    /// Spread points across the workers round-robin instead of pinning
    /// every point to worker 0
    #[clap(long = "hash-workers")]
    hash_workers: bool,

    /// Write to the database. Disable for a parse-and-count dry run
    #[clap(long = "do-load", default_value_t = true, action = clap::ArgAction::Set)]
    do_load: bool,

    /// Run the schema-creation steps before loading
    #[clap(
        long = "do-create-db",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    do_create_db: bool,

    /// Drop a pre-existing schema of the same name first. Destructive
    #[clap(long = "drop-existing")]
    drop_existing: bool,

    /// Period between load progress reports, e.g. "10s"
    #[clap(long = "reporting-period")]
    reporting_period: Option<humantime::Duration>,

    /// Input file to load; reads stdin when omitted
    #[clap(short = 'f', long = "file")]
    file: Option<PathBuf>,
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let runner_config = RunnerConfig {
        db_name: config.quartz_config.db_name.clone(),
        workers: config.workers,
        batch_size: config.batch_size,
        limit: config.limit,
        do_load: config.do_load,
        do_create_db: config.do_create_db,
        drop_existing: config.drop_existing,
        reporting_period: config.reporting_period.map(Into::into),
    };
    let benchmark = QuartzBenchmark::new(
        config.quartz_config.loading_options(),
        config.file,
        config.hash_workers,
    );

    let summary = run_benchmark(&benchmark, &runner_config)
        .await
        .context("load failed")?;

    let seconds = summary.elapsed.as_secs_f64();
    println!(
        "loaded {} metrics in {seconds:.3}sec with {} workers (mean rate {:.2} metrics/sec)",
        summary.metrics,
        config.workers,
        summary.metrics as f64 / seconds,
    );
    println!(
        "loaded {} rows in {seconds:.3}sec with {} workers (mean rate {:.2} rows/sec)",
        summary.rows,
        config.workers,
        summary.rows as f64 / seconds,
    );

    Ok(())
}
