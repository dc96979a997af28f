//! The Quartz loader target.
//!
//! Quartz is a Postgres-wire-compatible columnar time-series warehouse
//! with a `system.tables` catalog. This crate implements the full
//! ingestion pipeline for it: decoding the generator's serialized file
//! format, grouping points into per-table batches, assigning batches to
//! workers, bootstrapping the schema (or waiting for another loader to),
//! and flushing batches as multi-row INSERT statements.
//!
//! [`benchmark::QuartzBenchmark`] ties the pieces together behind the
//! `tsbench_targets` capability traits so any host harness can drive it.

pub mod batch;
pub mod benchmark;
pub mod client;
pub mod creator;
pub mod data_source;
pub mod options;
pub mod processor;
pub mod schema;

pub use benchmark::QuartzBenchmark;
pub use options::LoadingOptions;
