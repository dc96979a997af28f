//! Config shared by every command that talks to a Quartz database.

use clap::Parser;
use tsbench_quartz::LoadingOptions;

#[derive(Debug, Parser)]
pub(crate) struct QuartzConfig {
    /// Hostname of the database server
    #[clap(long = "host", env = "TSBENCH_HOST", default_value = "localhost")]
    pub(crate) host: String,

    /// Port of the database server; left out of the connection string
    /// when unset
    #[clap(long = "port", env = "TSBENCH_PORT")]
    pub(crate) port: Option<String>,

    /// Database (schema) name to operate on
    #[clap(long = "db-name", env = "TSBENCH_DB_NAME", default_value = "benchmark")]
    pub(crate) db_name: String,

    /// Create the tags and metric tables. Disable when another loader
    /// instance owns schema creation; this one then waits for the tables
    /// to appear instead
    #[clap(
        long = "create-metrics-table",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub(crate) create_metrics_table: bool,

    /// Store each tag set as a single JSONB document instead of one typed
    /// column per tag
    #[clap(long = "use-jsonb-tags")]
    pub(crate) use_json_tags: bool,

    /// Co-locate the first tag as a column of every metric table and
    /// partition on it, instead of referencing the tags table
    #[clap(long = "in-table-partition-tag")]
    pub(crate) in_table_tag: bool,

    /// Add a ("time" DESC) index to each metric table
    #[clap(long = "time-index")]
    pub(crate) time_index: bool,

    /// Add a ("time" DESC, partition column) index to each metric table
    #[clap(long = "time-partition-index")]
    pub(crate) time_partition_index: bool,

    /// Add a (partition column, "time" DESC) index to each metric table
    #[clap(long = "partition-index")]
    pub(crate) partition_index: bool,

    /// Per-field index specification, accepted for compatibility with
    /// other targets' option files
    #[clap(long = "field-index")]
    pub(crate) field_index: Option<String>,
}

impl QuartzConfig {
    pub(crate) fn loading_options(&self) -> LoadingOptions {
        LoadingOptions {
            host: self.host.clone(),
            port: self.port.clone(),
            db_name: self.db_name.clone(),
            create_metrics_table: self.create_metrics_table,
            use_json_tags: self.use_json_tags,
            in_table_tag: self.in_table_tag,
            time_index: self.time_index,
            time_partition_index: self.time_partition_index,
            partition_index: self.partition_index,
            field_index: self.field_index.clone(),
        }
    }
}
