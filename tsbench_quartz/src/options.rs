//! Configuration snapshot for one Quartz load run.

use tsbench_targets::{Error, Result};

/// Which secondary index, if any, to create on each metric table.
///
/// The three are mutually exclusive; selecting more than one is a
/// configuration error, not a priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStrategy {
    /// `(partition-column, "time" DESC)`
    PartitionTime,
    /// `("time" DESC, partition-column)`
    TimePartition,
    /// `("time" DESC)`
    Time,
    /// No secondary index.
    None,
}

/// Options controlling how a load run connects to Quartz and what schema
/// it creates. Read-only after startup; shared as `Arc<LoadingOptions>`.
#[derive(Debug, Clone)]
pub struct LoadingOptions {
    pub host: String,
    /// Appended to the connection string only when present and non-empty.
    pub port: Option<String>,
    /// Schema (database) name rows are loaded into.
    pub db_name: String,
    /// Create the tags and metric tables. Unset, this process waits for
    /// another loader to create them instead.
    pub create_metrics_table: bool,
    /// Encode the whole tag set as one JSONB column instead of one typed
    /// column per tag.
    pub use_json_tags: bool,
    /// Co-locate the partition tag as the first column of each metric
    /// table instead of referencing the tags table through `tags_id`.
    pub in_table_tag: bool,
    pub time_index: bool,
    pub time_partition_index: bool,
    pub partition_index: bool,
    /// Accepted for option-file compatibility; generates no per-field
    /// index DDL.
    pub field_index: Option<String>,
}

impl Default for LoadingOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            db_name: "benchmark".to_string(),
            create_metrics_table: true,
            use_json_tags: false,
            in_table_tag: false,
            time_index: false,
            time_partition_index: false,
            partition_index: false,
            field_index: None,
        }
    }
}

impl LoadingOptions {
    /// Assemble the transport connection string from the structured host
    /// and port fields.
    ///
    /// The descriptor is built from these fields alone; a value that
    /// embeds further `key=value` fragments (for example a host of
    /// `"db1 port=9999"`) is rejected rather than spliced in, so caller
    /// text can never redirect the connection.
    pub fn connect_string(&self) -> Result<String> {
        check_bare("host", &self.host)?;
        let mut conn_str = format!("host={}", self.host);
        if let Some(port) = self.port.as_deref() {
            if !port.is_empty() {
                check_bare("port", port)?;
                conn_str.push_str(&format!(" port={port}"));
            }
        }
        Ok(conn_str)
    }

    /// The validated index strategy selected by the three index flags.
    pub fn index_strategy(&self) -> Result<IndexStrategy> {
        let selected = [
            self.partition_index,
            self.time_partition_index,
            self.time_index,
        ]
        .into_iter()
        .filter(|flag| *flag)
        .count();
        if selected > 1 {
            return Err(Error::configuration(
                "at most one of partition-index, time-partition-index and time-index \
                 may be enabled",
            ));
        }

        Ok(if self.partition_index {
            IndexStrategy::PartitionTime
        } else if self.time_partition_index {
            IndexStrategy::TimePartition
        } else if self.time_index {
            IndexStrategy::Time
        } else {
            IndexStrategy::None
        })
    }
}

fn check_bare(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains([' ', '=']) {
        return Err(Error::configuration(format!(
            "{name} must be a bare value, got {value:?}"
        )));
    }
    Ok(())
}
