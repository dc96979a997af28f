//! Column-type inference, the schema registry, and DDL templates.
//!
//! Everything here is pure string assembly; execution lives in
//! [`crate::creator`].

use std::str::FromStr;

use indexmap::IndexMap;
use tsbench_data::Headers;
use tsbench_targets::{Error, Result};

use crate::options::IndexStrategy;

/// Serialized column types the generator emits, a closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Float32,
    Float64,
    Int64,
    Int32,
}

impl ColumnType {
    /// The Quartz storage type this serialized type maps to.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::String => "TEXT",
            Self::Float32 => "FLOAT",
            Self::Float64 => "DOUBLE PRECISION",
            Self::Int64 => "BIGINT",
            Self::Int32 => "INTEGER",
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    /// Unrecognized names are a fatal configuration error, never mapped
    /// to a lossy default.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(Self::String),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            "int64" => Ok(Self::Int64),
            "int32" => Ok(Self::Int32),
            other => Err(Error::configuration(format!(
                "unrecognized serialized type {other}"
            ))),
        }
    }
}

/// Immutable column-layout snapshot built once during schema bootstrap
/// and read by the row-writing processors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    tag_names: Vec<String>,
    tag_types: Vec<ColumnType>,
    table_columns: IndexMap<String, Vec<String>>,
}

impl SchemaRegistry {
    /// Derive the registry from the parsed input headers, inferring each
    /// tag column's type.
    pub fn from_headers(headers: &Headers) -> Result<Self> {
        let tag_names = headers.tag_keys.clone();
        let tag_types = headers
            .tag_types
            .iter()
            .map(|ty| ty.parse())
            .collect::<Result<Vec<ColumnType>>>()?;
        let table_columns = headers.field_keys.clone();

        Ok(Self {
            tag_names,
            tag_types,
            table_columns,
        })
    }

    /// Tag column names, in header order.
    pub fn tag_names(&self) -> &[String] {
        &self.tag_names
    }

    /// Inferred tag column types, parallel to [`tag_names`](Self::tag_names).
    pub fn tag_types(&self) -> &[ColumnType] {
        &self.tag_types
    }

    /// The partition tag: the first tag column, by convention the series
    /// hostname.
    pub fn partition_tag(&self) -> Option<&str> {
        self.tag_names.first().map(String::as_str)
    }

    /// Field columns of one metric table, in input order.
    pub fn table_columns(&self, table: &str) -> Option<&[String]> {
        self.table_columns.get(table).map(Vec::as_slice)
    }

    /// Metric tables with their field columns, in input order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.table_columns
            .iter()
            .map(|(table, columns)| (table.as_str(), columns.as_slice()))
    }
}

pub(crate) fn create_schema(db_name: &str) -> String {
    format!("CREATE SCHEMA {db_name}")
}

pub(crate) fn drop_schema(db_name: &str) -> String {
    format!("DROP SCHEMA {db_name} CASCADE;")
}

pub(crate) fn drop_tags_table(db_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {db_name}.tags")
}

pub(crate) fn create_json_tags_table(db_name: &str) -> String {
    format!("CREATE TABLE {db_name}.tags(id INTEGER NOT NULL, tagset JSONB)")
}

/// Tags table with one typed column per tag, in header order.
pub(crate) fn create_tags_table(db_name: &str, registry: &SchemaRegistry) -> String {
    let columns = registry
        .tag_names
        .iter()
        .zip(registry.tag_types.iter())
        .map(|(name, ty)| format!("{name} {}", ty.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {db_name}.tags(id INTEGER, {columns})")
}

/// Column definitions for one metric table: every field is DOUBLE
/// PRECISION, except the co-located partition tag which leads as TEXT.
/// Empty field names (from trailing separators in the header) are
/// skipped.
pub(crate) fn field_definitions(
    registry: &SchemaRegistry,
    columns: &[String],
    in_table_tag: bool,
) -> Result<Vec<String>> {
    let mut all_columns: Vec<&str> = Vec::with_capacity(columns.len() + 1);
    if in_table_tag {
        let partition_tag = registry.partition_tag().ok_or_else(|| {
            Error::configuration("in-table partition tag requires at least one tag column")
        })?;
        all_columns.push(partition_tag);
    }
    all_columns.extend(columns.iter().map(String::as_str));

    Ok(all_columns
        .iter()
        .enumerate()
        .filter(|(_, field)| !field.is_empty())
        .map(|(idx, field)| {
            let sql_type = if in_table_tag && idx == 0 {
                "TEXT"
            } else {
                "DOUBLE PRECISION"
            };
            format!("\"{field}\" {sql_type}")
        })
        .collect())
}

/// Metric table DDL. The `tags_id` reference column is omitted when the
/// partition tag is co-located in the table itself.
pub(crate) fn create_metric_table(
    db_name: &str,
    table: &str,
    field_defs: &[String],
    in_table_tag: bool,
) -> String {
    let fields = field_defs.join(",");
    if in_table_tag {
        format!(
            "CREATE TABLE {db_name}.\"{table}\" (\"time\" timestamp, {fields}, \
             additional_tags JSONB)"
        )
    } else {
        format!(
            "CREATE TABLE {db_name}.\"{table}\" (\"time\" timestamp, tags_id integer, \
             {fields}, additional_tags JSONB)"
        )
    }
}

/// The secondary index statement for one metric table, or `None` when no
/// strategy is selected.
pub(crate) fn create_index(
    db_name: &str,
    table: &str,
    strategy: IndexStrategy,
    partition_column: &str,
) -> Option<String> {
    match strategy {
        IndexStrategy::PartitionTime => Some(format!(
            "CREATE INDEX ON {db_name}.\"{table}\"({partition_column}, \"time\" DESC)"
        )),
        IndexStrategy::TimePartition => Some(format!(
            "CREATE INDEX ON {db_name}.\"{table}\"(\"time\" DESC, {partition_column})"
        )),
        IndexStrategy::Time => Some(format!(
            "CREATE INDEX ON {db_name}.\"{table}\"(\"time\" DESC)"
        )),
        IndexStrategy::None => None,
    }
}

/// Catalog probe used by the non-creator role to wait for a table.
pub(crate) fn table_probe(db_name: &str, table: &str) -> String {
    format!(
        "SELECT * FROM system.tables WHERE name = '{table}' AND namespace_name = '{db_name}'"
    )
}
