//! Data model shared by the tsbench ingestion pipeline: decoded points and
//! the header block that describes the input stream.

use indexmap::IndexMap;

/// String values of one row to insert, exactly as produced by the data
/// generator.
///
/// The tag set is a comma-separated `key=value` list, e.g.
/// `hostname=host_0,region=eu-west-1,datacenter=eu-west-1b`. The field
/// string is a comma-separated value list whose first entry is the row
/// timestamp in nanoseconds, e.g. `1451606400000000000,58,2,24`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPayload {
    pub tags: String,
    pub fields: String,
}

/// A single row of data keyed by the metric table it belongs to.
///
/// Points are immutable once decoded and move through the pipeline by
/// value: the decoder yields them, the scan loop appends them to a batch,
/// and the batch consumes the payload. Exclusive ownership is therefore
/// guaranteed by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub table: String,
    pub row: RowPayload,
}

impl Point {
    pub fn new(
        table: impl Into<String>,
        tags: impl Into<String>,
        fields: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            row: RowPayload {
                tags: tags.into(),
                fields: fields.into(),
            },
        }
    }
}

/// The header block derived from the input stream before ingestion begins.
///
/// Immutable for the duration of a run and shared read-only (typically as
/// an `Arc<Headers>`) by the schema bootstrapper and the row writers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// Tag column names, in header order.
    pub tag_keys: Vec<String>,
    /// Serialized type name of each tag column, parallel to `tag_keys`.
    pub tag_types: Vec<String>,
    /// Field column names per metric table, in input order.
    pub field_keys: IndexMap<String, Vec<String>>,
}

impl Headers {
    /// Iterate tag columns as `(name, serialized type)` pairs.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tag_keys
            .iter()
            .zip(self.tag_types.iter())
            .map(|(k, t)| (k.as_str(), t.as_str()))
    }
}
