//! Per-worker row writer: flushes batches as multi-row INSERT statements.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::DateTime;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;
use tsbench_data::RowPayload;
use tsbench_targets::{Error, ProcessSummary, Processor, Result};

use crate::{
    batch::TableBatch,
    client::{SqlConnector, SqlSession},
    options::LoadingOptions,
    schema::SchemaRegistry,
};

/// Literal format for the `"time"` column, microsecond precision.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Shared map from full tag-set string to its client-assigned row id in
/// the tags table.
///
/// Every worker resolves against the same instance, so each distinct tag
/// set is assigned exactly one id and written by exactly one worker.
#[derive(Debug, Default)]
pub struct TagCache {
    state: Mutex<TagCacheState>,
}

#[derive(Debug)]
struct TagCacheState {
    ids: HashMap<String, i32>,
    next_id: i32,
}

impl Default for TagCacheState {
    fn default() -> Self {
        Self {
            ids: HashMap::new(),
            next_id: 1,
        }
    }
}

impl TagCache {
    /// Resolve a tag set to its id, assigning the next one on first
    /// sight. Returns the id and whether it was newly assigned.
    fn resolve(&self, tag_set: &str) -> (i32, bool) {
        let mut state = self.state.lock();
        if let Some(id) = state.ids.get(tag_set) {
            return (*id, false);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.ids.insert(tag_set.to_string(), id);
        (id, true)
    }
}

/// The statements one table's rows flush as: new tag rows first, then the
/// metric rows that reference them.
#[derive(Debug)]
struct Flush {
    tags_insert: Option<String>,
    metric_insert: String,
}

/// Row writer for one load worker.
///
/// `init` opens this worker's own session; batches are then flushed
/// independently of every other worker. With `do_load` unset the DML is
/// still built and counted but nothing is sent.
#[derive(Debug)]
pub struct QuartzProcessor<C: SqlConnector> {
    connector: C,
    opts: Arc<LoadingOptions>,
    registry: Arc<OnceCell<SchemaRegistry>>,
    tag_cache: Arc<TagCache>,
    session: Option<C::Session>,
    worker_id: usize,
}

impl<C: SqlConnector> QuartzProcessor<C> {
    pub fn new(
        connector: C,
        opts: Arc<LoadingOptions>,
        registry: Arc<OnceCell<SchemaRegistry>>,
        tag_cache: Arc<TagCache>,
    ) -> Self {
        Self {
            connector,
            opts,
            registry,
            tag_cache,
            session: None,
            worker_id: 0,
        }
    }

    /// Build the statements for one table's rows, assigning tag ids as
    /// new tag sets appear.
    fn build_flush(
        &self,
        registry: &SchemaRegistry,
        table: &str,
        columns: &[String],
        rows: &[RowPayload],
    ) -> Result<Flush> {
        let db_name = &self.opts.db_name;
        let mut new_tag_rows: Vec<String> = Vec::new();
        let mut metric_rows: Vec<String> = Vec::with_capacity(rows.len());

        for row in rows {
            let (tags_id, newly_assigned) = self.tag_cache.resolve(&row.tags);
            if newly_assigned {
                new_tag_rows.push(self.tag_row(registry, tags_id, &row.tags)?);
            }

            // The column after "time" anchors the row to its series:
            // either the tags table reference or the co-located tag value.
            let lead = if self.opts.in_table_tag {
                let pairs = split_tag_set(&row.tags)?;
                let (_, value) = pairs
                    .first()
                    .ok_or_else(|| Error::parse("empty tag set"))?;
                sql_quote(value)
            } else {
                tags_id.to_string()
            };
            metric_rows.push(metric_row(table, columns, &lead, row)?);
        }

        let tags_insert = if new_tag_rows.is_empty() {
            None
        } else {
            let columns = if self.opts.use_json_tags {
                "id, tagset".to_string()
            } else {
                format!("id, {}", registry.tag_names().join(", "))
            };
            Some(format!(
                "INSERT INTO {db_name}.tags({columns}) VALUES {}",
                new_tag_rows.join(",")
            ))
        };

        let metric_insert = format!(
            "INSERT INTO {db_name}.\"{table}\" ({}) VALUES {}",
            self.metric_columns(registry, columns)?,
            metric_rows.join(",")
        );

        Ok(Flush {
            tags_insert,
            metric_insert,
        })
    }

    /// One tags-table VALUES row: `(id, 'v', ...)` or `(id, '<json>')`.
    fn tag_row(&self, registry: &SchemaRegistry, id: i32, tag_set: &str) -> Result<String> {
        let pairs = split_tag_set(tag_set)?;

        if self.opts.use_json_tags {
            let mut object = serde_json::Map::new();
            for (key, value) in pairs {
                object.insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
            let json = serde_json::Value::Object(object).to_string();
            return Ok(format!("({id}, {})", sql_quote(&json)));
        }

        if pairs.len() != registry.tag_names().len() {
            return Err(Error::parse(format!(
                "tag set carries {} entries, header declared {}",
                pairs.len(),
                registry.tag_names().len()
            )));
        }
        let values = pairs
            .iter()
            .map(|(_, value)| sql_quote(value))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("({id}, {values})"))
    }

    /// Column list of a metric INSERT, mirroring the create-table order.
    fn metric_columns(&self, registry: &SchemaRegistry, columns: &[String]) -> Result<String> {
        let mut list = String::from("\"time\", ");
        if self.opts.in_table_tag {
            let partition_tag = registry.partition_tag().ok_or_else(|| {
                Error::configuration("in-table partition tag requires at least one tag column")
            })?;
            list.push_str(&format!("\"{partition_tag}\", "));
        } else {
            list.push_str("tags_id, ");
        }
        for column in columns {
            list.push_str(&format!("\"{column}\", "));
        }
        list.push_str("additional_tags");
        Ok(list)
    }
}

#[async_trait]
impl<C: SqlConnector> Processor for QuartzProcessor<C> {
    type Batch = TableBatch;

    async fn init(&mut self, worker_id: usize, do_load: bool) -> Result<()> {
        self.worker_id = worker_id;
        if do_load {
            let conn_str = self.opts.connect_string()?;
            self.session = Some(self.connector.connect(&conn_str).await?);
        }
        debug!(worker_id, "processor ready");
        Ok(())
    }

    async fn process_batch(&mut self, batch: TableBatch, do_load: bool) -> Result<ProcessSummary> {
        let registry = self
            .registry
            .get()
            .ok_or_else(|| Error::configuration("batch processed before schema bootstrap"))?;

        let mut summary = ProcessSummary::default();
        for (table, rows) in batch.into_tables() {
            let columns = registry.table_columns(&table).ok_or_else(|| {
                Error::configuration(format!("table {table} missing from schema registry"))
            })?;

            let flush = self.build_flush(registry, &table, columns, &rows)?;
            summary.row_count += rows.len() as u64;
            summary.metric_count += (rows.len() * columns.len()) as u64;

            if do_load {
                let session = self
                    .session
                    .as_ref()
                    .ok_or_else(|| Error::configuration("processor used before init"))?;
                if let Some(tags_insert) = &flush.tags_insert {
                    session.execute(tags_insert).await?;
                }
                session.execute(&flush.metric_insert).await?;
            }
        }

        debug!(
            worker_id = self.worker_id,
            rows = summary.row_count,
            "processed batch"
        );
        Ok(summary)
    }
}

/// One metric-table VALUES row. The first field value is the timestamp in
/// nanoseconds; empty values are written as NULL; `additional_tags` is
/// always NULL.
fn metric_row(table: &str, columns: &[String], lead: &str, row: &RowPayload) -> Result<String> {
    let mut values = row.fields.split(',');
    let raw_timestamp = values.next().unwrap_or_default();
    let nanos: i64 = raw_timestamp
        .parse()
        .map_err(|_| Error::parse(format!("invalid timestamp {raw_timestamp:?}")))?;
    let time = DateTime::from_timestamp_nanos(nanos).format(TIME_FORMAT);

    let field_values: Vec<&str> = values.collect();
    if field_values.len() != columns.len() {
        return Err(Error::parse(format!(
            "row for table {table} carries {} values, schema has {} columns",
            field_values.len(),
            columns.len()
        )));
    }

    let mut row_sql = format!("('{time}', {lead}, ");
    for value in field_values {
        if value.is_empty() {
            row_sql.push_str("NULL, ");
        } else {
            row_sql.push_str(value);
            row_sql.push_str(", ");
        }
    }
    row_sql.push_str("NULL)");
    Ok(row_sql)
}

/// Split a `key=value,key=value` tag set into pairs.
fn split_tag_set(tag_set: &str) -> Result<Vec<(&str, &str)>> {
    tag_set
        .split(',')
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| Error::parse(format!("malformed tag pair: {pair:?}")))
        })
        .collect()
}

/// Quote a string literal for splicing into a statement, doubling any
/// embedded quotes.
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tsbench_data::{Headers, Point};
    use tsbench_targets::{Batch, BatchFactory};

    use super::*;
    use crate::{
        batch::TableBatchFactory,
        client::mock::{MockConnector, MockSession},
    };

    fn registry_cell() -> Arc<OnceCell<SchemaRegistry>> {
        let headers = Headers {
            tag_keys: vec!["hostname".to_string(), "region".to_string()],
            tag_types: vec!["string".to_string(), "string".to_string()],
            field_keys: [(
                "cpu".to_string(),
                vec!["usage_user".to_string(), "usage_system".to_string()],
            )]
            .into_iter()
            .collect(),
        };
        let cell = Arc::new(OnceCell::new());
        cell.set(SchemaRegistry::from_headers(&headers).unwrap())
            .unwrap();
        cell
    }

    fn processor(
        opts: LoadingOptions,
        session: Arc<MockSession>,
        cell: Arc<OnceCell<SchemaRegistry>>,
        cache: Arc<TagCache>,
    ) -> QuartzProcessor<MockConnector> {
        QuartzProcessor::new(MockConnector::new(session), Arc::new(opts), cell, cache)
    }

    fn batch_of(points: impl IntoIterator<Item = Point>) -> TableBatch {
        let mut batch = TableBatchFactory.new_batch();
        for point in points {
            batch.append(point);
        }
        batch
    }

    #[tokio::test]
    async fn flushes_tags_then_metrics() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([
            Point::new(
                "cpu",
                "hostname=host_0,region=eu-west-1",
                "1451606400000000000,58,2",
            ),
            Point::new(
                "cpu",
                "hostname=host_1,region=eu-west-1",
                "1451606401000000000,17,3",
            ),
        ]);
        let summary = processor.process_batch(batch, true).await.unwrap();

        assert_eq!(
            summary,
            ProcessSummary {
                metric_count: 4,
                row_count: 2,
            }
        );
        assert_eq!(
            session.executed(),
            vec![
                "INSERT INTO benchmark.tags(id, hostname, region) VALUES \
                 (1, 'host_0', 'eu-west-1'),(2, 'host_1', 'eu-west-1')"
                    .to_string(),
                "INSERT INTO benchmark.\"cpu\" (\"time\", tags_id, \"usage_user\", \
                 \"usage_system\", additional_tags) VALUES \
                 ('2016-01-01 00:00:00.000000', 1, 58, 2, NULL),\
                 ('2016-01-01 00:00:01.000000', 2, 17, 3, NULL)"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn known_tag_sets_are_not_reinserted() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let point = Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,58,2",
        );
        processor
            .process_batch(batch_of([point.clone()]), true)
            .await
            .unwrap();
        processor
            .process_batch(batch_of([point]), true)
            .await
            .unwrap();

        let executed = session.executed();
        assert_eq!(executed.len(), 3);
        assert!(executed[0].starts_with("INSERT INTO benchmark.tags"));
        assert!(executed[1].starts_with("INSERT INTO benchmark.\"cpu\""));
        // Second batch: same tag set, so only the metric insert.
        assert!(executed[2].starts_with("INSERT INTO benchmark.\"cpu\""));
        assert!(executed[2].contains("('2016-01-01 00:00:00.000000', 1, 58, 2, NULL)"));
    }

    #[tokio::test]
    async fn tag_cache_is_shared_across_workers() {
        let cell = registry_cell();
        let cache = Arc::new(TagCache::default());

        let session_a = Arc::new(MockSession::default());
        let mut worker_a = processor(
            LoadingOptions::default(),
            Arc::clone(&session_a),
            Arc::clone(&cell),
            Arc::clone(&cache),
        );
        worker_a.init(0, true).await.unwrap();

        let session_b = Arc::new(MockSession::default());
        let mut worker_b = processor(
            LoadingOptions::default(),
            Arc::clone(&session_b),
            cell,
            cache,
        );
        worker_b.init(1, true).await.unwrap();

        let point = Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,58,2",
        );
        worker_a
            .process_batch(batch_of([point.clone()]), true)
            .await
            .unwrap();
        worker_b
            .process_batch(batch_of([point]), true)
            .await
            .unwrap();

        // Worker B saw the tag set already resolved by worker A.
        assert_eq!(session_a.executed().len(), 2);
        assert_eq!(session_b.executed().len(), 1);
        assert!(session_b.executed()[0].contains("VALUES ('2016-01-01 00:00:00.000000', 1,"));
    }

    #[tokio::test]
    async fn json_mode_inserts_tagset_document() {
        let session = Arc::new(MockSession::default());
        let opts = LoadingOptions {
            use_json_tags: true,
            ..Default::default()
        };
        let mut processor = processor(
            opts,
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,58,2",
        )]);
        processor.process_batch(batch, true).await.unwrap();

        assert_eq!(
            session.executed()[0],
            "INSERT INTO benchmark.tags(id, tagset) VALUES \
             (1, '{\"hostname\":\"host_0\",\"region\":\"eu-west-1\"}')"
        );
    }

    #[tokio::test]
    async fn in_table_tag_leads_with_tag_value() {
        let session = Arc::new(MockSession::default());
        let opts = LoadingOptions {
            in_table_tag: true,
            ..Default::default()
        };
        let mut processor = processor(
            opts,
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,58,2",
        )]);
        processor.process_batch(batch, true).await.unwrap();

        let executed = session.executed();
        assert_eq!(
            executed[1],
            "INSERT INTO benchmark.\"cpu\" (\"time\", \"hostname\", \"usage_user\", \
             \"usage_system\", additional_tags) VALUES \
             ('2016-01-01 00:00:00.000000', 'host_0', 58, 2, NULL)"
        );
    }

    #[tokio::test]
    async fn dry_run_counts_without_executing() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, false).await.unwrap();

        let batch = batch_of([Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,58,2",
        )]);
        let summary = processor.process_batch(batch, false).await.unwrap();

        assert_eq!(
            summary,
            ProcessSummary {
                metric_count: 2,
                row_count: 1,
            }
        );
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_registry_is_configuration_error() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            Arc::new(OnceCell::new()),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([Point::new("cpu", "hostname=host_0", "1,2")]);
        let err = processor.process_batch(batch, true).await.unwrap_err();
        assert_matches!(err, Error::Configuration { .. });
    }

    #[tokio::test]
    async fn value_count_mismatch_is_parse_error() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,58,2,99",
        )]);
        let err = processor.process_batch(batch, true).await.unwrap_err();
        assert_matches!(
            err,
            Error::Parse { message } if message.contains("3 values, schema has 2 columns")
        );
    }

    #[tokio::test]
    async fn empty_field_value_becomes_null() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([Point::new(
            "cpu",
            "hostname=host_0,region=eu-west-1",
            "1451606400000000000,,2",
        )]);
        processor.process_batch(batch, true).await.unwrap();

        assert!(session.executed()[1]
            .contains("('2016-01-01 00:00:00.000000', 1, NULL, 2, NULL)"));
    }

    #[tokio::test]
    async fn short_tag_set_is_parse_error() {
        let session = Arc::new(MockSession::default());
        let mut processor = processor(
            LoadingOptions::default(),
            Arc::clone(&session),
            registry_cell(),
            Arc::new(TagCache::default()),
        );
        processor.init(0, true).await.unwrap();

        let batch = batch_of([Point::new(
            "cpu",
            "hostname=host_0",
            "1451606400000000000,58,2",
        )]);
        let err = processor.process_batch(batch, true).await.unwrap_err();
        assert_matches!(err, Error::Parse { .. });
    }

    #[test]
    fn tag_values_are_quote_escaped() {
        assert_eq!(sql_quote("host's"), "'host''s'");
        assert_eq!(sql_quote("plain"), "'plain'");
    }
}
