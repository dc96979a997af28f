//! Schema bootstrap for the Quartz target.
//!
//! Runs once per load before any worker writes. In the creator role it
//! creates the tags table and every metric table; in the non-creator role
//! it polls the `system.tables` catalog until another loader process has
//! created them.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};
use tsbench_data::Headers;
use tsbench_targets::{DbCreator, Error, Result};

use crate::{
    client::{SqlConnector, SqlSession},
    options::{IndexStrategy, LoadingOptions},
    schema::{self, SchemaRegistry},
};

/// Fixed interval between catalog probes in the non-creator role.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Probe budget per table; exhausting it fails the run (60 s ceiling).
const MAX_PROBES: usize = 600;

/// Schema bootstrap state for one load run.
///
/// `init` derives the schema registry from the input headers and
/// publishes it for the row writers; the remaining steps issue DDL (or
/// poll) through the injected connector. Any failure is terminal for the
/// run — there is no partial-schema continuation.
#[derive(Debug)]
pub struct QuartzCreator<C> {
    connector: C,
    opts: Arc<LoadingOptions>,
    registry_cell: Arc<OnceCell<SchemaRegistry>>,
    state: Option<InitState>,
}

#[derive(Debug)]
struct InitState {
    registry: SchemaRegistry,
    index_strategy: IndexStrategy,
    conn_str: String,
}

impl<C> QuartzCreator<C> {
    pub fn new(
        connector: C,
        opts: Arc<LoadingOptions>,
        registry_cell: Arc<OnceCell<SchemaRegistry>>,
    ) -> Self {
        Self {
            connector,
            opts,
            registry_cell,
            state: None,
        }
    }

    fn state(&self) -> Result<&InitState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::configuration("schema bootstrap used before init"))
    }
}

impl<C: SqlConnector> QuartzCreator<C> {
    /// Create one metric table and its secondary index, if any.
    async fn create_table_and_index(
        &self,
        session: &C::Session,
        db_name: &str,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let state = self.state()?;
        let in_table_tag = self.opts.in_table_tag;

        let field_defs = schema::field_definitions(&state.registry, columns, in_table_tag)?;
        session
            .execute(&schema::create_metric_table(
                db_name,
                table,
                &field_defs,
                in_table_tag,
            ))
            .await?;

        let partition_column = if in_table_tag {
            state.registry.partition_tag().ok_or_else(|| {
                Error::configuration("in-table partition tag requires at least one tag column")
            })?
        } else {
            "tags_id"
        };
        if let Some(ddl) =
            schema::create_index(db_name, table, state.index_strategy, partition_column)
        {
            session.execute(&ddl).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<C: SqlConnector> DbCreator for QuartzCreator<C> {
    async fn init(&mut self, headers: Arc<Headers>) -> Result<()> {
        let registry = SchemaRegistry::from_headers(&headers)?;
        let index_strategy = self.opts.index_strategy()?;
        let conn_str = self.opts.connect_string()?;

        // Publish the registry for the row writers. Visible from init on,
        // so a dry run that skips the DDL steps still has column layouts.
        self.registry_cell
            .set(registry.clone())
            .map_err(|_| Error::configuration("schema bootstrap initialized twice"))?;

        self.state = Some(InitState {
            registry,
            index_strategy,
            conn_str,
        });
        Ok(())
    }

    async fn remove_old_db(&mut self, db_name: &str) -> Result<()> {
        info!(db_name, "dropping existing schema");
        let state = self.state()?;
        let session = self.connector.connect(&state.conn_str).await?;
        session.execute(&schema::drop_schema(db_name)).await?;
        Ok(())
    }

    async fn create_db(&mut self, db_name: &str) -> Result<()> {
        debug!(db_name, "creating schema");
        let state = self.state()?;
        let session = self.connector.connect(&state.conn_str).await?;
        session.execute(&schema::create_schema(db_name)).await?;
        Ok(())
    }

    async fn post_create_db(&mut self, db_name: &str) -> Result<()> {
        let state = self.state()?;
        let session = self.connector.connect(&state.conn_str).await?;

        if self.opts.create_metrics_table {
            ensure_tags_table(&session, db_name, &state.registry, self.opts.use_json_tags)
                .await?;
            for (table, columns) in state.registry.tables() {
                self.create_table_and_index(&session, db_name, table, columns)
                    .await?;
            }
        } else {
            // Another loader owns table creation; wait until every table
            // this run may write to is visible in the catalog.
            for (table, _) in state.registry.tables() {
                wait_for_table(&session, db_name, table).await?;
            }
        }

        info!(
            db_name,
            tables = state.registry.tables().count(),
            "schema bootstrap complete"
        );
        Ok(())
    }
}

/// Create the tags table, dropping any leftover from an earlier run
/// first. A failed drop (the table may simply not exist) is not fatal.
async fn ensure_tags_table<S: SqlSession>(
    session: &S,
    db_name: &str,
    registry: &SchemaRegistry,
    use_json_tags: bool,
) -> Result<()> {
    if let Err(error) = session.execute(&schema::drop_tags_table(db_name)).await {
        debug!(%error, "dropping old tags table failed");
    }

    let ddl = if use_json_tags {
        schema::create_json_tags_table(db_name)
    } else {
        schema::create_tags_table(db_name, registry)
    };
    session.execute(&ddl).await?;
    Ok(())
}

/// Poll the catalog until `table` exists: an immediate hit returns with
/// zero sleeps, and the budget of [`MAX_PROBES`] probes spaced
/// [`PROBE_INTERVAL`] apart is a hard ceiling.
async fn wait_for_table<S: SqlSession>(session: &S, db_name: &str, table: &str) -> Result<()> {
    let probe = schema::table_probe(db_name, table);
    let mut attempts = 0;
    loop {
        attempts += 1;
        if session.query_any(&probe).await? {
            debug!(table, attempts, "table present");
            return Ok(());
        }
        if attempts == MAX_PROBES {
            return Err(Error::Timeout {
                table: table.to_string(),
                attempts,
            });
        }
        sleep(PROBE_INTERVAL).await;
    }
}
