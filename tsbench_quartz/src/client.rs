//! Thin SQL session abstraction over the Postgres wire protocol.
//!
//! The creator and processor talk to Quartz through the
//! [`SqlConnector`]/[`SqlSession`] pair instead of a concrete client so
//! tests can substitute a scripted mock.

use std::fmt::Debug;

use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::{debug, warn};
use tsbench_targets::{Error, Result};

/// Establishes [`SqlSession`]s from a libpq-style connection string.
#[async_trait]
pub trait SqlConnector: Send + Sync + Debug {
    type Session: SqlSession;

    async fn connect(&self, conn_str: &str) -> Result<Self::Session>;
}

/// One open session against the target database.
#[async_trait]
pub trait SqlSession: Send + Sync + Debug {
    /// Run a statement, returning the affected row count.
    async fn execute(&self, statement: &str) -> Result<u64>;

    /// Run a query, returning whether it produced at least one row.
    async fn query_any(&self, statement: &str) -> Result<bool>;
}

/// Connects to Quartz over `tokio_postgres`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl SqlConnector for PgConnector {
    type Session = PgSession;

    async fn connect(&self, conn_str: &str) -> Result<PgSession> {
        let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
            .await
            .map_err(Error::connection)?;

        // The connection object drives the socket; it resolves once the
        // client half is dropped.
        tokio::spawn(async move {
            if let Err(source) = connection.await {
                warn!(%source, "database connection terminated");
            }
        });

        Ok(PgSession { client })
    }
}

/// Live session over one `tokio_postgres` client.
#[derive(Debug)]
pub struct PgSession {
    client: tokio_postgres::Client,
}

#[async_trait]
impl SqlSession for PgSession {
    async fn execute(&self, statement: &str) -> Result<u64> {
        debug!(statement, "executing");
        self.client
            .execute(statement, &[])
            .await
            .map_err(|source| Error::execution(statement, source))
    }

    async fn query_any(&self, statement: &str) -> Result<bool> {
        let rows = self
            .client
            .query(statement, &[])
            .await
            .map_err(|source| Error::execution(statement, source))?;
        Ok(!rows.is_empty())
    }
}
