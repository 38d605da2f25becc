use async_trait::async_trait;

use crate::{Column, FromValue, ResultSet, Row, SessionError, Version};

/// Rows of a streaming query, fetched one at a time.
#[async_trait]
pub trait RowStream: Send {
    fn columns(&self) -> &[Column];

    /// Next row, or `None` once the result is exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>, SessionError>;
}

/// An open connection to a MySQL server.
///
/// A session is owned by exactly one task at a time and is never shared.
#[async_trait]
pub trait Session: Send {
    /// Runs a query and buffers the whole result.
    async fn query(&mut self, sql: &str) -> Result<ResultSet, SessionError>;

    /// Runs a query whose rows are consumed incrementally.
    async fn query_streaming<'a>(
        &'a mut self,
        sql: &str,
    ) -> Result<Box<dyn RowStream + 'a>, SessionError>;

    /// Runs a statement, discarding any result.
    async fn execute(&mut self, sql: &str) -> Result<(), SessionError>;

    fn server_version(&self) -> Version;

    fn connection_id(&self) -> u64;

    fn is_open(&self) -> bool;

    /// Connection target without credentials, for log messages.
    fn describe(&self) -> String;

    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens new sessions against the same target.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, SessionError>;
}

/// First column of the first row, `None` when the result is empty.
pub async fn query_scalar<T: FromValue>(
    session: &mut dyn Session,
    sql: &str,
) -> Result<Option<T>, SessionError> {
    let result = session.query(sql).await?;
    match result.first() {
        Some(row) => row.get::<T>(0).map(Some),
        None => Ok(None),
    }
}
