//! Shared building blocks for talking to a MySQL server.
//!
//! Everything above this crate treats the server connection as an opaque
//! [`Session`]: it can run a query, execute a statement, report its server
//! version and whether it is still open. The production implementation is
//! [`MysqlSession`] (backed by `mysql_async`); tests use the scripted
//! doubles from `testing` (behind the `testing` feature).
//!
//! User-facing output goes through the injected [`Console`] reporter rather
//! than a process-wide singleton.

mod console;
mod error;
mod mysql;
mod session;
pub mod sql;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod value;
mod version;

pub use console::{Console, TracingConsole};
pub use error::{codes, SessionError};
pub use mysql::{sanitize_uri, MysqlSession, MysqlSessionFactory};
pub use session::{query_scalar, RowStream, Session, SessionFactory};
pub use value::{Column, ColumnKind, FromValue, ResultSet, Row, Value};
pub use version::{ParseVersionError, Version};
