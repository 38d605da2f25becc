//! Parallel, chunked logical dump of a MySQL instance.
//!
//! The main session takes a consistent snapshot ([`consistency`]), reads the
//! instance ([`cache`]) and queues work for a pool of workers: DDL scripts
//! ([`ddl`]), table metadata ([`metadata`]), range computation ([`chunker`])
//! and data files written row by row ([`writer`]). [`Dumper::run`] drives the
//! whole dump into a [`dump_storage::Directory`].

pub mod cache;
pub mod chunker;
pub mod consistency;
pub mod ddl;
mod dumper;
mod error;
pub mod filenames;
pub mod index_file;
pub mod metadata;
mod options;
pub mod progress;
pub mod queue;
pub mod throttle;
mod worker;
pub mod writer;

pub use dumper::{DumpSummary, Dumper, InterruptHandle};
pub use error::{DumpError, Result};
pub use options::{
    Dialect, DumpOptions, Filters, TableFilter, DEFAULT_BYTES_PER_CHUNK, DEFAULT_THREADS,
    MIN_BYTES_PER_CHUNK,
};
