//! mysql-admin library
//!
//! Command-line glue around the workspace crates: connection options, the
//! arguments of `dump-instance`, byte size parsing and the terminal console.
//!
//! # CLI Usage
//!
//! ```bash
//! # Classify the target instance
//! mysql-admin --uri mysql://root@db1:3306 classify
//!
//! # Check whether an AdminAPI operation may run against the target
//! mysql-admin --uri mysql://root@db1:3306 check Cluster.addInstance
//!
//! # Dump the whole instance with 8 threads, 32M chunks
//! mysql-admin dump-instance /backups/db1 --threads 8 --bytes-per-chunk 32M
//! ```

use anyhow::Context;
use clap::Parser;
use dump::{Dialect, DumpOptions, Filters, TableFilter};
use dump_storage::Compression;

pub mod config;
pub mod console;

pub use config::parse_size;
pub use console::TerminalConsole;

#[derive(Parser, Clone, Debug)]
pub struct ConnectionOpts {
    /// MySQL connection URI
    #[arg(long, default_value = "mysql://root@localhost:3306", env = "MYSQL_URI")]
    pub uri: String,
}

/// Arguments of `dump-instance`.
#[derive(Parser, Clone, Debug)]
pub struct DumpArgs {
    /// Output directory (plain path or file:// URL); must not exist or be empty
    pub output_url: String,

    /// Number of parallel worker sessions
    #[arg(long, default_value_t = dump::DEFAULT_THREADS)]
    pub threads: usize,

    /// Approximate size of each data chunk (e.g. "64M", "512k")
    #[arg(long, default_value = "64M")]
    pub bytes_per_chunk: String,

    /// Dump each table into a single data file
    #[arg(long)]
    pub no_chunking: bool,

    /// Do not lock the instance for a consistent snapshot
    #[arg(long)]
    pub skip_consistency: bool,

    /// Print what would be dumped without writing any file
    #[arg(long)]
    pub dry_run: bool,

    /// Data file compression: gzip or none
    #[arg(long, default_value = "gzip")]
    pub compression: String,

    /// Data file format: default, csv, tsv or csv-unix
    #[arg(long, default_value = "default")]
    pub dialect: String,

    /// Character set of every dump session
    #[arg(long, default_value = "utf8mb4")]
    pub default_character_set: String,

    /// Keep the server time zone instead of dumping in UTC
    #[arg(long)]
    pub no_tz_utc: bool,

    /// Dump only DDL
    #[arg(long, conflicts_with = "data_only")]
    pub ddl_only: bool,

    /// Dump only table data
    #[arg(long)]
    pub data_only: bool,

    /// Skip user accounts and grants
    #[arg(long)]
    pub no_users: bool,

    /// Skip events
    #[arg(long)]
    pub no_events: bool,

    /// Skip stored procedures and functions
    #[arg(long)]
    pub no_routines: bool,

    /// Skip triggers
    #[arg(long)]
    pub no_triggers: bool,

    /// Schemas to dump (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub include_schemas: Vec<String>,

    /// Schemas to skip (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_schemas: Vec<String>,

    /// Tables to dump, as schema.table (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub include_tables: Vec<String>,

    /// Tables to skip, as schema.table (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_tables: Vec<String>,

    /// Per-thread throughput limit in bytes per second (e.g. "10M"), 0 for none
    #[arg(long, default_value = "0")]
    pub max_rate: String,

    /// Encode binary columns with HEX() instead of TO_BASE64()
    #[arg(long)]
    pub hex: bool,

    /// Print progress while dumping
    #[arg(long)]
    pub show_progress: bool,
}

impl DumpArgs {
    /// Converts the arguments into [`DumpOptions`]. Range checks are left to
    /// [`DumpOptions::validate`].
    pub fn to_options(&self) -> anyhow::Result<DumpOptions> {
        let bytes_per_chunk = parse_size(&self.bytes_per_chunk)
            .context("Invalid value for --bytes-per-chunk")?;
        let max_rate = parse_size(&self.max_rate).context("Invalid value for --max-rate")?;
        let compression: Compression = self.compression.parse()?;
        let dialect: Dialect = self.dialect.parse()?;

        Ok(DumpOptions {
            threads: self.threads,
            bytes_per_chunk,
            split: !self.no_chunking,
            consistent: !self.skip_consistency,
            dry_run: self.dry_run,
            compression,
            dialect,
            character_set: self.default_character_set.clone(),
            tz_utc: !self.no_tz_utc,
            ddl: !self.data_only,
            data: !self.ddl_only,
            users: !self.no_users,
            events: !self.no_events,
            routines: !self.no_routines,
            triggers: !self.no_triggers,
            filters: Filters {
                include_schemas: self.include_schemas.clone(),
                exclude_schemas: self.exclude_schemas.clone(),
                include_tables: parse_tables(&self.include_tables)?,
                exclude_tables: parse_tables(&self.exclude_tables)?,
            },
            max_rate,
            base64: !self.hex,
            show_progress: self.show_progress,
        })
    }
}

fn parse_tables(tables: &[String]) -> anyhow::Result<Vec<TableFilter>> {
    tables
        .iter()
        .map(|t| t.parse::<TableFilter>().map_err(anyhow::Error::from))
        .collect()
}
