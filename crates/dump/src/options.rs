//! Options of a dump run.

use std::str::FromStr;

use dump_storage::Compression;

use crate::error::{DumpError, Result};

pub const MIN_BYTES_PER_CHUNK: u64 = 128 * 1024;
pub const DEFAULT_BYTES_PER_CHUNK: u64 = 64 * 1024 * 1024;
pub const DEFAULT_THREADS: usize = 4;

/// Field and line formatting of data files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub fields_terminated_by: String,
    pub fields_enclosed_by: String,
    pub fields_optionally_enclosed: bool,
    pub fields_escaped_by: String,
    pub lines_terminated_by: String,
    extension: &'static str,
}

impl Dialect {
    /// Tab separated, unquoted, `\n` terminated.
    pub fn default_dialect() -> Self {
        Self {
            fields_terminated_by: "\t".to_string(),
            fields_enclosed_by: String::new(),
            fields_optionally_enclosed: false,
            fields_escaped_by: "\\".to_string(),
            lines_terminated_by: "\n".to_string(),
            extension: "tsv",
        }
    }

    pub fn tsv() -> Self {
        Self {
            fields_terminated_by: "\t".to_string(),
            fields_enclosed_by: "\"".to_string(),
            fields_optionally_enclosed: true,
            fields_escaped_by: "\\".to_string(),
            lines_terminated_by: "\r\n".to_string(),
            extension: "tsv",
        }
    }

    pub fn csv() -> Self {
        Self {
            fields_terminated_by: ",".to_string(),
            fields_enclosed_by: "\"".to_string(),
            fields_optionally_enclosed: true,
            fields_escaped_by: "\\".to_string(),
            lines_terminated_by: "\r\n".to_string(),
            extension: "csv",
        }
    }

    pub fn csv_unix() -> Self {
        Self {
            fields_terminated_by: ",".to_string(),
            fields_enclosed_by: "\"".to_string(),
            fields_optionally_enclosed: false,
            fields_escaped_by: "\\".to_string(),
            lines_terminated_by: "\n".to_string(),
            extension: "csv",
        }
    }

    /// Extension of data files, without the compression suffix.
    pub fn extension(&self) -> &'static str {
        self.extension
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::default_dialect()
    }
}

impl FromStr for Dialect {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::default_dialect()),
            "tsv" => Ok(Self::tsv()),
            "csv" => Ok(Self::csv()),
            "csv-unix" => Ok(Self::csv_unix()),
            other => Err(DumpError::invalid_option(format!(
                "The 'dialect' option must be one of: default, csv, tsv, csv-unix, got '{other}'"
            ))),
        }
    }
}

/// A `schema.table` filter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFilter {
    pub schema: String,
    pub table: String,
}

impl FromStr for TableFilter {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self> {
        let err = || {
            DumpError::invalid_option(format!(
                "Can't parse table filter '{s}'. The table must be in the following form: \
                 schema.table, with optional backtick quotes."
            ))
        };
        let (schema, rest) = split_identifier(s).ok_or_else(err)?;
        let rest = rest.strip_prefix('.').ok_or_else(err)?;
        let (table, rest) = split_identifier(rest).ok_or_else(err)?;
        if !rest.is_empty() || schema.is_empty() || table.is_empty() {
            return Err(err());
        }
        Ok(Self { schema, table })
    }
}

/// Takes one identifier off the front of `s`, unquoting backticks.
fn split_identifier(s: &str) -> Option<(String, &str)> {
    if let Some(rest) = s.strip_prefix('`') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '`' {
                if let Some((_, '`')) = chars.peek() {
                    chars.next();
                    name.push('`');
                } else {
                    return Some((name, &rest[i + 1..]));
                }
            } else {
                name.push(c);
            }
        }
        None
    } else {
        let end = s.find('.').unwrap_or(s.len());
        Some((s[..end].to_string(), &s[end..]))
    }
}

/// Which objects end up in the dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
    pub include_tables: Vec<TableFilter>,
    pub exclude_tables: Vec<TableFilter>,
}

impl Filters {
    pub fn includes_schema(&self, schema: &str) -> bool {
        if self.exclude_schemas.iter().any(|s| s == schema) {
            return false;
        }
        self.include_schemas.is_empty() || self.include_schemas.iter().any(|s| s == schema)
    }

    pub fn includes_table(&self, schema: &str, table: &str) -> bool {
        let matches = |f: &TableFilter| f.schema == schema && f.table == table;
        if self.exclude_tables.iter().any(matches) {
            return false;
        }
        self.include_tables.is_empty() || self.include_tables.iter().any(matches)
    }
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub threads: usize,
    pub bytes_per_chunk: u64,
    pub split: bool,
    pub consistent: bool,
    pub dry_run: bool,
    pub compression: Compression,
    pub dialect: Dialect,
    pub character_set: String,
    pub tz_utc: bool,
    pub ddl: bool,
    pub data: bool,
    pub users: bool,
    pub events: bool,
    pub routines: bool,
    pub triggers: bool,
    pub filters: Filters,
    /// Bytes per second per worker, 0 for unlimited.
    pub max_rate: u64,
    pub base64: bool,
    pub show_progress: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            bytes_per_chunk: DEFAULT_BYTES_PER_CHUNK,
            split: true,
            consistent: true,
            dry_run: false,
            compression: Compression::default(),
            dialect: Dialect::default(),
            character_set: "utf8mb4".to_string(),
            tz_utc: true,
            ddl: true,
            data: true,
            users: true,
            events: true,
            routines: true,
            triggers: true,
            filters: Filters::default(),
            max_rate: 0,
            base64: true,
            show_progress: false,
        }
    }
}

impl DumpOptions {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(DumpError::invalid_option(
                "The value of 'threads' option must be greater than 0.",
            ));
        }
        if self.split && self.bytes_per_chunk < MIN_BYTES_PER_CHUNK {
            return Err(DumpError::invalid_option(
                "The value of 'bytesPerChunk' option must be greater than or equal to 128k.",
            ));
        }
        if !self.ddl && !self.data {
            return Err(DumpError::invalid_option(
                "The 'ddlOnly' and 'dataOnly' options cannot be both set to true.",
            ));
        }
        if self.character_set.trim().is_empty() {
            return Err(DumpError::invalid_option(
                "The value of 'defaultCharacterSet' option cannot be empty.",
            ));
        }
        if let Some(filter) = self
            .filters
            .include_schemas
            .iter()
            .find(|s| self.filters.exclude_schemas.contains(s))
        {
            return Err(DumpError::invalid_option(format!(
                "Schema `{filter}` is both included and excluded."
            )));
        }
        Ok(())
    }

    /// Extension of data files, including the compression suffix.
    pub fn data_extension(&self) -> String {
        match self.compression.extension() {
            "" => self.dialect.extension().to_string(),
            compression => format!("{}.{compression}", self.dialect.extension()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = DumpOptions::default();
        options.validate().unwrap();
        assert_eq!(options.data_extension(), "tsv.gz");
    }

    #[test]
    fn test_bytes_per_chunk_minimum() {
        let options = DumpOptions {
            bytes_per_chunk: 1000,
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("128k"));

        let unsplit = DumpOptions {
            bytes_per_chunk: 1000,
            split: false,
            ..Default::default()
        };
        unsplit.validate().unwrap();
    }

    #[test]
    fn test_zero_threads_rejected() {
        let options = DumpOptions {
            threads: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_dialects() {
        let csv: Dialect = "csv".parse().unwrap();
        assert_eq!(csv.fields_terminated_by, ",");
        assert_eq!(csv.lines_terminated_by, "\r\n");
        assert_eq!(csv.extension(), "csv");
        assert!("json".parse::<Dialect>().is_err());

        let options = DumpOptions {
            dialect: Dialect::csv_unix(),
            compression: Compression::None,
            ..Default::default()
        };
        assert_eq!(options.data_extension(), "csv");
    }

    #[test]
    fn test_table_filter_parse() {
        let f: TableFilter = "sakila.actor".parse().unwrap();
        assert_eq!(f.schema, "sakila");
        assert_eq!(f.table, "actor");

        let f: TableFilter = "`my.db`.`we``ird`".parse().unwrap();
        assert_eq!(f.schema, "my.db");
        assert_eq!(f.table, "we`ird");

        assert!("sakila".parse::<TableFilter>().is_err());
        assert!("a.b.c".parse::<TableFilter>().is_err());
        assert!("`open.t".parse::<TableFilter>().is_err());
    }

    #[test]
    fn test_filters() {
        let filters = Filters {
            exclude_schemas: vec!["tmp".to_string()],
            include_tables: vec!["app.users".parse().unwrap()],
            exclude_tables: vec!["other.log".parse().unwrap()],
            ..Default::default()
        };
        assert!(!filters.includes_schema("tmp"));
        assert!(filters.includes_schema("app"));
        assert!(filters.includes_table("app", "users"));
        assert!(!filters.includes_table("app", "orders"));
        assert!(!filters.includes_table("other", "users"));
        assert!(!filters.includes_table("other", "log"));
    }
}
