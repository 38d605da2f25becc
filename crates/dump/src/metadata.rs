//! JSON documents describing a dump.
//!
//! The loader relies on these field names, so they are spelled out with
//! `serde(rename_all = "camelCase")` and never renamed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DUMP_FORMAT_VERSION: &str = "1.0.2";

pub fn dumper_name() -> String {
    format!("mysql-admin {}", env!("CARGO_PKG_VERSION"))
}

/// Local time, as written in `begin` and `end`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `@.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpStarted {
    pub dumper: String,
    pub version: String,
    pub origin: String,
    pub schemas: Vec<String>,
    pub basenames: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    pub default_character_set: String,
    pub tz_utc: bool,
    pub bytes_per_chunk: u64,
    pub user: String,
    pub hostname: String,
    pub server: String,
    pub server_version: String,
    pub gtid_executed: String,
    pub gtid_executed_inconsistent: bool,
    pub consistent: bool,
    pub begin: String,
}

/// `@.done.json`, written only once all data is on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpFinished {
    pub end: String,
    pub data_bytes: u64,
    pub table_data_bytes: BTreeMap<String, BTreeMap<String, u64>>,
    pub chunk_file_bytes: BTreeMap<String, u64>,
    pub gtid_executed_inconsistent: bool,
}

/// `<schema>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMetadata {
    pub schema: String,
    pub includes_ddl: bool,
    pub includes_views_ddl: bool,
    pub includes_data: bool,
    pub tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedures: Option<Vec<String>>,
    pub basenames: BTreeMap<String, String>,
}

/// How a data file was written, as needed to load it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOptions {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    /// column -> `FROM_BASE64` or `UNHEX`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub decode_columns: BTreeMap<String, String>,
    pub primary_index: String,
    pub compression: String,
    pub default_character_set: String,
    pub fields_terminated_by: String,
    pub fields_enclosed_by: String,
    pub fields_optionally_enclosed: bool,
    pub fields_escaped_by: String,
    pub lines_terminated_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    pub column: String,
    pub buckets: u64,
}

/// `<schema>@<table>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub options: TableOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub histograms: Vec<Histogram>,
    pub includes_data: bool,
    pub includes_ddl: bool,
    pub extension: String,
    pub chunking: bool,
}

pub fn to_json<T: Serialize>(document: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        let finished = DumpFinished {
            end: "2024-01-01 00:00:00".to_string(),
            data_bytes: 10,
            table_data_bytes: BTreeMap::from([(
                "s".to_string(),
                BTreeMap::from([("t".to_string(), 10)]),
            )]),
            chunk_file_bytes: BTreeMap::from([("s@t.tsv.gz".to_string(), 10)]),
            gtid_executed_inconsistent: true,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&to_json(&finished).unwrap()).unwrap();
        assert_eq!(json["dataBytes"], 10);
        assert_eq!(json["tableDataBytes"]["s"]["t"], 10);
        assert_eq!(json["chunkFileBytes"]["s@t.tsv.gz"], 10);
        assert_eq!(json["gtidExecutedInconsistent"], true);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let schema = SchemaMetadata {
            schema: "s".to_string(),
            includes_ddl: false,
            includes_views_ddl: false,
            includes_data: true,
            tables: vec!["t".to_string()],
            views: None,
            events: None,
            functions: None,
            procedures: None,
            basenames: BTreeMap::from([("t".to_string(), "s@t".to_string())]),
        };
        let json: serde_json::Value =
            serde_json::from_slice(&to_json(&schema).unwrap()).unwrap();
        assert!(json.get("views").is_none());
        assert_eq!(json["includesViewsDdl"], false);
        assert_eq!(json["basenames"]["t"], "s@t");
    }
}
