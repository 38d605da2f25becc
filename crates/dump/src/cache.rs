//! Snapshot of the instance objects a dump works on.
//!
//! Built once from `information_schema` on the main session while the read
//! lock is held, then shared read-only with the workers.

use std::collections::BTreeMap;
use std::fmt;

use shell_core::sql::{quote_identifier_list, quote_string};
use shell_core::{ColumnKind, Session, Version};
use tracing::debug;

use crate::error::Result;
use crate::options::{DumpOptions, Filters};

/// Schemas never dumped by an instance dump.
pub const SYSTEM_SCHEMAS: [&str; 5] = [
    "information_schema",
    "mysql",
    "ndbinfo",
    "performance_schema",
    "sys",
];

/// Accounts created by the server itself.
const SYSTEM_ACCOUNTS: [&str; 3] = ["mysql.infoschema", "mysql.session", "mysql.sys"];

/// Tables whose data is never dumped.
const SKIPPED_DATA_TABLES: [&str; 4] = ["apply_status", "general_log", "schema", "slow_log"];

pub fn should_dump_data(schema: &str, table: &str) -> bool {
    !(schema == "mysql" && SKIPPED_DATA_TABLES.contains(&table))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// `information_schema.COLUMNS.DATA_TYPE`, lower case.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_ascii_lowercase(),
        }
    }

    /// Binary values that cannot be written to a text file as is.
    pub fn csv_unsafe(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "binary"
                | "varbinary"
                | "tinyblob"
                | "blob"
                | "mediumblob"
                | "longblob"
                | "bit"
                | "geometry"
                | "point"
                | "linestring"
                | "polygon"
                | "multipoint"
                | "multilinestring"
                | "multipolygon"
                | "geometrycollection"
                | "geomcollection"
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
        )
    }

    pub fn kind(&self) -> ColumnKind {
        match self.data_type.as_str() {
            _ if self.is_integer() => ColumnKind::Integer,
            "decimal" | "numeric" => ColumnKind::Decimal,
            "float" | "double" | "real" => ColumnKind::Float,
            "date" | "datetime" | "timestamp" | "year" => ColumnKind::Date,
            "time" => ColumnKind::Time,
            "json" => ColumnKind::Json,
            _ if self.csv_unsafe() => ColumnKind::Bytes,
            _ => ColumnKind::String,
        }
    }
}

/// Index used to split a table into ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub primary: bool,
}

impl IndexInfo {
    /// Column the ranges are built on.
    pub fn first_column(&self) -> &str {
        &self.columns[0]
    }

    /// `ORDER BY` list for the whole index.
    pub fn order_by(&self) -> String {
        quote_identifier_list(&self.columns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
    pub average_row_length: u64,
    pub columns: Vec<ColumnInfo>,
    pub index: Option<IndexInfo>,
    pub triggers: Vec<String>,
}

impl TableInfo {
    pub fn index_column(&self) -> Option<&ColumnInfo> {
        let index = self.index.as_ref()?;
        self.columns.iter().find(|c| c.name == index.first_column())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewInfo {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaInfo {
    pub name: String,
    pub tables: Vec<TableInfo>,
    pub views: Vec<ViewInfo>,
    pub events: Vec<String>,
    pub functions: Vec<String>,
    pub procedures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user: String,
    pub host: String,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", quote_string(&self.user), quote_string(&self.host))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub user: String,
    pub hostname: String,
    pub server: String,
    pub version: Version,
    pub version_string: String,
    pub gtid_executed: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCache {
    pub schemas: Vec<SchemaInfo>,
    pub server: ServerInfo,
    pub users: Vec<Account>,
}

impl InstanceCache {
    /// Everything needed to dump the objects selected by `options`.
    pub async fn build(session: &mut dyn Session, options: &DumpOptions) -> Result<Self> {
        let mut builder = Builder::new(session, &options.filters).await?;
        builder.tables().await?;
        builder.columns().await?;
        builder.indexes().await?;
        if options.triggers && options.ddl {
            builder.triggers().await?;
        }
        if options.events && options.ddl {
            builder.events().await?;
        }
        if options.routines && options.ddl {
            builder.routines().await?;
        }
        let users = if options.users && options.ddl {
            builder.users().await?
        } else {
            Vec::new()
        };
        let server = builder.server().await?;
        Ok(Self {
            schemas: builder.finish(),
            server,
            users,
        })
    }

    /// Schemas and table names only, as needed to lock tables.
    pub async fn build_minimal(session: &mut dyn Session, filters: &Filters) -> Result<Self> {
        let mut builder = Builder::new(session, filters).await?;
        builder.tables().await?;
        let server = builder.server().await?;
        Ok(Self {
            schemas: builder.finish(),
            server,
            users: Vec::new(),
        })
    }

    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    pub fn view_count(&self) -> usize {
        self.schemas.iter().map(|s| s.views.len()).sum()
    }
}

struct Builder<'a> {
    session: &'a mut dyn Session,
    filters: &'a Filters,
    schemas: BTreeMap<String, SchemaInfo>,
}

impl<'a> Builder<'a> {
    async fn new(session: &'a mut dyn Session, filters: &'a Filters) -> Result<Builder<'a>> {
        let result = session
            .query("SELECT SCHEMA_NAME FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME")
            .await?;
        let mut schemas = BTreeMap::new();
        for row in &result.rows {
            let name: String = row.get(0)?;
            if SYSTEM_SCHEMAS.contains(&name.as_str()) || !filters.includes_schema(&name) {
                continue;
            }
            schemas.insert(
                name.clone(),
                SchemaInfo {
                    name,
                    ..Default::default()
                },
            );
        }
        debug!("{} schemas selected for dump", schemas.len());
        Ok(Self {
            session,
            filters,
            schemas,
        })
    }

    /// `TABLE_SCHEMA IN (...)` condition, `None` when nothing is selected.
    fn schema_condition(&self, column: &str) -> Option<String> {
        if self.schemas.is_empty() {
            return None;
        }
        let names = self
            .schemas
            .keys()
            .map(|s| quote_string(s))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{column} IN ({names})"))
    }

    fn table_mut(&mut self, schema: &str, table: &str) -> Option<&mut TableInfo> {
        self.schemas
            .get_mut(schema)?
            .tables
            .iter_mut()
            .find(|t| t.name == table)
    }

    async fn tables(&mut self) -> Result<()> {
        let Some(condition) = self.schema_condition("TABLE_SCHEMA") else {
            return Ok(());
        };
        let result = self
            .session
            .query(&format!(
                "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE, TABLE_ROWS, AVG_ROW_LENGTH \
                 FROM information_schema.TABLES WHERE {condition} \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME"
            ))
            .await?;
        for row in &result.rows {
            let schema: String = row.get(0)?;
            let name: String = row.get(1)?;
            let table_type: String = row.get(2)?;
            if !self.filters.includes_table(&schema, &name) {
                continue;
            }
            let Some(info) = self.schemas.get_mut(&schema) else {
                continue;
            };
            if table_type == "VIEW" {
                info.views.push(ViewInfo {
                    name,
                    columns: Vec::new(),
                });
            } else {
                info.tables.push(TableInfo {
                    name,
                    row_count: row.get::<Option<u64>>(3)?.unwrap_or(0),
                    average_row_length: row.get::<Option<u64>>(4)?.unwrap_or(0),
                    columns: Vec::new(),
                    index: None,
                    triggers: Vec::new(),
                });
            }
        }
        Ok(())
    }

    async fn columns(&mut self) -> Result<()> {
        let Some(condition) = self.schema_condition("TABLE_SCHEMA") else {
            return Ok(());
        };
        let result = self
            .session
            .query(&format!(
                "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE \
                 FROM information_schema.COLUMNS WHERE {condition} \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION"
            ))
            .await?;
        for row in &result.rows {
            let schema: String = row.get(0)?;
            let table: String = row.get(1)?;
            let column = ColumnInfo::new(row.get::<String>(2)?, row.get::<String>(3)?);
            if let Some(info) = self.table_mut(&schema, &table) {
                info.columns.push(column);
            } else if let Some(view) = self
                .schemas
                .get_mut(&schema)
                .and_then(|s| s.views.iter_mut().find(|v| v.name == table))
            {
                view.columns.push(column.name);
            }
        }
        Ok(())
    }

    /// PRIMARY KEY, else the UNIQUE index with the fewest columns, all NOT NULL.
    async fn indexes(&mut self) -> Result<()> {
        let Some(condition) = self.schema_condition("TABLE_SCHEMA") else {
            return Ok(());
        };
        let result = self
            .session
            .query(&format!(
                "SELECT TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, COLUMN_NAME, NULLABLE \
                 FROM information_schema.STATISTICS WHERE NON_UNIQUE = 0 AND {condition} \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX"
            ))
            .await?;

        // (schema, table) -> index -> (columns, all columns NOT NULL)
        let mut candidates: BTreeMap<(String, String), BTreeMap<String, (Vec<String>, bool)>> =
            BTreeMap::new();
        for row in &result.rows {
            let schema: String = row.get(0)?;
            let table: String = row.get(1)?;
            let index: String = row.get(2)?;
            let column: String = row.get(3)?;
            let nullable = row.get::<Option<String>>(4)?.unwrap_or_default() == "YES";
            let entry = candidates
                .entry((schema, table))
                .or_default()
                .entry(index)
                .or_insert_with(|| (Vec::new(), true));
            entry.0.push(column);
            entry.1 &= !nullable;
        }

        for ((schema, table), indexes) in candidates {
            let chosen = match indexes.get("PRIMARY") {
                Some((columns, _)) => Some(IndexInfo {
                    name: "PRIMARY".to_string(),
                    columns: columns.clone(),
                    primary: true,
                }),
                None => indexes
                    .iter()
                    .filter(|(_, (_, not_null))| *not_null)
                    .min_by_key(|(_, (columns, _))| columns.len())
                    .map(|(name, (columns, _))| IndexInfo {
                        name: name.clone(),
                        columns: columns.clone(),
                        primary: false,
                    }),
            };
            if let Some(info) = self.table_mut(&schema, &table) {
                info.index = chosen;
            }
        }
        Ok(())
    }

    async fn triggers(&mut self) -> Result<()> {
        let Some(condition) = self.schema_condition("TRIGGER_SCHEMA") else {
            return Ok(());
        };
        let result = self
            .session
            .query(&format!(
                "SELECT TRIGGER_SCHEMA, EVENT_OBJECT_TABLE, TRIGGER_NAME \
                 FROM information_schema.TRIGGERS WHERE {condition} \
                 ORDER BY TRIGGER_SCHEMA, EVENT_OBJECT_TABLE, ACTION_ORDER"
            ))
            .await?;
        for row in &result.rows {
            let schema: String = row.get(0)?;
            let table: String = row.get(1)?;
            let trigger: String = row.get(2)?;
            if let Some(info) = self.table_mut(&schema, &table) {
                info.triggers.push(trigger);
            }
        }
        Ok(())
    }

    async fn events(&mut self) -> Result<()> {
        let Some(condition) = self.schema_condition("EVENT_SCHEMA") else {
            return Ok(());
        };
        let result = self
            .session
            .query(&format!(
                "SELECT EVENT_SCHEMA, EVENT_NAME FROM information_schema.EVENTS \
                 WHERE {condition} ORDER BY EVENT_SCHEMA, EVENT_NAME"
            ))
            .await?;
        for row in &result.rows {
            let schema: String = row.get(0)?;
            if let Some(info) = self.schemas.get_mut(&schema) {
                info.events.push(row.get(1)?);
            }
        }
        Ok(())
    }

    async fn routines(&mut self) -> Result<()> {
        let Some(condition) = self.schema_condition("ROUTINE_SCHEMA") else {
            return Ok(());
        };
        let result = self
            .session
            .query(&format!(
                "SELECT ROUTINE_SCHEMA, ROUTINE_NAME, ROUTINE_TYPE FROM information_schema.ROUTINES \
                 WHERE {condition} ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME"
            ))
            .await?;
        for row in &result.rows {
            let schema: String = row.get(0)?;
            let name: String = row.get(1)?;
            let routine_type: String = row.get(2)?;
            if let Some(info) = self.schemas.get_mut(&schema) {
                if routine_type == "FUNCTION" {
                    info.functions.push(name);
                } else {
                    info.procedures.push(name);
                }
            }
        }
        Ok(())
    }

    async fn users(&mut self) -> Result<Vec<Account>> {
        let result = self
            .session
            .query("SELECT User, Host FROM mysql.user ORDER BY User, Host")
            .await?;
        let mut users = Vec::new();
        for row in &result.rows {
            let user: String = row.get(0)?;
            if SYSTEM_ACCOUNTS.contains(&user.as_str()) {
                continue;
            }
            users.push(Account {
                user,
                host: row.get(1)?,
            });
        }
        Ok(users)
    }

    async fn server(&mut self) -> Result<ServerInfo> {
        let result = self
            .session
            .query("SELECT CURRENT_USER(), @@hostname, @@version, @@GLOBAL.gtid_executed")
            .await?;
        let (user, hostname, version_string, gtid_executed) = match result.first() {
            Some(row) => (
                row.get::<Option<String>>(0)?.unwrap_or_default(),
                row.get::<Option<String>>(1)?.unwrap_or_default(),
                row.get::<Option<String>>(2)?.unwrap_or_default(),
                row.get::<Option<String>>(3)?.unwrap_or_default(),
            ),
            None => Default::default(),
        };
        Ok(ServerInfo {
            user,
            hostname,
            server: self.session.describe(),
            version: self.session.server_version(),
            version_string: if version_string.is_empty() {
                self.session.server_version().to_string()
            } else {
                version_string
            },
            gtid_executed,
        })
    }

    fn finish(self) -> Vec<SchemaInfo> {
        self.schemas.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shell_core::testing::{result, Script};

    fn script() -> Script {
        let script = Script::new();
        script
            .on(
                "information_schema.SCHEMATA",
                result(
                    &["SCHEMA_NAME"],
                    vec![vec!["app"], vec!["mysql"], vec!["scratch"], vec!["sys"]],
                ),
            )
            .on(
                "information_schema.TABLES",
                result(
                    &["TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE", "TABLE_ROWS", "AVG_ROW_LENGTH"],
                    vec![
                        vec![Some("app"), Some("orders"), Some("BASE TABLE"), Some("1000"), Some("80")],
                        vec![Some("app"), Some("tags"), Some("BASE TABLE"), None, None],
                        vec![Some("app"), Some("v_orders"), Some("VIEW"), None, None],
                        vec![Some("scratch"), Some("tmp"), Some("BASE TABLE"), Some("1"), Some("10")],
                    ],
                ),
            )
            .on(
                "information_schema.COLUMNS",
                result(
                    &["TABLE_SCHEMA", "TABLE_NAME", "COLUMN_NAME", "DATA_TYPE"],
                    vec![
                        vec!["app", "orders", "id", "bigint"],
                        vec!["app", "orders", "payload", "BLOB"],
                        vec!["app", "tags", "name", "varchar"],
                        vec!["app", "tags", "code", "char"],
                        vec!["app", "v_orders", "id", "bigint"],
                    ],
                ),
            )
            .on(
                "information_schema.STATISTICS",
                result(
                    &["TABLE_SCHEMA", "TABLE_NAME", "INDEX_NAME", "COLUMN_NAME", "NULLABLE"],
                    vec![
                        vec!["app", "orders", "PRIMARY", "id", ""],
                        vec!["app", "orders", "uk_payload", "payload", "YES"],
                        vec!["app", "tags", "uk_both", "name", ""],
                        vec!["app", "tags", "uk_both", "code", ""],
                        vec!["app", "tags", "uk_code", "code", ""],
                        vec!["app", "tags", "uk_nullable", "name", "YES"],
                    ],
                ),
            )
            .on(
                "information_schema.TRIGGERS",
                result(
                    &["TRIGGER_SCHEMA", "EVENT_OBJECT_TABLE", "TRIGGER_NAME"],
                    vec![vec!["app", "orders", "orders_bi"]],
                ),
            )
            .on(
                "information_schema.ROUTINES",
                result(
                    &["ROUTINE_SCHEMA", "ROUTINE_NAME", "ROUTINE_TYPE"],
                    vec![vec!["app", "total", "FUNCTION"], vec!["app", "purge", "PROCEDURE"]],
                ),
            )
            .on(
                "mysql.user",
                result(
                    &["User", "Host"],
                    vec![vec!["app", "%"], vec!["mysql.sys", "localhost"]],
                ),
            )
            .on(
                "CURRENT_USER()",
                result(
                    &["u", "h", "v", "g"],
                    vec![vec!["root@%", "db1", "8.0.36", "uuid:1-10"]],
                ),
            );
        script
    }

    #[tokio::test]
    async fn test_build_full_cache() {
        let script = script();
        let mut session = script.session();
        let options = DumpOptions {
            filters: Filters {
                exclude_schemas: vec!["scratch".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let cache = InstanceCache::build(&mut session, &options).await.unwrap();

        assert_eq!(cache.schemas.len(), 1);
        let app = &cache.schemas[0];
        assert_eq!(app.name, "app");
        assert_eq!(app.tables.len(), 2);
        assert_eq!(app.views[0].columns, vec!["id".to_string()]);
        assert_eq!(app.functions, vec!["total".to_string()]);
        assert_eq!(app.procedures, vec!["purge".to_string()]);

        let orders = &app.tables[0];
        assert_eq!(orders.row_count, 1000);
        assert_eq!(orders.average_row_length, 80);
        assert!(orders.index.as_ref().unwrap().primary);
        assert!(orders.index_column().unwrap().is_integer());
        assert!(orders.columns[1].csv_unsafe());
        assert_eq!(orders.triggers, vec!["orders_bi".to_string()]);

        let tags = &app.tables[1];
        assert_eq!(tags.row_count, 0);
        let index = tags.index.as_ref().unwrap();
        assert_eq!(index.name, "uk_code");
        assert_eq!(index.order_by(), "`code`");

        assert_eq!(cache.users.len(), 1);
        assert_eq!(cache.users[0].to_string(), "'app'@'%'");
        assert_eq!(cache.server.gtid_executed, "uuid:1-10");
        assert_eq!(cache.server.user, "root@%");

        // the filtered schema never reaches the IN lists
        assert!(script
            .statements()
            .iter()
            .all(|sql| !sql.contains("'scratch'")));
    }

    #[tokio::test]
    async fn test_minimal_cache() {
        let script = script();
        let mut session = script.session();
        let cache = InstanceCache::build_minimal(&mut session, &Filters::default())
            .await
            .unwrap();
        assert_eq!(cache.table_count(), 3);
        assert_eq!(cache.view_count(), 1);
        assert_eq!(script.count("information_schema.COLUMNS"), 0);
    }

    #[test]
    fn test_should_dump_data() {
        assert!(!should_dump_data("mysql", "general_log"));
        assert!(should_dump_data("mysql", "user"));
        assert!(should_dump_data("app", "slow_log"));
    }
}
