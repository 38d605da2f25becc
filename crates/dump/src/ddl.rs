//! DDL scripts of schemas, tables, views, triggers, routines, events and
//! accounts, as read back from `SHOW CREATE ...`.

use shell_core::sql::{quote_identifier, quote_string, quote_table};
use shell_core::{Console, Session, Version};

use crate::cache::{Account, SchemaInfo, ServerInfo, ViewInfo};
use crate::error::{DumpError, Result};
use crate::metadata::{Histogram, DUMP_FORMAT_VERSION};

const HISTOGRAM_VERSION: Version = Version::new(8, 0, 0);

pub struct DdlDumper<'a> {
    session: &'a mut dyn Session,
    server: &'a ServerInfo,
    console: &'a dyn Console,
}

impl<'a> DdlDumper<'a> {
    pub fn new(session: &'a mut dyn Session, server: &'a ServerInfo, console: &'a dyn Console) -> Self {
        Self {
            session,
            server,
            console,
        }
    }

    /// Header at the top of every DDL file.
    pub fn comment(&self, schema: &str, object: &str) -> String {
        let mut out = format!(
            "-- mysql-admin dump {DUMP_FORMAT_VERSION}  Distrib mysql-admin {}\n--\n-- Host: {}",
            env!("CARGO_PKG_VERSION"),
            self.server.hostname
        );
        if !schema.is_empty() {
            out.push_str(&format!("    Database: {schema}"));
        }
        if !object.is_empty() {
            out.push_str(&format!("    Table: {object}"));
        }
        out.push_str(&format!(
            "\n-- ------------------------------------------------------\n\
             -- Server version\t{}\n\n",
            self.server.version_string
        ));
        out
    }

    /// Column `column` of the single row returned by `sql`.
    async fn show_create(&mut self, sql: &str, column: usize) -> Result<Option<String>> {
        let result = self.session.query(sql).await?;
        match result.first() {
            Some(row) => Ok(row.get::<Option<String>>(column)?),
            None => Ok(None),
        }
    }

    async fn require(&mut self, sql: &str, column: usize, what: &str) -> Result<String> {
        self.show_create(sql, column)
            .await?
            .ok_or_else(|| DumpError::runtime(format!("Failed to get the definition of {what}")))
    }

    pub async fn schema_ddl(&mut self, schema: &SchemaInfo, events: bool, routines: bool) -> Result<String> {
        let name = quote_identifier(&schema.name);
        let mut out = self.comment(&schema.name, "");
        let create = self
            .require(
                &format!("SHOW CREATE DATABASE IF NOT EXISTS {name}"),
                1,
                &format!("schema {name}"),
            )
            .await?;
        out.push_str(&format!(
            "--\n-- Current Database: {name}\n--\n\n{create};\n\n"
        ));

        if events && !schema.events.is_empty() {
            out.push_str(&format!(
                "--\n-- Dumping events for database {}\n--\n\nDELIMITER ;;\n",
                quote_string(&schema.name)
            ));
            for event in &schema.events {
                let qualified = quote_table(&schema.name, event);
                let create = self
                    .require(
                        &format!("SHOW CREATE EVENT {qualified}"),
                        3,
                        &format!("event {qualified}"),
                    )
                    .await?;
                out.push_str(&format!(
                    "DROP EVENT IF EXISTS {} ;;\n{create} ;;\n",
                    quote_identifier(event)
                ));
            }
            out.push_str("DELIMITER ;\n\n");
        }

        if routines && !(schema.functions.is_empty() && schema.procedures.is_empty()) {
            out.push_str(&format!(
                "--\n-- Dumping routines for database {}\n--\n\nDELIMITER ;;\n",
                quote_string(&schema.name)
            ));
            for (kind, names) in [("FUNCTION", &schema.functions), ("PROCEDURE", &schema.procedures)] {
                for routine in names {
                    let qualified = quote_table(&schema.name, routine);
                    let create = self
                        .require(
                            &format!("SHOW CREATE {kind} {qualified}"),
                            2,
                            &format!("{} {qualified}", kind.to_lowercase()),
                        )
                        .await?;
                    out.push_str(&format!(
                        "DROP {kind} IF EXISTS {} ;;\n{create} ;;\n",
                        quote_identifier(routine)
                    ));
                }
            }
            out.push_str("DELIMITER ;\n\n");
        }
        Ok(out)
    }

    pub async fn table_ddl(&mut self, schema: &str, table: &str) -> Result<String> {
        let qualified = quote_table(schema, table);
        let create = self
            .require(
                &format!("SHOW CREATE TABLE {qualified}"),
                1,
                &format!("table {qualified}"),
            )
            .await?;
        let create = match create.strip_prefix("CREATE TABLE ") {
            Some(rest) => format!("CREATE TABLE IF NOT EXISTS {rest}"),
            None => create,
        };
        Ok(format!(
            "{}--\n-- Table structure for table {}\n--\n\n{create};\n",
            self.comment(schema, table),
            quote_identifier(table)
        ))
    }

    pub async fn triggers_ddl(&mut self, schema: &str, table: &str, triggers: &[String]) -> Result<String> {
        let mut out = format!(
            "{}--\n-- Dumping triggers for table {}.{}\n--\n\nDELIMITER ;;\n",
            self.comment(schema, table),
            quote_string(schema),
            quote_string(table)
        );
        for trigger in triggers {
            let qualified = quote_table(schema, trigger);
            let create = self
                .require(
                    &format!("SHOW CREATE TRIGGER {qualified}"),
                    2,
                    &format!("trigger {qualified}"),
                )
                .await?;
            out.push_str(&format!(
                "DROP TRIGGER IF EXISTS {} ;;\n{create} ;;\n",
                quote_identifier(trigger)
            ));
        }
        out.push_str("DELIMITER ;\n");
        Ok(out)
    }

    /// Placeholder view with the right columns, so that views referencing
    /// each other can be created in any order.
    pub fn temporary_view_ddl(&self, schema: &str, view: &ViewInfo) -> String {
        let name = quote_identifier(&view.name);
        let columns = if view.columns.is_empty() {
            " 1 AS `1`".to_string()
        } else {
            view.columns
                .iter()
                .map(|c| format!(" 1 AS {}", quote_identifier(c)))
                .collect::<Vec<_>>()
                .join(",\n")
        };
        format!(
            "{}--\n-- Temporary view structure for view {name}\n--\n\n\
             DROP VIEW IF EXISTS {name};\nCREATE VIEW {name} AS SELECT\n{columns};\n",
            self.comment(schema, &view.name)
        )
    }

    /// `None` when the definition cannot be read; a note is printed.
    pub async fn view_ddl(&mut self, schema: &str, view: &str) -> Result<Option<String>> {
        let qualified = quote_table(schema, view);
        let create = match self.show_create(&format!("SHOW CREATE VIEW {qualified}"), 1).await {
            Ok(Some(create)) => create,
            Ok(None) => {
                self.console
                    .print_note(&format!("Could not read the definition of view {qualified}"));
                return Ok(None);
            }
            Err(DumpError::Session(e)) if e.code().is_some() => {
                self.console.print_note(&format!(
                    "Could not read the definition of view {qualified}: {e}"
                ));
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let name = quote_identifier(view);
        Ok(Some(format!(
            "{}--\n-- Final view structure for view {name}\n--\n\n\
             DROP TABLE IF EXISTS {name};\nDROP VIEW IF EXISTS {name};\n{create};\n",
            self.comment(schema, view)
        )))
    }

    pub async fn users_ddl(&mut self, users: &[Account]) -> Result<String> {
        let mut out = self.comment("", "");
        out.push_str("--\n-- Dumping user accounts\n--\n\n");
        for account in users {
            let create = self
                .require(
                    &format!("SHOW CREATE USER {account}"),
                    0,
                    &format!("account {account}"),
                )
                .await?;
            let create = match create.strip_prefix("CREATE USER ") {
                Some(rest) => format!("CREATE USER IF NOT EXISTS {rest}"),
                None => create,
            };
            out.push_str(&format!("-- begin user {account}\n{create};\n-- end user {account}\n\n"));

            let grants = self.session.query(&format!("SHOW GRANTS FOR {account}")).await?;
            out.push_str(&format!("-- begin grants {account}\n"));
            for row in &grants.rows {
                out.push_str(&row.get::<String>(0)?);
                out.push_str(";\n");
            }
            out.push_str(&format!("-- end grants {account}\n\n"));
        }
        Ok(out)
    }

    /// Histograms defined on the table; always empty before 8.0.
    pub async fn histograms(&mut self, schema: &str, table: &str) -> Result<Vec<Histogram>> {
        if self.session.server_version() < HISTOGRAM_VERSION {
            return Ok(Vec::new());
        }
        let result = self
            .session
            .query(&format!(
                "SELECT COLUMN_NAME, JSON_EXTRACT(HISTOGRAM, '$.\"number-of-buckets-specified\"') \
                 FROM information_schema.COLUMN_STATISTICS \
                 WHERE SCHEMA_NAME = {} AND TABLE_NAME = {} ORDER BY COLUMN_NAME",
                quote_string(schema),
                quote_string(table)
            ))
            .await?;
        let mut histograms = Vec::new();
        for row in &result.rows {
            histograms.push(Histogram {
                column: row.get(0)?,
                buckets: row.get::<Option<u64>>(1)?.unwrap_or(0),
            });
        }
        Ok(histograms)
    }
}
