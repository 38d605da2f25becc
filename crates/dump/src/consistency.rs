//! Consistent snapshot across the main session and all workers.
//!
//! The main session takes a global read lock while every worker starts a
//! consistent-snapshot transaction, then the lock is released. Without the
//! privilege for `FLUSH TABLES WITH READ LOCK`, every dumped table is locked
//! with `LOCK TABLES ... READ` instead, and the main session can only start
//! its transaction once those locks are gone.

use shell_core::sql::{quote_identifier, quote_string, quote_table};
use shell_core::{codes, query_scalar, Console, Session, SessionError, Version};
use tracing::{debug, warn};

use crate::cache::InstanceCache;
use crate::error::{DumpError, Result};
use crate::options::Filters;

/// Grant tables that must not change while accounts are dumped.
const MYSQL_TABLES_TO_LOCK: [&str; 11] = [
    "columns_priv",
    "db",
    "default_roles",
    "func",
    "global_grants",
    "proc",
    "procs_priv",
    "proxies_priv",
    "role_edges",
    "tables_priv",
    "user",
];

const DEFAULT_MAX_ALLOWED_PACKET: u64 = 4 * 1024 * 1024;
/// Room left in a packet for the statement around the table list.
const PACKET_OVERHEAD: u64 = 256;

const BACKUP_LOCK_VERSION: Version = Version::new(8, 0, 0);

pub async fn start_transaction(session: &mut dyn Session) -> Result<()> {
    session
        .execute("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .await?;
    session
        .execute("START TRANSACTION WITH CONSISTENT SNAPSHOT")
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    Nothing,
    GlobalReadLock,
    TableLocks,
}

#[derive(Debug)]
pub struct ConsistencyController {
    consistent: bool,
    held: Held,
    ftwrl_failed: bool,
    instance_locked: bool,
    backup_lock_checked: bool,
}

impl ConsistencyController {
    pub fn new(consistent: bool) -> Self {
        Self {
            consistent,
            held: Held::Nothing,
            ftwrl_failed: false,
            instance_locked: false,
            backup_lock_checked: false,
        }
    }

    pub fn consistent(&self) -> bool {
        self.consistent
    }

    /// Whether the fallback to table locks was used.
    pub fn ftwrl_failed(&self) -> bool {
        self.ftwrl_failed
    }

    pub fn instance_locked(&self) -> bool {
        self.instance_locked
    }

    /// `gtid_executed` read at the start may not match the snapshot.
    pub fn gtid_executed_inconsistent(&self) -> bool {
        !self.consistent || self.ftwrl_failed
    }

    /// Locks the instance for reading, before any worker starts its transaction.
    pub async fn acquire_read_locks(
        &mut self,
        session: &mut dyn Session,
        filters: &Filters,
        console: &dyn Console,
    ) -> Result<()> {
        if !self.consistent {
            return Ok(());
        }
        console.print_status("Acquiring global read lock");

        match flush_tables_with_read_lock(session).await {
            Ok(()) => {
                self.held = Held::GlobalReadLock;
                console.print_status("Global read lock acquired");
                start_transaction(session).await
            }
            Err(e) if e.is_access_denied() => {
                console.print_warning(
                    "The current user lacks privileges to acquire a global read lock using \
                     'FLUSH TABLES WITH READ LOCK'. Falling back to LOCK TABLES...",
                );
                debug!("FLUSH TABLES WITH READ LOCK failed: {e}");
                self.ftwrl_failed = true;
                self.lock_all_tables(session, filters, console).await
            }
            Err(e) => {
                console.print_error(&format!("Unable to acquire global read lock: {e}"));
                Err(DumpError::GlobalReadLock(e))
            }
        }
    }

    async fn lock_all_tables(
        &mut self,
        session: &mut dyn Session,
        filters: &Filters,
        console: &dyn Console,
    ) -> Result<()> {
        self.lock_instance(session, console).await?;

        let max_packet = query_scalar::<u64>(session, "SELECT @@max_allowed_packet")
            .await?
            .unwrap_or(DEFAULT_MAX_ALLOWED_PACKET);

        self.lock_mysql_tables(session, console).await?;

        let cache = InstanceCache::build_minimal(session, filters).await?;
        self.held = Held::TableLocks;
        for schema in &cache.schemas {
            let tables: Vec<&str> = schema
                .tables
                .iter()
                .map(|t| t.name.as_str())
                .chain(schema.views.iter().map(|v| v.name.as_str()))
                .collect();
            for statement in batch_lock_statements(&schema.name, &tables, max_packet) {
                if let Err(e) = session.execute(&statement).await {
                    console.print_error(&format!("Unable to lock tables: {e}"));
                    return Err(DumpError::LockTables(e));
                }
            }
        }
        console.print_status("Table locks acquired");
        Ok(())
    }

    async fn lock_mysql_tables(&self, session: &mut dyn Session, console: &dyn Console) -> Result<()> {
        let names = MYSQL_TABLES_TO_LOCK
            .iter()
            .map(|t| quote_string(t))
            .collect::<Vec<_>>()
            .join(", ");
        let result = session
            .query(&format!(
                "SHOW TABLES IN mysql WHERE Tables_in_mysql IN ({names})"
            ))
            .await?;
        if result.is_empty() {
            return Ok(());
        }

        let mut tables = Vec::new();
        for row in &result.rows {
            tables.push(format!("{} READ", quote_table("mysql", &row.get::<String>(0)?)));
        }
        match session
            .execute(&format!("LOCK TABLES {}", tables.join(", ")))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.code(), Some(codes::ER_DBACCESS_DENIED_ERROR | codes::ER_ACCESS_DENIED_ERROR)) => {
                console.print_warning(&format!("Could not lock mysql system tables: {e}"));
                console.print_warning(
                    "The dump will continue, but the dump may not be completely consistent if \
                     changes to accounts or routines are made during it.",
                );
                Ok(())
            }
            Err(e) => {
                console.print_error(&format!("Unable to lock tables: {e}"));
                Err(DumpError::LockTables(e))
            }
        }
    }

    /// Blocks DDL for the rest of the dump, where the server supports it.
    pub async fn lock_instance(&mut self, session: &mut dyn Session, console: &dyn Console) -> Result<()> {
        if !self.consistent || self.instance_locked || self.backup_lock_checked {
            return Ok(());
        }
        self.backup_lock_checked = true;

        if session.server_version() < BACKUP_LOCK_VERSION {
            console.print_note(
                "Backup lock is not supported in MySQL 5.7 and DDL changes will not be blocked. \
                 The dump may fail with an error or not be completely consistent if schema \
                 changes are made while dumping.",
            );
            return Ok(());
        }

        console.print_status("Locking instance for backup");
        if let Err(e) = session.execute("LOCK INSTANCE FOR BACKUP").await {
            console.print_error(&format!("Could not acquire the backup lock: {e}"));
            return Err(e.into());
        }
        self.instance_locked = true;
        Ok(())
    }

    /// Releases the read locks taken by [`Self::acquire_read_locks`].
    ///
    /// The backup lock stays until the session ends.
    pub async fn release_read_locks(&mut self, session: &mut dyn Session, console: &dyn Console) -> Result<()> {
        let held = std::mem::replace(&mut self.held, Held::Nothing);
        match held {
            Held::Nothing => return Ok(()),
            Held::GlobalReadLock => {
                session.execute("UNLOCK TABLES").await?;
                console.print_status("Global read lock has been released");
            }
            Held::TableLocks => {
                session.execute("UNLOCK TABLES").await?;
                console.print_status("Table locks have been released");
            }
        }
        if self.ftwrl_failed {
            start_transaction(session).await?;
        }
        Ok(())
    }
}

async fn flush_tables_with_read_lock(session: &mut dyn Session) -> std::result::Result<(), SessionError> {
    // shortens the time FTWRL waits for other sessions to close tables
    session.execute("FLUSH TABLES").await?;
    session.execute("FLUSH TABLES WITH READ LOCK").await
}

/// `LOCK TABLES` statements for one schema, each below the packet limit.
pub fn batch_lock_statements(schema: &str, tables: &[&str], max_packet: u64) -> Vec<String> {
    const PREFIX: &str = "LOCK TABLES ";
    let limit = max_packet.saturating_sub(PACKET_OVERHEAD) as usize;
    let mut statements = Vec::new();
    let mut statement = String::from(PREFIX);

    for table in tables {
        let entry = format!("{}.{} READ,", quote_identifier(schema), quote_identifier(table));
        if statement.len() > PREFIX.len() && statement.len() + entry.len() >= limit {
            statement.pop();
            statements.push(std::mem::replace(&mut statement, String::from(PREFIX)));
        }
        statement.push_str(&entry);
    }
    if statement.len() > PREFIX.len() {
        statement.pop();
        statements.push(statement);
    }
    if statements.len() > 1 {
        warn!(
            "Locking tables of {} with {} statements",
            quote_identifier(schema),
            statements.len()
        );
    }
    statements
}
