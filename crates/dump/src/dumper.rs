//! Runs a whole instance dump: consistency, metadata, DDL and data.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dump_storage::Directory;
use futures::future::join_all;
use shell_core::sql::{quote_identifier, quote_table};
use shell_core::{Console, Session, SessionFactory};
use tracing::{debug, info};

use crate::cache::{should_dump_data, InstanceCache};
use crate::consistency::ConsistencyController;
use crate::ddl::DdlDumper;
use crate::error::{DumpError, Result};
use crate::filenames::{
    encode_name, encode_table_basename, BasenameRegistry, DUMP_FINISHED_FILE, DUMP_STARTED_FILE,
    GLOBAL_DDL_FILE, GLOBAL_POST_DDL_FILE, USERS_DDL_FILE,
};
use crate::metadata::{
    dumper_name, timestamp, to_json, DumpFinished, DumpStarted, SchemaMetadata, DUMP_FORMAT_VERSION,
};
use crate::options::DumpOptions;
use crate::progress::summary_lines;
use crate::queue::Priority;
use crate::worker::{init_session, DumpContext, SchemaTask, TableTask, Task, Worker};

/// What a finished dump wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub schemas: usize,
    pub tables: usize,
    pub views: usize,
    pub rows: u64,
    pub data_bytes: u64,
    pub bytes_written: u64,
    pub duration: Duration,
    pub gtid_executed_inconsistent: bool,
}

#[derive(Debug, Default)]
struct Produced {
    schemas: usize,
    tables: usize,
    views: usize,
    gtid_executed_inconsistent: bool,
}

pub struct Dumper {
    context: Arc<DumpContext>,
}

/// Cancels a running dump from another task, e.g. on Ctrl+C.
#[derive(Clone)]
pub struct InterruptHandle {
    context: Arc<DumpContext>,
}

impl InterruptHandle {
    pub async fn interrupt(&self) {
        let context = &self.context;
        if context.user_interrupted.swap(true, Ordering::SeqCst) {
            return;
        }
        context.console.print_warning("Interrupted by user. Canceling...");
        context.emergency_shutdown();
        kill_query(context).await;
    }
}

/// Stops the query the main session is running, if any.
async fn kill_query(context: &DumpContext) {
    let id = context.main_connection_id.load(Ordering::SeqCst);
    if id == 0 {
        return;
    }
    let killed = async {
        let mut session = context.factory.connect().await?;
        session.execute(&format!("KILL QUERY {id}")).await?;
        session.close().await
    }
    .await;
    if let Err(e) = killed {
        context
            .console
            .print_warning(&format!("Error canceling SQL query: {e}"));
    }
}

impl Dumper {
    pub fn new(
        options: DumpOptions,
        factory: Arc<dyn SessionFactory>,
        directory: Arc<dyn Directory>,
        console: Arc<dyn Console>,
    ) -> Result<Self> {
        options.validate()?;

        if directory.exists()? && !directory.list_files()?.is_empty() {
            let path = directory.full_path();
            return Err(DumpError::invalid_option(format!(
                "Cannot proceed with the dump, the specified directory '{path}' already exists \
                 at the target location {path} and is not empty."
            )));
        }

        Ok(Self {
            context: Arc::new(DumpContext::new(options, factory, directory, console)),
        })
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            context: Arc::clone(&self.context),
        }
    }

    pub async fn run(&self) -> Result<DumpSummary> {
        let context = &self.context;
        let started = Instant::now();

        let mut session = context.factory.connect().await?;
        context
            .main_connection_id
            .store(session.connection_id(), Ordering::SeqCst);
        info!("Dumping instance {}", session.describe());

        let mut workers = Vec::new();
        let produced = self.produce(&mut *session, &mut workers).await;
        if produced.is_err() {
            context.emergency_shutdown();
        }

        for (id, joined) in join_all(workers).await.into_iter().enumerate() {
            if let Err(e) = joined {
                context.console.print_error(&format!("[Worker{id:03}]: {e}"));
                context.record_worker_error(id, e.to_string());
            }
        }
        context.main_connection_id.store(0, Ordering::SeqCst);

        let result = self.complete(produced, started);
        if let Err(e) = session.close().await {
            debug!("Failed to close the main session: {e}");
        }
        result
    }

    /// Picks the error to report, or writes the final metadata.
    fn complete(&self, produced: Result<Produced>, started: Instant) -> Result<DumpSummary> {
        let context = &self.context;
        let user_interrupted = context.user_interrupted.load(Ordering::SeqCst);

        let produced = match produced {
            Err(e) if !user_interrupted => return Err(e),
            produced => produced,
        };
        if context.has_worker_errors() {
            return Err(DumpError::Fatal);
        }
        if user_interrupted {
            return Err(DumpError::Interrupted);
        }
        let produced = produced?;

        let counters = context.progress.snapshot();
        let duration = started.elapsed();
        let summary = DumpSummary {
            schemas: produced.schemas,
            tables: produced.tables,
            views: produced.views,
            rows: counters.rows,
            data_bytes: counters.data_bytes,
            bytes_written: counters.bytes_written,
            duration,
            gtid_executed_inconsistent: produced.gtid_executed_inconsistent,
        };
        if context.options.dry_run {
            return Ok(summary);
        }

        let finished = DumpFinished {
            end: timestamp(),
            data_bytes: counters.data_bytes,
            table_data_bytes: counters.table_data_bytes.clone(),
            chunk_file_bytes: context.chunk_file_bytes(),
            gtid_executed_inconsistent: produced.gtid_executed_inconsistent,
        };
        context
            .directory
            .write_file(DUMP_FINISHED_FILE, &to_json(&finished)?)?;

        let compressed = !context.options.compression.extension().is_empty();
        for line in summary_lines(&counters, duration, produced.schemas, produced.tables, compressed) {
            context.console.print_status(&line);
        }
        info!("Dump finished in {duration:?}, {} rows written", counters.rows);
        Ok(summary)
    }

    /// Everything the main session does while the workers run: locking,
    /// reading the instance, writing metadata and queueing tasks.
    async fn produce(
        &self,
        session: &mut dyn Session,
        workers: &mut Vec<tokio::task::JoinHandle<()>>,
    ) -> Result<Produced> {
        let context = &self.context;
        let options = &context.options;
        let console = &*context.console;

        init_session(session, options).await?;

        let mut consistency = ConsistencyController::new(options.consistent);
        let cache = match self.snapshot(session, &mut consistency, workers).await {
            Ok(cache) => cache,
            Err(e) => {
                if let Err(release) = consistency.release_read_locks(session, console).await {
                    debug!("Failed to release the read locks: {release}");
                }
                return Err(e);
            }
        };
        consistency.release_read_locks(session, console).await?;
        let Some(cache) = cache else {
            return Ok(Produced::default());
        };

        let server = Arc::new(cache.server.clone());
        let mut registry = BasenameRegistry::new();
        let mut schemas = Vec::new();
        let mut tables = Vec::new();
        for schema in &cache.schemas {
            let basename = registry.basename(&encode_name(&schema.name));
            for table in &schema.tables {
                tables.push(Arc::new(TableTask {
                    schema: schema.name.clone(),
                    info: table.clone(),
                    basename: registry.basename(&encode_table_basename(&schema.name, &table.name)),
                    server: Arc::clone(&server),
                }));
            }
            let view_basenames = schema
                .views
                .iter()
                .map(|v| registry.basename(&encode_table_basename(&schema.name, &v.name)))
                .collect();
            schemas.push(Arc::new(SchemaTask {
                info: schema.clone(),
                basename,
                view_basenames,
                server: Arc::clone(&server),
            }));
        }

        let produced = Produced {
            schemas: schemas.len(),
            tables: tables.len(),
            views: cache.view_count(),
            gtid_executed_inconsistent: consistency.gtid_executed_inconsistent(),
        };

        context
            .progress
            .set_total_rows(tables.iter().map(|t| t.info.row_count).sum());
        if options.data {
            for table in tables.iter().filter(|t| should_dump_data(&t.schema, &t.info.name)) {
                context.progress.add_table(&table.schema, &table.info.name);
            }
        }

        if !options.dry_run {
            self.write_metadata(&cache, &schemas, &tables, produced.gtid_executed_inconsistent)?;
        }

        if options.ddl {
            self.dump_global_ddl(session, &cache).await?;
            for schema in &schemas {
                context
                    .queue
                    .push(Task::SchemaDdl(Arc::clone(schema)), Priority::High);
                for view in 0..schema.info.views.len() {
                    context
                        .queue
                        .push(Task::ViewDdl(Arc::clone(schema), view), Priority::High);
                }
            }
            for table in &tables {
                context
                    .queue
                    .push(Task::TableDdl(Arc::clone(table)), Priority::High);
            }
        }

        for table in &tables {
            if !options.dry_run && should_dump_data(&table.schema, &table.info.name) {
                context
                    .queue
                    .push(Task::TableMetadata(Arc::clone(table)), Priority::High);
            }
            if options.data {
                self.push_table_task(table);
            }
        }
        context.producing_finished.store(true, Ordering::SeqCst);

        if !options.dry_run && !context.is_interrupted() {
            console.print_status(&format!(
                "Running data dump using {} thread{}.",
                options.threads,
                if options.threads > 1 { "s" } else { "" }
            ));
            if options.show_progress {
                console.print_note("Progress information uses estimated values and may not be accurate.");
            }
        }

        context.maybe_push_shutdown();
        Ok(produced)
    }

    /// Starts the workers under the read lock and reads the instance.
    ///
    /// `None` when the dump was interrupted before the workers started.
    async fn snapshot(
        &self,
        session: &mut dyn Session,
        consistency: &mut ConsistencyController,
        workers: &mut Vec<tokio::task::JoinHandle<()>>,
    ) -> Result<Option<InstanceCache>> {
        let context = &self.context;
        let options = &context.options;
        let console = &*context.console;

        consistency
            .acquire_read_locks(session, &options.filters, console)
            .await?;
        if context.is_interrupted() {
            return Ok(None);
        }

        for id in 0..options.threads {
            workers.push(tokio::spawn(Worker::new(id, Arc::clone(context)).run()));
        }

        console.print_status("Gathering information");
        let cache = InstanceCache::build(session, options).await?;

        let threads = u32::try_from(options.threads)
            .map_err(|_| DumpError::invalid_option("Too many threads"))?;
        context
            .sessions_ready
            .acquire_many(threads)
            .await
            .map_err(|e| DumpError::runtime(e.to_string()))?
            .forget();

        if options.consistent && !context.is_interrupted() {
            console.print_info("All transactions have been started");
            consistency.lock_instance(session, console).await?;
        }
        if !context.is_interrupted() && consistency.gtid_executed_inconsistent() {
            console.print_warning("The dumped value of gtid_executed is not guaranteed to be consistent");
        }
        Ok(Some(cache))
    }

    fn write_metadata(
        &self,
        cache: &InstanceCache,
        schemas: &[Arc<SchemaTask>],
        tables: &[Arc<TableTask>],
        gtid_executed_inconsistent: bool,
    ) -> Result<()> {
        let context = &self.context;
        let options = &context.options;
        let directory = &context.directory;

        if !directory.exists()? {
            directory.create()?;
        }

        let server = &cache.server;
        let started = DumpStarted {
            dumper: dumper_name(),
            version: DUMP_FORMAT_VERSION.to_string(),
            origin: "dumpInstance".to_string(),
            schemas: schemas.iter().map(|s| s.info.name.clone()).collect(),
            basenames: schemas
                .iter()
                .map(|s| (s.info.name.clone(), s.basename.clone()))
                .collect(),
            users: (options.users && options.ddl)
                .then(|| cache.users.iter().map(|a| a.to_string()).collect()),
            default_character_set: options.character_set.clone(),
            tz_utc: options.tz_utc,
            bytes_per_chunk: options.bytes_per_chunk,
            user: server.user.clone(),
            hostname: server.hostname.clone(),
            server: server.server.clone(),
            server_version: server.version_string.clone(),
            gtid_executed: server.gtid_executed.clone(),
            gtid_executed_inconsistent,
            consistent: options.consistent,
            begin: timestamp(),
        };
        directory.write_file(DUMP_STARTED_FILE, &to_json(&started)?)?;

        for schema in schemas {
            let info = &schema.info;
            let mut basenames: BTreeMap<String, String> = tables
                .iter()
                .filter(|t| t.schema == info.name)
                .map(|t| (t.info.name.clone(), t.basename.clone()))
                .collect();
            basenames.extend(
                info.views
                    .iter()
                    .zip(&schema.view_basenames)
                    .map(|(v, b)| (v.name.clone(), b.clone())),
            );
            let metadata = SchemaMetadata {
                schema: info.name.clone(),
                includes_ddl: options.ddl,
                includes_views_ddl: options.ddl,
                includes_data: options.data,
                tables: info.tables.iter().map(|t| t.name.clone()).collect(),
                views: options
                    .ddl
                    .then(|| info.views.iter().map(|v| v.name.clone()).collect()),
                events: (options.ddl && options.events).then(|| info.events.clone()),
                functions: (options.ddl && options.routines).then(|| info.functions.clone()),
                procedures: (options.ddl && options.routines).then(|| info.procedures.clone()),
                basenames,
            };
            directory.write_file(&format!("{}.json", schema.basename), &to_json(&metadata)?)?;
        }
        Ok(())
    }

    async fn dump_global_ddl(&self, session: &mut dyn Session, cache: &InstanceCache) -> Result<()> {
        let context = &self.context;
        let console = &*context.console;
        let mut dumper = DdlDumper::new(session, &cache.server, console);

        console.print_status("Writing global DDL files");
        let header = dumper.comment("", "");
        context.write_file(GLOBAL_DDL_FILE, header.as_bytes())?;
        context.write_file(GLOBAL_POST_DDL_FILE, header.as_bytes())?;

        if context.options.users {
            console.print_status("Writing users DDL");
            let ddl = dumper.users_ddl(&cache.users).await?;
            context.write_file(USERS_DDL_FILE, ddl.as_bytes())?;
        }
        Ok(())
    }

    fn push_table_task(&self, table: &Arc<TableTask>) {
        let context = &self.context;
        let console = &*context.console;
        let quoted = quote_table(&table.schema, &table.info.name);

        if !should_dump_data(&table.schema, &table.info.name) {
            console.print_warning(&format!("Skipping data dump for table {quoted}"));
            return;
        }
        console.print_status(&format!("Preparing data dump for table {quoted}"));

        let column = table.info.index_column().map(|c| quote_identifier(&c.name));
        match (context.options.split, column) {
            (true, None) => console.print_note(&format!(
                "Could not select a column to be used as an index for table {quoted}. \
                 Chunking has been disabled for this table, data will be dumped to a single file."
            )),
            (true, Some(column)) => console.print_status(&format!(
                "Data dump for table {quoted} will be chunked using column {column}"
            )),
            (false, None) => {
                console.print_status(&format!("Data dump for table {quoted} will not use an index"))
            }
            (false, Some(column)) => console.print_status(&format!(
                "Data dump for table {quoted} will use column {column} as an index"
            )),
        }

        if context.options.dry_run {
            return;
        }
        context.chunking_tasks.fetch_add(1, Ordering::SeqCst);
        context
            .queue
            .push(Task::Chunking(Arc::clone(table)), Priority::Medium);
    }
}
