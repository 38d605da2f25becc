//! Worker tasks of a dump and the state they share with the main session.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dump_storage::{compress, Directory};
use shell_core::sql::{quote_identifier, quote_string, quote_table};
use shell_core::{ColumnKind, Console, Session, SessionFactory};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cache::{SchemaInfo, ServerInfo, TableInfo};
use crate::chunker::{create_ranges, query_comment, Chunk, ChunkTarget, RangeInfo};
use crate::consistency::start_transaction;
use crate::ddl::DdlDumper;
use crate::error::{DumpError, Result};
use crate::filenames::{data_filename, INDEX_SUFFIX, IN_PROGRESS_SUFFIX};
use crate::index_file::IndexFile;
use crate::metadata::{to_json, TableMetadata, TableOptions};
use crate::options::DumpOptions;
use crate::progress::{Progress, WriteResult};
use crate::queue::{Priority, TaskQueue};
use crate::throttle::Throttle;
use crate::writer::RowWriter;

/// Rows between two progress updates.
const UPDATE_EVERY: u64 = 2000;
const NET_WRITE_TIMEOUT: u64 = 30 * 60;
const WAIT_TIMEOUT: u64 = 365 * 24 * 60 * 60;

pub(crate) struct SchemaTask {
    pub info: SchemaInfo,
    pub basename: String,
    /// Basenames of `info.views`, in the same order.
    pub view_basenames: Vec<String>,
    pub server: Arc<ServerInfo>,
}

pub(crate) struct TableTask {
    pub schema: String,
    pub info: TableInfo,
    pub basename: String,
    pub server: Arc<ServerInfo>,
}

impl TableTask {
    pub fn quoted(&self) -> String {
        quote_table(&self.schema, &self.info.name)
    }

    pub fn chunked(&self, options: &DumpOptions) -> bool {
        options.split && self.info.index_column().is_some()
    }
}

pub(crate) struct DataTask {
    table: Arc<TableTask>,
    range: Option<RangeInfo>,
    include_nulls: bool,
    id: String,
    filename: String,
}

pub(crate) enum Task {
    SchemaDdl(Arc<SchemaTask>),
    ViewDdl(Arc<SchemaTask>, usize),
    TableDdl(Arc<TableTask>),
    TableMetadata(Arc<TableTask>),
    Chunking(Arc<TableTask>),
    Data(DataTask),
}

/// Everything the main session and the workers share.
pub(crate) struct DumpContext {
    pub options: DumpOptions,
    pub factory: Arc<dyn SessionFactory>,
    pub directory: Arc<dyn Directory>,
    pub console: Arc<dyn Console>,
    pub queue: TaskQueue<Task>,
    pub progress: Progress,
    /// Set on the first worker error or on user interruption.
    pub interrupted: AtomicBool,
    pub user_interrupted: AtomicBool,
    /// Released once per worker, when its session is ready or failed to open.
    pub sessions_ready: Semaphore,
    pub chunking_tasks: AtomicUsize,
    pub producing_finished: AtomicBool,
    shutdown_pushed: AtomicBool,
    pub worker_errors: Mutex<Vec<Option<String>>>,
    chunk_file_bytes: Mutex<BTreeMap<String, u64>>,
    pub main_connection_id: AtomicU64,
}

impl DumpContext {
    pub fn new(
        options: DumpOptions,
        factory: Arc<dyn SessionFactory>,
        directory: Arc<dyn Directory>,
        console: Arc<dyn Console>,
    ) -> Self {
        let progress = Progress::new(
            Arc::clone(&console),
            options.show_progress,
            !options.compression.extension().is_empty(),
        );
        let threads = options.threads;
        Self {
            options,
            factory,
            directory,
            console,
            queue: TaskQueue::new(),
            progress,
            interrupted: AtomicBool::new(false),
            user_interrupted: AtomicBool::new(false),
            sessions_ready: Semaphore::new(0),
            chunking_tasks: AtomicUsize::new(0),
            producing_finished: AtomicBool::new(false),
            shutdown_pushed: AtomicBool::new(false),
            worker_errors: Mutex::new(vec![None; threads]),
            chunk_file_bytes: Mutex::new(BTreeMap::new()),
            main_connection_id: AtomicU64::new(0),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Stops every worker once its current task completes.
    pub fn emergency_shutdown(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.queue.shutdown(self.options.threads);
    }

    /// Lets the workers exit once no more tasks can be produced.
    pub fn maybe_push_shutdown(&self) {
        if self.chunking_tasks.load(Ordering::SeqCst) == 0
            && self.producing_finished.load(Ordering::SeqCst)
            && !self.shutdown_pushed.swap(true, Ordering::SeqCst)
        {
            self.queue.shutdown(self.options.threads);
        }
    }

    fn chunking_task_finished(&self) {
        self.chunking_tasks.fetch_sub(1, Ordering::SeqCst);
        self.maybe_push_shutdown();
    }

    pub fn has_worker_errors(&self) -> bool {
        lock(&self.worker_errors).iter().any(Option::is_some)
    }

    pub fn record_worker_error(&self, id: usize, message: String) {
        let mut errors = lock(&self.worker_errors);
        if let Some(slot) = errors.get_mut(id) {
            slot.get_or_insert(message);
        }
    }

    /// Uncompressed bytes of every data file written so far.
    pub fn chunk_file_bytes(&self) -> BTreeMap<String, u64> {
        lock(&self.chunk_file_bytes).clone()
    }

    /// Writes a whole file, unless this is a dry run.
    pub fn write_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        if !self.options.dry_run {
            self.directory.write_file(name, contents)?;
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Session settings shared by the main session and the workers.
pub(crate) async fn init_session(session: &mut dyn Session, options: &DumpOptions) -> Result<()> {
    session.execute("SET SQL_MODE = ''").await?;
    session
        .execute(&format!("SET NAMES {}", quote_string(&options.character_set)))
        .await?;
    session
        .execute(&format!("SET SESSION net_write_timeout = {NET_WRITE_TIMEOUT}"))
        .await?;
    session
        .execute(&format!("SET SESSION wait_timeout = {WAIT_TIMEOUT}"))
        .await?;
    if options.tz_utc {
        session.execute("SET TIME_ZONE = '+00:00'").await?;
    }
    Ok(())
}

pub(crate) struct Worker {
    id: usize,
    context: Arc<DumpContext>,
    throttle: Throttle,
}

impl Worker {
    pub fn new(id: usize, context: Arc<DumpContext>) -> Self {
        let throttle = Throttle::new(context.options.max_rate);
        Self {
            id,
            context,
            throttle,
        }
    }

    pub async fn run(mut self) {
        let mut session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        if let Err(e) = self.process(&mut *session).await {
            self.fail(e.to_string());
        }

        if let Err(e) = session.close().await {
            debug!("Worker {} failed to close its session: {e}", self.id);
        }
    }

    async fn open_session(&self) -> Result<Box<dyn Session>> {
        let opened = async {
            let mut session = self.context.factory.connect().await?;
            if self.context.options.consistent {
                start_transaction(&mut *session).await?;
            }
            init_session(&mut *session, &self.context.options).await?;
            Ok::<_, DumpError>(session)
        }
        .await;
        self.context.sessions_ready.add_permits(1);
        opened
    }

    fn fail(&self, message: String) {
        self.context
            .console
            .print_error(&format!("[Worker{:03}]: {message}", self.id));
        self.context.record_worker_error(self.id, message);
        self.context.emergency_shutdown();
    }

    async fn process(&mut self, session: &mut dyn Session) -> Result<()> {
        loop {
            let task = self.context.queue.pop().await;
            if self.context.is_interrupted() {
                return Ok(());
            }
            let Some(task) = task else {
                return Ok(());
            };

            self.execute(session, task).await?;

            if self.context.is_interrupted() {
                return Ok(());
            }
        }
    }

    async fn execute(&mut self, session: &mut dyn Session, task: Task) -> Result<()> {
        match task {
            Task::SchemaDdl(schema) => self.dump_schema_ddl(session, &schema).await,
            Task::ViewDdl(schema, view) => self.dump_view_ddl(session, &schema, view).await,
            Task::TableDdl(table) => self.dump_table_ddl(session, &table).await,
            Task::TableMetadata(table) => self.write_table_metadata(session, &table).await,
            Task::Chunking(table) => {
                let context = Arc::clone(&self.context);
                context.progress.chunking_started();
                let result = self.create_data_tasks(session, &table).await;
                context.progress.chunking_finished();
                result?;
                context.chunking_task_finished();
                Ok(())
            }
            Task::Data(task) => {
                let context = Arc::clone(&self.context);
                context.progress.dumping_started();
                let result = self.dump_data(session, &task).await;
                context.progress.dumping_finished();
                result
            }
        }
    }

    async fn dump_schema_ddl(&self, session: &mut dyn Session, schema: &SchemaTask) -> Result<()> {
        let context = &self.context;
        context.console.print_status(&format!(
            "Writing DDL for schema {}",
            quote_identifier(&schema.info.name)
        ));
        let mut dumper = DdlDumper::new(session, &schema.server, &*context.console);
        let ddl = dumper
            .schema_ddl(&schema.info, context.options.events, context.options.routines)
            .await?;
        context.write_file(&format!("{}.sql", schema.basename), ddl.as_bytes())
    }

    async fn dump_view_ddl(&self, session: &mut dyn Session, schema: &SchemaTask, index: usize) -> Result<()> {
        let context = &self.context;
        let view = &schema.info.views[index];
        let basename = &schema.view_basenames[index];
        context.console.print_status(&format!(
            "Writing DDL for view {}",
            quote_table(&schema.info.name, &view.name)
        ));
        let mut dumper = DdlDumper::new(session, &schema.server, &*context.console);
        let temporary = dumper.temporary_view_ddl(&schema.info.name, view);
        context.write_file(&format!("{basename}.pre.sql"), temporary.as_bytes())?;
        if let Some(ddl) = dumper.view_ddl(&schema.info.name, &view.name).await? {
            context.write_file(&format!("{basename}.sql"), ddl.as_bytes())?;
        }
        Ok(())
    }

    async fn dump_table_ddl(&self, session: &mut dyn Session, table: &TableTask) -> Result<()> {
        let context = &self.context;
        context
            .console
            .print_status(&format!("Writing DDL for table {}", table.quoted()));
        let mut dumper = DdlDumper::new(session, &table.server, &*context.console);
        let ddl = dumper.table_ddl(&table.schema, &table.info.name).await?;
        context.write_file(&format!("{}.sql", table.basename), ddl.as_bytes())?;

        if context.options.triggers && !table.info.triggers.is_empty() {
            let ddl = dumper
                .triggers_ddl(&table.schema, &table.info.name, &table.info.triggers)
                .await?;
            context.write_file(&format!("{}.triggers.sql", table.basename), ddl.as_bytes())?;
        }
        Ok(())
    }

    async fn write_table_metadata(&self, session: &mut dyn Session, table: &TableTask) -> Result<()> {
        let context = &self.context;
        let options = &context.options;
        let dialect = &options.dialect;
        let decoder = if options.base64 { "FROM_BASE64" } else { "UNHEX" };

        let mut dumper = DdlDumper::new(session, &table.server, &*context.console);
        let histograms = dumper.histograms(&table.schema, &table.info.name).await?;

        let metadata = TableMetadata {
            options: TableOptions {
                schema: table.schema.clone(),
                table: table.info.name.clone(),
                columns: table.info.columns.iter().map(|c| c.name.clone()).collect(),
                decode_columns: table
                    .info
                    .columns
                    .iter()
                    .filter(|c| c.csv_unsafe())
                    .map(|c| (c.name.clone(), decoder.to_string()))
                    .collect(),
                primary_index: match &table.info.index {
                    Some(index) if index.primary => index.first_column().to_string(),
                    _ => String::new(),
                },
                compression: options.compression.name().to_string(),
                default_character_set: options.character_set.clone(),
                fields_terminated_by: dialect.fields_terminated_by.clone(),
                fields_enclosed_by: dialect.fields_enclosed_by.clone(),
                fields_optionally_enclosed: dialect.fields_optionally_enclosed,
                fields_escaped_by: dialect.fields_escaped_by.clone(),
                lines_terminated_by: dialect.lines_terminated_by.clone(),
            },
            triggers: (options.triggers && options.ddl).then(|| table.info.triggers.clone()),
            histograms,
            includes_data: options.data,
            includes_ddl: options.ddl,
            extension: options.data_extension(),
            chunking: table.chunked(options),
        };
        context.write_file(&format!("{}.json", table.basename), &to_json(&metadata)?)
    }

    async fn create_data_tasks(&self, session: &mut dyn Session, table: &Arc<TableTask>) -> Result<()> {
        let context = &*self.context;
        let extension = context.options.data_extension();

        let mut ranges = 0;
        if let (true, Some(column)) = (table.chunked(&context.options), table.info.index_column()) {
            let target = ChunkTarget {
                schema: table.schema.clone(),
                table: table.info.name.clone(),
                column: column.name.clone(),
                order_by: table
                    .info
                    .index
                    .as_ref()
                    .map(|index| index.order_by())
                    .unwrap_or_default(),
                integer: column.is_integer(),
                binary: column.kind() == ColumnKind::Bytes,
                row_count: table.info.row_count,
                average_row_length: table.info.average_row_length,
            };
            let mut push = |chunk: Chunk| {
                let filename = data_filename(&table.basename, &extension, Some((chunk.index, chunk.last)));
                context.queue.push(
                    Task::Data(DataTask {
                        table: Arc::clone(table),
                        range: Some(chunk.range),
                        include_nulls: chunk.index == 0,
                        id: chunk.index.to_string(),
                        filename,
                    }),
                    Priority::Low,
                );
            };
            ranges = create_ranges(
                session,
                &target,
                context.options.bytes_per_chunk,
                &*context.console,
                &context.interrupted,
                &mut push,
            )
            .await?;
        }

        if ranges == 0 {
            context.queue.push(
                Task::Data(DataTask {
                    table: Arc::clone(table),
                    range: None,
                    include_nulls: false,
                    id: "1".to_string(),
                    filename: data_filename(&table.basename, &extension, None),
                }),
                Priority::Low,
            );
            ranges = 1;
        }

        context.console.print_status(&format!(
            "Data dump for table {} will be written to {ranges} file{}",
            table.quoted(),
            if ranges > 1 { "s" } else { "" }
        ));
        Ok(())
    }

    fn select_query(&self, task: &DataTask) -> String {
        let table = &task.table;
        let base64 = self.context.options.base64;
        let columns = table
            .info
            .columns
            .iter()
            .map(|c| {
                let name = quote_identifier(&c.name);
                match (c.csv_unsafe(), base64) {
                    (true, true) => format!("TO_BASE64({name})"),
                    (true, false) => format!("HEX({name})"),
                    (false, _) => name,
                }
            })
            .collect::<Vec<_>>()
            .join(",");

        let mut sql = format!("SELECT SQL_NO_CACHE {columns} FROM {}", table.quoted());

        if let (Some(range), Some(column)) = (&task.range, table.info.index_column()) {
            let name = quote_identifier(&column.name);
            sql.push_str(&format!(
                " WHERE {name} BETWEEN {} AND {}",
                range.begin, range.end
            ));
            if task.include_nulls {
                sql.push_str(&format!(" OR {name} IS NULL"));
            }
        }

        if let Some(index) = &table.info.index {
            sql.push_str(&format!(" ORDER BY {}", index.order_by()));
        }

        sql.push(' ');
        sql.push_str(&query_comment("dumping", &table.schema, &table.info.name, &task.id));
        sql
    }

    async fn dump_data(&mut self, session: &mut dyn Session, task: &DataTask) -> Result<()> {
        let context = Arc::clone(&self.context);
        let options = &context.options;
        let table = &task.table;
        let (schema, name) = (table.schema.as_str(), table.info.name.as_str());

        let kinds: Vec<ColumnKind> = table
            .info
            .columns
            .iter()
            .map(|c| if c.csv_unsafe() { ColumnKind::String } else { c.kind() })
            .collect();
        let writer = RowWriter::new(&options.dialect, &kinds);

        let in_progress = format!("{}{IN_PROGRESS_SUFFIX}", task.filename);
        let mut output = compress(context.directory.create_file(&in_progress)?, options.compression);
        let mut index = IndexFile::new(
            context
                .directory
                .create_file(&format!("{}{INDEX_SUFFIX}", task.filename))?,
        );

        let sql = self.select_query(task);
        debug!("Dumping {}: {sql}", task.filename);

        let mut data_bytes = 0u64;
        let mut reported_size = 0u64;
        let mut rows = 0u64;
        let mut pending = WriteResult::default();
        let mut buffer = Vec::new();
        {
            let mut stream = session.query_streaming(&sql).await?;
            while let Some(row) = stream.next_row().await? {
                if context.is_interrupted() {
                    return Ok(());
                }
                buffer.clear();
                let written = writer.write_row(&row, &mut buffer) as u64;
                output.write_all(&buffer)?;
                data_bytes += written;
                index.row_written(written, data_bytes)?;
                pending.data_bytes += written;
                rows += 1;

                if rows == UPDATE_EVERY {
                    let size = output.file_size();
                    pending.bytes_written = size.saturating_sub(reported_size);
                    reported_size = size;
                    context.progress.update(rows, pending, schema, name);
                    self.throttle.throttle(pending.data_bytes).await;
                    rows = 0;
                    pending = WriteResult::default();
                }
            }
        }

        let size = output.finish()?;
        pending.bytes_written = size.saturating_sub(reported_size);
        index.finish(data_bytes)?;
        context.directory.rename(&in_progress, &task.filename)?;
        lock(&context.chunk_file_bytes).insert(task.filename.clone(), data_bytes);
        context.progress.update(rows, pending, schema, name);
        Ok(())
    }
}
