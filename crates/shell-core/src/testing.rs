//! In-memory doubles for [`Session`], [`SessionFactory`] and [`Console`].
//!
//! A [`Script`] holds reply rules matched by substring against the SQL text,
//! in the order they were added. Every statement that reaches a scripted
//! session is recorded, so tests can assert on what was sent and in which
//! order. Unmatched statements succeed with an empty result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{
    Column, ColumnKind, Console, ResultSet, Row, RowStream, Session, SessionError, SessionFactory,
    Value, Version,
};

pub const DEFAULT_TEST_VERSION: Version = Version::new(8, 0, 36);

/// Result set whose columns are all strings.
pub fn result<V: Into<Value>>(columns: &[&str], rows: Vec<Vec<V>>) -> ResultSet {
    let columns = columns
        .iter()
        .map(|name| (*name, ColumnKind::String))
        .collect::<Vec<_>>();
    typed_result(&columns, rows)
}

/// Result set with explicit column kinds.
pub fn typed_result<V: Into<Value>>(columns: &[(&str, ColumnKind)], rows: Vec<Vec<V>>) -> ResultSet {
    ResultSet::new(
        columns
            .iter()
            .map(|(name, kind)| Column::new(*name, *kind))
            .collect(),
        rows.into_iter()
            .map(|r| Row::new(r.into_iter().map(Into::into).collect()))
            .collect(),
    )
}

struct Rule {
    pattern: String,
    reply: Result<ResultSet, SessionError>,
    remaining: Option<usize>,
}

#[derive(Default)]
struct ScriptState {
    rules: Vec<Rule>,
    log: Vec<(u64, String)>,
}

/// Shared reply rules and statement log.
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
    next_connection_id: Arc<AtomicU64>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, pattern: &str, reply: Result<ResultSet, SessionError>, remaining: Option<usize>) {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            reply,
            remaining,
        });
    }

    /// Reply with `result` to every statement containing `pattern`.
    pub fn on(&self, pattern: &str, result: ResultSet) -> &Self {
        self.push(pattern, Ok(result), None);
        self
    }

    /// Reply with `result` to the next statement containing `pattern` only.
    pub fn on_once(&self, pattern: &str, result: ResultSet) -> &Self {
        self.push(pattern, Ok(result), Some(1));
        self
    }

    /// Fail every statement containing `pattern`.
    pub fn fail(&self, pattern: &str, error: SessionError) -> &Self {
        self.push(pattern, Err(error), None);
        self
    }

    /// Fail the next statement containing `pattern` only.
    pub fn fail_once(&self, pattern: &str, error: SessionError) -> &Self {
        self.push(pattern, Err(error), Some(1));
        self
    }

    /// All statements received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().log.iter().map(|(_, sql)| sql.clone()).collect()
    }

    /// Statements received by one connection.
    pub fn statements_of(&self, connection_id: u64) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(id, _)| *id == connection_id)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Number of received statements containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(_, sql)| sql.contains(pattern))
            .count()
    }

    pub fn session(&self) -> ScriptedSession {
        self.session_with_version(DEFAULT_TEST_VERSION)
    }

    pub fn session_with_version(&self, version: Version) -> ScriptedSession {
        ScriptedSession {
            script: self.clone(),
            version,
            connection_id: self.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1,
            open: true,
        }
    }

    fn reply(&self, connection_id: u64, sql: &str) -> Result<ResultSet, SessionError> {
        let mut state = self.lock();
        state.log.push((connection_id, sql.to_string()));
        for rule in state.rules.iter_mut() {
            if rule.remaining == Some(0) || !sql.contains(&rule.pattern) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return rule.reply.clone();
        }
        Ok(ResultSet::default())
    }
}

/// A [`Session`] answering from a [`Script`].
pub struct ScriptedSession {
    script: Script,
    version: Version,
    connection_id: u64,
    open: bool,
}

impl ScriptedSession {
    pub fn boxed(self) -> Box<dyn Session> {
        Box::new(self)
    }
}

struct BufferedRows {
    columns: Vec<Column>,
    rows: std::vec::IntoIter<Row>,
}

#[async_trait]
impl RowStream for BufferedRows {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>, SessionError> {
        Ok(self.rows.next())
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, SessionError> {
        if !self.open {
            return Err(SessionError::Closed);
        }
        self.script.reply(self.connection_id, sql)
    }

    async fn query_streaming<'a>(
        &'a mut self,
        sql: &str,
    ) -> Result<Box<dyn RowStream + 'a>, SessionError> {
        let result = self.query(sql).await?;
        Ok(Box::new(BufferedRows {
            columns: result.columns,
            rows: result.rows.into_iter(),
        }))
    }

    async fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        self.query(sql).await.map(|_| ())
    }

    fn server_version(&self) -> Version {
        self.version
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        format!("scripted session {}", self.connection_id)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.open = false;
        Ok(())
    }
}

/// Hands out [`ScriptedSession`]s that share one [`Script`].
#[derive(Clone)]
pub struct ScriptedFactory {
    script: Script,
    version: Version,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            version: DEFAULT_TEST_VERSION,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn Session>, SessionError> {
        Ok(self.script.session_with_version(self.version).boxed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Status,
    Info,
    Note,
    Warning,
    Error,
}

/// A [`Console`] that keeps every message.
#[derive(Default)]
pub struct RecordingConsole {
    messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.messages(Level::Note)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(Level::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

impl Console for RecordingConsole {
    fn print_status(&self, message: &str) {
        self.record(Level::Status, message);
    }

    fn print_info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    fn print_note(&self, message: &str) {
        self.record(Level::Note, message);
    }

    fn print_warning(&self, message: &str) {
        self.record(Level::Warning, message);
    }

    fn print_error(&self, message: &str) {
        self.record(Level::Error, message);
    }
}
