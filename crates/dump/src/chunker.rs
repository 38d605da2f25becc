//! Splitting of a table into index ranges of roughly equal size.
//!
//! Integer indexes are split arithmetically, refining each step with the
//! optimizer's row estimates. Any other index is walked with `LIMIT` queries.
//! All arithmetic is done in `i128`, wide enough for the whole `BIGINT` and
//! `BIGINT UNSIGNED` domains without wrapping.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shell_core::sql::{quote_bytes, quote_identifier, quote_string, quote_table};
use shell_core::{Console, Session};
use tracing::debug;

use crate::error::{DumpError, Result};

/// Row size assumed when the table has no statistics.
pub const DEFAULT_ROW_SIZE: u64 = 256;
const MAX_RETRIES: u32 = 10;
const MAX_ITERATIONS: u32 = 10;

/// Inclusive range of index values, as SQL literals ready to embed in a
/// query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeInfo {
    pub begin: String,
    pub end: String,
}

/// A range found by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub range: RangeInfo,
    pub index: usize,
    pub last: bool,
}

/// SQL literal of a non-integer index value.
///
/// Binary columns, and any value that is not valid UTF-8, are written as hex
/// literals so that no byte is lost.
pub fn key_literal(key: &[u8], binary: bool) -> String {
    match std::str::from_utf8(key) {
        Ok(text) if !binary => quote_string(text),
        _ => quote_bytes(key),
    }
}

/// Receives chunks as soon as they are found.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(Chunk) + Send);

/// Comment identifying a query in the server's process list.
pub fn query_comment(context: &str, schema: &str, table: &str, chunk_id: &str) -> String {
    let text = format!(
        "mysql-admin dumpInstance, {context} table {}, chunk ID: {chunk_id}",
        quote_table(schema, table)
    );
    format!("/* {} */", text.replace("*/", "*\\/"))
}

/// What the chunker needs to know about the table.
#[derive(Debug, Clone)]
pub struct ChunkTarget {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub order_by: String,
    pub integer: bool,
    /// BINARY, VARBINARY or BLOB index column.
    pub binary: bool,
    pub row_count: u64,
    pub average_row_length: u64,
}

/// Queries issued while searching for range boundaries.
#[async_trait]
pub trait RangeSource: Send {
    /// Optimizer estimate of the rows with the index in `[from, to]`.
    async fn estimate_rows(&mut self, from: i128, to: i128, chunk_id: usize) -> Result<u64>;

    /// Index value `offset` rows past `after`, or past the start of the table.
    async fn key_at(&mut self, after: Option<&[u8]>, offset: u64, chunk_id: usize)
        -> Result<Option<Vec<u8>>>;
}

/// Answers range questions with `EXPLAIN` and `LIMIT` queries on a session.
pub struct SessionSource<'a> {
    session: &'a mut dyn Session,
    target: &'a ChunkTarget,
}

impl<'a> SessionSource<'a> {
    pub fn new(session: &'a mut dyn Session, target: &'a ChunkTarget) -> Self {
        Self { session, target }
    }

    fn comment(&self, chunk_id: usize) -> String {
        query_comment(
            "chunking",
            &self.target.schema,
            &self.target.table,
            &chunk_id.to_string(),
        )
    }
}

#[async_trait]
impl RangeSource for SessionSource<'_> {
    async fn estimate_rows(&mut self, from: i128, to: i128, chunk_id: usize) -> Result<u64> {
        let sql = format!(
            "EXPLAIN SELECT COUNT(*) FROM {} WHERE {} BETWEEN {from} AND {to} ORDER BY {} {}",
            quote_table(&self.target.schema, &self.target.table),
            quote_identifier(&self.target.column),
            self.target.order_by,
            self.comment(chunk_id)
        );
        let result = self.session.query(&sql).await?;
        let column = result.column_index("rows").unwrap_or(9);
        match result.first() {
            Some(row) => Ok(row.get::<Option<u64>>(column)?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn key_at(
        &mut self,
        after: Option<&[u8]>,
        offset: u64,
        chunk_id: usize,
    ) -> Result<Option<Vec<u8>>> {
        let column = quote_identifier(&self.target.column);
        let condition = match after {
            Some(key) => format!(" WHERE {column} > {}", key_literal(key, self.target.binary)),
            None => String::new(),
        };
        let sql = format!(
            "SELECT SQL_NO_CACHE {column} FROM {}{condition} ORDER BY {} LIMIT {offset},1 {}",
            quote_table(&self.target.schema, &self.target.table),
            self.target.order_by,
            self.comment(chunk_id)
        );
        let result = self.session.query(&sql).await?;
        match result.first() {
            Some(row) => Ok(row.get::<Option<Vec<u8>>>(0)?),
            None => Ok(None),
        }
    }
}

/// Parameters of the arithmetic split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub rows_per_chunk: u64,
    pub estimated_chunks: u64,
    pub accuracy: u64,
}

impl Estimate {
    pub fn new(bytes_per_chunk: u64, average_row_length: u64, row_count: u64) -> Self {
        let rows_per_chunk = bytes_per_chunk / average_row_length.max(1);
        let estimated_chunks = if rows_per_chunk > 0 {
            (row_count / rows_per_chunk).max(1)
        } else {
            row_count
        };
        Self {
            rows_per_chunk,
            estimated_chunks,
            accuracy: (rows_per_chunk / 10).max(10),
        }
    }
}

fn interrupted(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Splits `[min, max]` of an integer index. Returns the number of chunks.
pub async fn chunk_integer_range(
    table: &mut dyn RangeSource,
    min: i128,
    max: i128,
    estimate: Estimate,
    interrupt: &AtomicBool,
    sink: ChunkSink<'_>,
) -> Result<usize> {
    let mut step = if estimate.estimated_chunks > 0 {
        (max - min) / i128::from(estimate.estimated_chunks)
    } else {
        max - min
    };
    let mut current = min;
    let mut count = 0;

    while current <= max {
        if interrupted(interrupt) {
            return Ok(count);
        }
        let Some(next) = next_step(table, current, step, max, estimate, count, interrupt).await?
        else {
            return Ok(count);
        };
        step = next.max(2);

        let begin = current;
        current = if current > max - step + 1 {
            max
        } else {
            current + step
        };
        if max - current < step / 4 {
            current = max;
        }
        let last = current >= max;

        sink(Chunk {
            range: RangeInfo {
                begin: begin.to_string(),
                end: current.to_string(),
            },
            index: count,
            last,
        });
        count += 1;

        if last {
            break;
        }
        current += 1;
    }
    Ok(count)
}

/// Bisects for a step that covers about `rows_per_chunk` rows from `from`.
///
/// `None` when interrupted.
async fn next_step(
    table: &mut dyn RangeSource,
    from: i128,
    step: i128,
    max: i128,
    estimate: Estimate,
    chunk_id: usize,
    interrupt: &AtomicBool,
) -> Result<Option<i128>> {
    if estimate.estimated_chunks < 2 {
        return Ok(Some(step));
    }
    let target = estimate.rows_per_chunk;
    let mut retry = 0;
    let mut middle = from;
    let mut previous = target;
    let mut delta = estimate.accuracy.saturating_mul(2);

    while delta > estimate.accuracy && retry < MAX_RETRIES {
        let mut left = from;
        let mut right = from + 2 * i128::from(retry + 1) * step;

        for _ in 0..MAX_ITERATIONS {
            middle = left + (right - left) / 2;
            if middle >= right || middle <= left {
                break;
            }
            if interrupted(interrupt) {
                return Ok(None);
            }
            let rows = table.estimate_rows(from, middle, chunk_id).await?;
            if rows > target {
                right = middle;
                delta = rows - target;
            } else {
                left = middle;
                delta = target - rows;
            }
            if delta <= estimate.accuracy || rows == previous {
                break;
            }
            previous = rows;
        }

        if delta > estimate.accuracy {
            if previous >= target || middle >= max {
                // the estimate stopped moving towards the target
                retry = MAX_RETRIES;
            } else {
                retry += 1;
            }
        }
    }
    Ok(Some(middle - from))
}

/// Walks a non-integer index `rows_per_chunk` rows at a time until `end`.
pub async fn chunk_by_rows(
    table: &mut dyn RangeSource,
    end: &[u8],
    binary: bool,
    rows_per_chunk: u64,
    interrupt: &AtomicBool,
    sink: ChunkSink<'_>,
) -> Result<usize> {
    let mut count = 0;
    let mut previous_end: Option<Vec<u8>> = None;
    loop {
        if interrupted(interrupt) {
            return Ok(count);
        }
        let Some(begin) = table.key_at(previous_end.as_deref(), 0, count).await? else {
            return Ok(count);
        };
        if interrupted(interrupt) {
            return Ok(count);
        }
        let range_end = table
            .key_at(previous_end.as_deref(), rows_per_chunk.max(1) - 1, count)
            .await?
            .unwrap_or_else(|| end.to_vec());
        let last = range_end == end;

        sink(Chunk {
            range: RangeInfo {
                begin: key_literal(&begin, binary),
                end: key_literal(&range_end, binary),
            },
            index: count,
            last,
        });
        count += 1;
        if last {
            return Ok(count);
        }
        previous_end = Some(range_end);
    }
}

/// Finds the ranges of a table and hands each one to `sink`.
///
/// Returns 0 when the table cannot be split, e.g. it only holds NULLs in the
/// index column; the caller then dumps the whole table at once.
pub async fn create_ranges(
    session: &mut dyn Session,
    target: &ChunkTarget,
    bytes_per_chunk: u64,
    console: &dyn Console,
    interrupt: &AtomicBool,
    sink: ChunkSink<'_>,
) -> Result<usize> {
    let table = quote_table(&target.schema, &target.table);
    let column = quote_identifier(&target.column);
    let sql = format!(
        "SELECT SQL_NO_CACHE MIN({column}), MAX({column}) FROM {table} {}",
        query_comment("chunking", &target.schema, &target.table, "0")
    );
    let result = session.query(&sql).await?;
    let Some(row) = result.first() else {
        return Ok(0);
    };
    if row.is_null(0) {
        return Ok(0);
    }
    let min: Vec<u8> = row.get(0)?;
    let max: Vec<u8> = row.get(1)?;

    let average_row_length = if target.average_row_length == 0 {
        console.print_note(&format!(
            "Table statistics not available for {table}, chunking operation may be not \
             optimal. Please consider running 'ANALYZE TABLE {table};' first."
        ));
        DEFAULT_ROW_SIZE
    } else {
        target.average_row_length
    };
    let estimate = Estimate::new(bytes_per_chunk, average_row_length, target.row_count);
    debug!("Chunking {table} with {estimate:?}");

    let mut source = SessionSource::new(session, target);
    if target.integer {
        let parse = |value: &[u8]| {
            std::str::from_utf8(value)
                .ok()
                .and_then(|text| text.trim().parse::<i128>().ok())
                .ok_or_else(|| {
                    DumpError::runtime(format!(
                        "Unexpected value {} of index column {column} in {table}",
                        quote_bytes(value)
                    ))
                })
        };
        let (min, max) = (parse(&min)?, parse(&max)?);
        chunk_integer_range(&mut source, min, max, estimate, interrupt, sink).await
    } else {
        chunk_by_rows(
            &mut source,
            &max,
            target.binary,
            estimate.rows_per_chunk,
            interrupt,
            sink,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shell_core::testing::{result, RecordingConsole, Script};
    use shell_core::Value;

    /// `rows` keys spread evenly over `[min, max]`, exact estimates.
    struct UniformTable {
        min: i128,
        max: i128,
        rows: i128,
        queries: usize,
    }

    impl UniformTable {
        fn dense(min: i128, max: i128) -> Self {
            Self::sparse(min, max, max - min + 1)
        }

        fn sparse(min: i128, max: i128, rows: i128) -> Self {
            Self {
                min,
                max,
                rows,
                queries: 0,
            }
        }
    }

    #[async_trait]
    impl RangeSource for UniformTable {
        async fn estimate_rows(&mut self, from: i128, to: i128, _: usize) -> Result<u64> {
            self.queries += 1;
            let from = from.max(self.min);
            let to = to.min(self.max);
            if to < from {
                return Ok(0);
            }
            Ok(((to - from + 1) * self.rows / (self.max - self.min + 1)) as u64)
        }

        async fn key_at(&mut self, _: Option<&[u8]>, _: u64, _: usize) -> Result<Option<Vec<u8>>> {
            unreachable!()
        }
    }

    /// Sorted keys, compared byte by byte.
    struct TextTable {
        keys: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl RangeSource for TextTable {
        async fn estimate_rows(&mut self, _: i128, _: i128, _: usize) -> Result<u64> {
            unreachable!()
        }

        async fn key_at(
            &mut self,
            after: Option<&[u8]>,
            offset: u64,
            _: usize,
        ) -> Result<Option<Vec<u8>>> {
            Ok(self
                .keys
                .iter()
                .filter(|k| after.map_or(true, |a| k.as_slice() > a))
                .nth(offset as usize)
                .cloned())
        }
    }

    async fn split(min: i128, max: i128, estimate: Estimate) -> Vec<Chunk> {
        split_table(UniformTable::dense(min, max), estimate).await
    }

    async fn split_table(mut table: UniformTable, estimate: Estimate) -> Vec<Chunk> {
        let (min, max) = (table.min, table.max);
        let mut chunks = Vec::new();
        let count = chunk_integer_range(
            &mut table,
            min,
            max,
            estimate,
            &AtomicBool::new(false),
            &mut |c| chunks.push(c),
        )
        .await
        .unwrap();
        assert_eq!(count, chunks.len());
        chunks
    }

    fn assert_partition(chunks: &[Chunk], min: i128, max: i128) {
        assert!(!chunks.is_empty());
        let mut expected_begin = min;
        for (i, chunk) in chunks.iter().enumerate() {
            let begin: i128 = chunk.range.begin.parse().unwrap();
            let end: i128 = chunk.range.end.parse().unwrap();
            assert_eq!(begin, expected_begin, "gap or overlap before chunk {i}");
            assert!(end >= begin);
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.last, i == chunks.len() - 1);
            expected_begin = end + 1;
        }
        assert_eq!(expected_begin - 1, max);
    }

    #[tokio::test]
    async fn test_million_rows_split_in_about_ten() {
        let estimate = Estimate::new(100_000 * 64, 64, 1_000_000);
        assert_eq!(estimate.rows_per_chunk, 100_000);
        assert_eq!(estimate.estimated_chunks, 10);

        let chunks = split(1, 1_000_000, estimate).await;
        assert!((9..=11).contains(&chunks.len()), "{} chunks", chunks.len());
        assert_partition(&chunks, 1, 1_000_000);
    }

    #[tokio::test]
    async fn test_partition_for_various_chunk_sizes() {
        for (min, max, rows_per_chunk) in [
            (1, 1000, 1),
            (1, 1000, 7),
            (-500, 500, 100),
            (0, 10, 1000),
            (5, 5, 10),
        ] {
            let rows = (max - min + 1) as u64;
            let estimate = Estimate::new(rows_per_chunk * 10, 10, rows);
            let chunks = split(min, max, estimate).await;
            assert_partition(&chunks, min, max);
        }
    }

    #[tokio::test]
    async fn test_domain_edges_do_not_overflow() {
        let min = i128::from(u64::MAX) - 1_000_000;
        let max = i128::from(u64::MAX);
        let chunks = split(min, max, Estimate::new(640_000, 64, 1_000_001)).await;
        assert_partition(&chunks, min, max);

        let min = i128::from(i64::MIN);
        let max = i128::from(i64::MAX);
        let table = UniformTable::sparse(min, max, 1 << 24);
        let chunks = split_table(table, Estimate::new(1 << 20, 1, 1 << 24)).await;
        assert!((15..=17).contains(&chunks.len()), "{} chunks", chunks.len());
        assert_partition(&chunks, min, max);
    }

    #[tokio::test]
    async fn test_chunk_covers_the_measured_range() {
        let chunks = split(1, 100, Estimate::new(100, 10, 100)).await;
        let ranges: Vec<_> = chunks
            .iter()
            .map(|c| (c.range.begin.clone(), c.range.end.clone()))
            .collect();
        assert_eq!(ranges.len(), 10);
        for (i, (begin, end)) in ranges.iter().enumerate() {
            assert_eq!(begin, &(i * 10 + 1).to_string());
            assert_eq!(end, &(i * 10 + 10).to_string());
        }
    }

    #[tokio::test]
    async fn test_tail_of_exactly_a_quarter_step_is_kept() {
        let chunks = split(1, 101, Estimate::new(100, 10, 101)).await;
        assert_partition(&chunks, 1, 101);
        let tail: Vec<_> = chunks[chunks.len() - 2..]
            .iter()
            .map(|c| (c.range.begin.as_str(), c.range.end.as_str()))
            .collect();
        assert_eq!(tail, vec![("89", "99"), ("100", "101")]);
    }

    #[tokio::test]
    async fn test_same_count_on_repeated_runs() {
        let estimate = Estimate::new(1000 * 32, 32, 50_000);
        let first = split(1, 50_000, estimate).await;
        let second = split(1, 50_000, estimate).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_querying() {
        let mut table = UniformTable::dense(1, 1000);
        let mut chunks = Vec::new();
        let count = chunk_integer_range(
            &mut table,
            1,
            1000,
            Estimate::new(100, 1, 1000),
            &AtomicBool::new(true),
            &mut |c| chunks.push(c),
        )
        .await
        .unwrap();
        assert_eq!(count, 0);
        assert_eq!(table.queries, 0);
    }

    #[tokio::test]
    async fn test_text_keys_walked_by_rows() {
        let keys: Vec<Vec<u8>> = (0..25).map(|i| format!("k{i:03}").into_bytes()).collect();
        let end = keys.last().unwrap().clone();
        let mut table = TextTable { keys };
        let mut chunks = Vec::new();
        let count = chunk_by_rows(
            &mut table,
            &end,
            false,
            10,
            &AtomicBool::new(false),
            &mut |c| chunks.push(c),
        )
        .await
        .unwrap();

        assert_eq!(count, 3);
        let ranges: Vec<_> = chunks
            .iter()
            .map(|c| (c.range.begin.as_str(), c.range.end.as_str(), c.last))
            .collect();
        assert_eq!(
            ranges,
            vec![
                ("'k000'", "'k009'", false),
                ("'k010'", "'k019'", false),
                ("'k020'", "'k024'", true)
            ]
        );
    }

    #[test]
    fn test_key_literal() {
        assert_eq!(key_literal(b"it's", false), "'it\\'s'");
        assert_eq!(key_literal(b"abc", true), "X'616263'");
        assert_eq!(key_literal(&[0x80, 0xff], false), "X'80FF'");
    }

    #[tokio::test]
    async fn test_binary_keys_keep_every_byte() {
        let key = |b: u8| Value::Bytes(vec![b]);
        let none = Vec::<Vec<Value>>::new;
        let script = Script::new();
        script
            .on("MIN(`id`)", result(&["min", "max"], vec![vec![key(0x80), key(0xf0)]]))
            .on("`t` ORDER BY `id` LIMIT 0,1", result(&["id"], vec![vec![key(0x80)]]))
            .on("`t` ORDER BY `id` LIMIT 1,1", result(&["id"], vec![vec![key(0x90)]]))
            .on("> X'90' ORDER BY `id` LIMIT 0,1", result(&["id"], vec![vec![key(0xf0)]]))
            .on("> X'90' ORDER BY `id` LIMIT 1,1", result(&["id"], none()));
        let target = ChunkTarget {
            schema: "s".to_string(),
            table: "t".to_string(),
            column: "id".to_string(),
            order_by: "`id`".to_string(),
            integer: false,
            binary: true,
            row_count: 3,
            average_row_length: 10,
        };
        let mut chunks = Vec::new();
        let count = create_ranges(
            &mut script.session(),
            &target,
            20,
            &RecordingConsole::new(),
            &AtomicBool::new(false),
            &mut |c| chunks.push(c),
        )
        .await
        .unwrap();

        assert_eq!(count, 2);
        let ranges: Vec<_> = chunks
            .iter()
            .map(|c| (c.range.begin.as_str(), c.range.end.as_str(), c.last))
            .collect();
        assert_eq!(
            ranges,
            vec![("X'80'", "X'90'", false), ("X'F0'", "X'F0'", true)]
        );
    }

    #[tokio::test]
    async fn test_null_only_index_gives_no_ranges() {
        let script = Script::new();
        script.on(
            "MIN(`id`)",
            result(&["min", "max"], vec![vec![None::<&str>, None]]),
        );
        let target = ChunkTarget {
            schema: "s".to_string(),
            table: "t".to_string(),
            column: "id".to_string(),
            order_by: "`id`".to_string(),
            integer: true,
            binary: false,
            row_count: 10,
            average_row_length: 0,
        };
        let console = RecordingConsole::new();
        let count = create_ranges(
            &mut script.session(),
            &target,
            1 << 20,
            &console,
            &AtomicBool::new(false),
            &mut |_| panic!("no chunk expected"),
        )
        .await
        .unwrap();
        assert_eq!(count, 0);
        assert!(console.is_empty());
    }

    #[tokio::test]
    async fn test_queries_carry_comment_and_missing_stats_note() {
        let script = Script::new();
        script
            .on("MIN(`id`)", result(&["min", "max"], vec![vec!["1", "1000"]]))
            .on(
                "EXPLAIN",
                result(&["id", "rows"], vec![vec!["1", "500"]]),
            );
        let target = ChunkTarget {
            schema: "s".to_string(),
            table: "t*/x".to_string(),
            column: "id".to_string(),
            order_by: "`id`".to_string(),
            integer: true,
            binary: false,
            row_count: 1000,
            average_row_length: 0,
        };
        let console = RecordingConsole::new();
        let mut chunks = Vec::new();
        create_ranges(
            &mut script.session(),
            &target,
            DEFAULT_ROW_SIZE * 100,
            &console,
            &AtomicBool::new(false),
            &mut |c| chunks.push(c),
        )
        .await
        .unwrap();

        assert!(!chunks.is_empty());
        assert!(console.notes()[0].contains("ANALYZE TABLE `s`.`t*/x`;"));
        for sql in script.statements() {
            assert!(
                sql.contains("/* mysql-admin dumpInstance, chunking table `s`.`t*\\/x`, chunk ID: "),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_estimate() {
        let e = Estimate::new(1000, 0, 50);
        assert_eq!(e.rows_per_chunk, 1000);
        assert_eq!(e.estimated_chunks, 1);
        assert_eq!(e.accuracy, 100);

        let e = Estimate::new(10, 100, 50);
        assert_eq!(e.rows_per_chunk, 0);
        assert_eq!(e.estimated_chunks, 50);
        assert_eq!(e.accuracy, 10);
    }
}
