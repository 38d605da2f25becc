//! Dump progress counters and their display.
//!
//! Counters and the display live behind two different mutexes. Workers always
//! update the counters; the display is refreshed only when its lock is free
//! and at most once per [`REFRESH_INTERVAL`].

use std::collections::{BTreeMap, VecDeque};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use shell_core::Console;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(5);

/// Bytes produced by one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Uncompressed row data.
    pub data_bytes: u64,
    /// What reached the output file.
    pub bytes_written: u64,
}

impl AddAssign for WriteResult {
    fn add_assign(&mut self, other: Self) {
        self.data_bytes += other.data_bytes;
        self.bytes_written += other.bytes_written;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub rows: u64,
    pub data_bytes: u64,
    pub bytes_written: u64,
    /// schema -> table -> uncompressed bytes
    pub table_data_bytes: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    rows: u64,
    data_bytes: u64,
    bytes_written: u64,
}

/// Rates over a sliding window.
#[derive(Debug, Default)]
struct Throughput {
    samples: VecDeque<Sample>,
}

impl Throughput {
    fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > 2
            && sample.at.duration_since(self.samples[0].at) > THROUGHPUT_WINDOW
        {
            self.samples.pop_front();
        }
    }

    /// (rows/s, data bytes/s, written bytes/s)
    fn rates(&self) -> (f64, f64, f64) {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => {
                let secs = last.at.duration_since(first.at).as_secs_f64();
                if secs <= 0.0 {
                    return (0.0, 0.0, 0.0);
                }
                (
                    (last.rows - first.rows) as f64 / secs,
                    (last.data_bytes - first.data_bytes) as f64 / secs,
                    (last.bytes_written - first.bytes_written) as f64 / secs,
                )
            }
            _ => (0.0, 0.0, 0.0),
        }
    }
}

#[derive(Debug, Default)]
struct Display {
    last_refresh: Option<Instant>,
    throughput: Throughput,
}

pub struct Progress {
    counters: Mutex<Counters>,
    display: Mutex<Display>,
    chunking: AtomicUsize,
    dumping: AtomicUsize,
    total_rows: AtomicU64,
    console: Arc<dyn Console>,
    show: bool,
    compressed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Progress {
    pub fn new(console: Arc<dyn Console>, show: bool, compressed: bool) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            display: Mutex::new(Display::default()),
            chunking: AtomicUsize::new(0),
            dumping: AtomicUsize::new(0),
            total_rows: AtomicU64::new(0),
            console,
            show,
            compressed,
        }
    }

    /// Estimated number of rows to dump, for the percentage.
    pub fn set_total_rows(&self, rows: u64) {
        self.total_rows.store(rows, Ordering::Relaxed);
    }

    /// Registers a table that will get data, so that it shows in the totals
    /// even when empty.
    pub fn add_table(&self, schema: &str, table: &str) {
        lock(&self.counters)
            .table_data_bytes
            .entry(schema.to_string())
            .or_default()
            .entry(table.to_string())
            .or_insert(0);
    }

    pub fn update(&self, rows: u64, written: WriteResult, schema: &str, table: &str) {
        let snapshot = {
            let mut counters = lock(&self.counters);
            counters.rows += rows;
            counters.data_bytes += written.data_bytes;
            counters.bytes_written += written.bytes_written;
            *counters
                .table_data_bytes
                .entry(schema.to_string())
                .or_default()
                .entry(table.to_string())
                .or_insert(0) += written.data_bytes;
            Sample {
                at: Instant::now(),
                rows: counters.rows,
                data_bytes: counters.data_bytes,
                bytes_written: counters.bytes_written,
            }
        };

        if let Ok(mut display) = self.display.try_lock() {
            display.throughput.push(snapshot);
            let due = display
                .last_refresh
                .map_or(true, |at| snapshot.at.duration_since(at) >= REFRESH_INTERVAL);
            if self.show && due {
                display.last_refresh = Some(snapshot.at);
                let (rows_per_sec, data_per_sec, written_per_sec) = display.throughput.rates();
                drop(display);
                self.console.print_status(&self.render(
                    snapshot.rows,
                    rows_per_sec,
                    data_per_sec,
                    written_per_sec,
                ));
            }
        }
    }

    fn render(&self, rows: u64, rows_per_sec: f64, data_per_sec: f64, written_per_sec: f64) -> String {
        let total = self.total_rows.load(Ordering::Relaxed);
        let percent = if total > 0 {
            (rows as f64 * 100.0 / total as f64).min(100.0)
        } else {
            0.0
        };
        let mut line = format!(
            "{}{:.0}% ({} rows / ~{} rows), {} rows/s, {} uncompressed",
            self.label(),
            percent,
            format_count(rows),
            format_count(total),
            format_count(rows_per_sec as u64),
            format_throughput(data_per_sec),
        );
        if self.compressed {
            line.push_str(&format!(", {} compressed", format_throughput(written_per_sec)));
        }
        line
    }

    pub fn chunking_started(&self) {
        self.chunking.fetch_add(1, Ordering::SeqCst);
    }

    pub fn chunking_finished(&self) {
        self.chunking.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn dumping_started(&self) {
        self.dumping.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dumping_finished(&self) {
        self.dumping.fetch_sub(1, Ordering::SeqCst);
    }

    /// `N thds dumping - ` or `C thds chunking, D dumping - `
    pub fn label(&self) -> String {
        let chunking = self.chunking.load(Ordering::SeqCst);
        let dumping = self.dumping.load(Ordering::SeqCst);
        if chunking == 0 {
            format!("{dumping} thds dumping - ")
        } else {
            format!("{chunking} thds chunking, {dumping} dumping - ")
        }
    }

    pub fn snapshot(&self) -> Counters {
        lock(&self.counters).clone()
    }
}

/// 1000-based byte units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64;
    let mut unit = "bytes";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    format!("{value:.2} {unit}")
}

pub fn format_throughput(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64).replace(" bytes", " B"))
}

/// `1.23M`, `45.00K`, or the plain number.
pub fn format_count(count: u64) -> String {
    match count {
        c if c >= 1_000_000_000 => format!("{:.2}G", c as f64 / 1e9),
        c if c >= 1_000_000 => format!("{:.2}M", c as f64 / 1e6),
        c if c >= 1000 => format!("{:.2}K", c as f64 / 1e3),
        c => c.to_string(),
    }
}

/// `HH:MM:SSs`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}s", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Lines printed once a dump completes.
pub fn summary_lines(
    counters: &Counters,
    duration: Duration,
    schemas: usize,
    tables: usize,
    compressed: bool,
) -> Vec<String> {
    let secs = duration.as_secs_f64().max(0.001);
    let mut lines = vec![
        format!("Duration: {}", format_duration(duration)),
        format!("Schemas dumped: {schemas}"),
        format!("Tables dumped: {tables}"),
    ];
    if compressed {
        lines.push(format!(
            "Uncompressed data size: {}",
            format_bytes(counters.data_bytes)
        ));
        lines.push(format!(
            "Compressed data size: {}",
            format_bytes(counters.bytes_written)
        ));
        let ratio = if counters.bytes_written > 0 {
            counters.data_bytes as f64 / counters.bytes_written as f64
        } else {
            0.0
        };
        lines.push(format!("Compression ratio: {ratio:.1}"));
    } else {
        lines.push(format!("Data size: {}", format_bytes(counters.data_bytes)));
    }
    lines.push(format!("Rows written: {}", counters.rows));
    lines.push(format!("Bytes written: {}", format_bytes(counters.bytes_written)));
    lines.push(format!(
        "Average {}throughput: {}",
        if compressed { "uncompressed " } else { "" },
        format_throughput(counters.data_bytes as f64 / secs)
    ));
    if compressed {
        lines.push(format!(
            "Average compressed throughput: {}",
            format_throughput(counters.bytes_written as f64 / secs)
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use shell_core::testing::RecordingConsole;

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let progress = Arc::new(Progress::new(Arc::new(RecordingConsole::new()), true, true));
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let progress = Arc::clone(&progress);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        progress.update(
                            t + 1,
                            WriteResult {
                                data_bytes: 10 * (t + 1),
                                bytes_written: t + 1,
                            },
                            "s",
                            &format!("t{}", t % 2),
                        );
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        let counters = progress.snapshot();
        let sum: u64 = (1..=8).sum::<u64>() * 1000;
        assert_eq!(counters.rows, sum);
        assert_eq!(counters.bytes_written, sum);
        assert_eq!(counters.data_bytes, sum * 10);
        let per_table: u64 = counters.table_data_bytes["s"].values().sum();
        assert_eq!(per_table, sum * 10);
    }

    #[test]
    fn test_label() {
        let progress = Progress::new(Arc::new(RecordingConsole::new()), false, false);
        progress.dumping_started();
        progress.dumping_started();
        assert_eq!(progress.label(), "2 thds dumping - ");
        progress.chunking_started();
        assert_eq!(progress.label(), "1 thds chunking, 2 dumping - ");
        progress.chunking_finished();
        progress.dumping_finished();
        assert_eq!(progress.label(), "1 thds dumping - ");
    }

    #[test]
    fn test_hidden_progress_prints_nothing() {
        let console = Arc::new(RecordingConsole::new());
        let progress = Progress::new(console.clone(), false, false);
        progress.update(10, WriteResult::default(), "s", "t");
        assert!(console.is_empty());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_bytes(999), "999 bytes");
        assert_eq!(format_bytes(1_500_000), "1.50 MB");
        assert_eq!(format_throughput(2_000.0), "2.00 KB/s");
        assert_eq!(format_count(1_234_567), "1.23M");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05s");
    }

    #[test]
    fn test_summary() {
        let counters = Counters {
            rows: 10,
            data_bytes: 4000,
            bytes_written: 1000,
            ..Default::default()
        };
        let lines = summary_lines(&counters, Duration::from_secs(2), 1, 3, true);
        assert!(lines.contains(&"Compression ratio: 4.0".to_string()));
        assert!(lines.contains(&"Tables dumped: 3".to_string()));
        assert!(lines.contains(&"Average compressed throughput: 500 B/s".to_string()));

        let plain = summary_lines(&counters, Duration::from_secs(2), 1, 3, false);
        assert!(plain.contains(&"Data size: 4.00 KB".to_string()));
        assert!(plain.contains(&"Average throughput: 2.00 KB/s".to_string()));
    }
}
