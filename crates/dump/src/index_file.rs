//! `.idx` side files.
//!
//! Every time another [`INDEX_INTERVAL`] bytes of row data have been written
//! to a data file, the current uncompressed offset is appended as a
//! big-endian `u64`. The total data size is appended once the file is done.

use std::io::Write;

use dump_storage::OutputFile;

pub const INDEX_INTERVAL: u64 = 1024 * 1024;

pub struct IndexFile {
    file: Box<dyn OutputFile>,
    since_last_entry: u64,
}

impl IndexFile {
    pub fn new(file: Box<dyn OutputFile>) -> Self {
        Self {
            file,
            since_last_entry: 0,
        }
    }

    /// Records that a row of `row_bytes` ended at `offset`.
    pub fn row_written(&mut self, row_bytes: u64, offset: u64) -> std::io::Result<()> {
        self.since_last_entry += row_bytes;
        if self.since_last_entry >= INDEX_INTERVAL {
            self.file.write_all(&offset.to_be_bytes())?;
            self.since_last_entry %= INDEX_INTERVAL;
        }
        Ok(())
    }

    pub fn finish(mut self, total: u64) -> std::io::Result<u64> {
        self.file.write_all(&total.to_be_bytes())?;
        self.file.finish()
    }
}

/// Decodes the entries of an index file.
pub fn read_index(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            u64::from_be_bytes(buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dump_storage::{Directory, MemoryDirectory};

    #[test]
    fn test_entries_every_interval_plus_total() {
        let dir = MemoryDirectory::new();
        let mut index = IndexFile::new(dir.create_file("t.tsv.idx").unwrap());

        let row = 300 * 1024;
        let mut offset = 0;
        for _ in 0..10 {
            offset += row;
            index.row_written(row, offset).unwrap();
        }
        index.finish(offset).unwrap();

        let entries = read_index(&dir.contents("t.tsv.idx").unwrap());
        // thresholds are crossed after rows 4 and 7
        assert_eq!(entries, vec![4 * row, 7 * row, offset]);
    }

    #[test]
    fn test_empty_file_has_only_total() {
        let dir = MemoryDirectory::new();
        let index = IndexFile::new(dir.create_file("e.idx").unwrap());
        assert_eq!(index.finish(0).unwrap(), 8);
        assert_eq!(read_index(&dir.contents("e.idx").unwrap()), vec![0]);
    }
}
