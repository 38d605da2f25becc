//! Local filesystem directory

use crate::{Directory, OutputFile};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Directory for LocalDirectory {
    fn full_path(&self) -> String {
        self.path.display().to_string()
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.path.try_exists()?)
    }

    fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("Failed to create directory: {}", self.path.display()))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.path)
            .with_context(|| format!("Failed to read directory: {}", self.path.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_file(&self, name: &str) -> Result<Box<dyn OutputFile>> {
        let path = self.path.join(name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create file: {}", path.display()))?;
        tracing::trace!("Created {}", path.display());
        Ok(Box::new(LocalFile {
            name: name.to_string(),
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            written: 0,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        std::fs::rename(self.path.join(from), self.path.join(to))
            .with_context(|| format!("Failed to rename {from} to {to} in {}", self.path.display()))
    }
}

/// A buffered file on the local filesystem.
pub struct LocalFile {
    name: String,
    writer: BufWriter<File>,
    written: u64,
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl OutputFile for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_size(&self) -> u64 {
        self.written
    }

    fn finish(mut self: Box<Self>) -> std::io::Result<u64> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_write_rename() {
        let temp_dir = TempDir::new().unwrap();
        let dir = LocalDirectory::new(temp_dir.path().join("dump"));
        assert!(!dir.exists().unwrap());
        dir.create().unwrap();
        assert!(dir.exists().unwrap());

        let mut file = dir.create_file("a.tsv.dumping").unwrap();
        file.write_all(b"1\tx\n").unwrap();
        assert_eq!(file.finish().unwrap(), 4);
        dir.rename("a.tsv.dumping", "a.tsv").unwrap();

        std::fs::create_dir(temp_dir.path().join("dump/sub")).unwrap();
        assert_eq!(dir.list_files().unwrap(), vec!["a.tsv".to_string()]);
        let contents = std::fs::read(temp_dir.path().join("dump/a.tsv")).unwrap();
        assert_eq!(contents, b"1\tx\n");
    }

    #[test]
    fn test_write_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = LocalDirectory::new(temp_dir.path());
        assert_eq!(dir.write_file("@.json", b"{}").unwrap(), 2);
        assert_eq!(dir.list_files().unwrap(), vec!["@.json".to_string()]);
    }

    #[test]
    fn test_list_missing_directory() {
        let dir = LocalDirectory::new("/nonexistent/path/for/dump");
        assert!(dir.list_files().is_err());
    }
}
