//! In-memory directory, used by tests and dry runs.

use crate::{Directory, OutputFile};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// A directory whose files live in memory. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    files: Files,
    created: Arc<AtomicBool>,
}

fn lock(files: &Files) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
    files.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a finished file.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(name).cloned()
    }

    pub fn contents_string(&self, name: &str) -> Option<String> {
        self.contents(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Directory for MemoryDirectory {
    fn full_path(&self) -> String {
        "memory://".to_string()
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.created.load(Ordering::SeqCst))
    }

    fn create(&self) -> Result<()> {
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(lock(&self.files).keys().cloned().collect())
    }

    fn create_file(&self, name: &str) -> Result<Box<dyn OutputFile>> {
        lock(&self.files).insert(name.to_string(), Vec::new());
        Ok(Box::new(MemoryFile {
            name: name.to_string(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = lock(&self.files);
        let contents = files
            .remove(from)
            .ok_or_else(|| anyhow!("File {from} does not exist"))?;
        files.insert(to.to_string(), contents);
        Ok(())
    }
}

struct MemoryFile {
    name: String,
    buffer: Vec<u8>,
    files: Files,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_size(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn finish(self: Box<Self>) -> std::io::Result<u64> {
        let MemoryFile {
            name,
            buffer,
            files,
        } = *self;
        let size = buffer.len() as u64;
        lock(&files).insert(name, buffer);
        Ok(size)
    }
}
