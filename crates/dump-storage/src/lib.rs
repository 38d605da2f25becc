//! Output sink for dump artifacts.
//!
//! A dump writes into a [`Directory`]: either a local filesystem directory
//! or, in tests, an in-memory one. Every file is created through
//! [`Directory::create_file`] and must be closed with
//! [`OutputFile::finish`]. Data files may be wrapped with [`compress`].
//!
//! # Example
//!
//! ```ignore
//! use dump_storage::{compress, Compression, OutputLocation};
//!
//! let dir = OutputLocation::parse("/backups/full/")?.open()?;
//! dir.create()?;
//! let mut file = compress(dir.create_file("sakila@actor.tsv.gz.dumping")?, Compression::Gzip);
//! file.write_all(b"1\tPENELOPE\n")?;
//! file.finish()?;
//! dir.rename("sakila@actor.tsv.gz.dumping", "sakila@actor.tsv.gz")?;
//! ```

mod compressed;
mod local;
mod memory;

use anyhow::{bail, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub use compressed::{compress, Compression};
pub use local::{LocalDirectory, LocalFile};
pub use memory::MemoryDirectory;

/// A file being written.
pub trait OutputFile: Write + Send {
    fn name(&self) -> &str;

    /// Bytes that reached the underlying file so far.
    fn file_size(&self) -> u64;

    /// Flushes and closes the file, returning its final size.
    fn finish(self: Box<Self>) -> std::io::Result<u64>;
}

/// A flat directory holding dump files.
pub trait Directory: Send + Sync {
    /// Location for user-facing messages.
    fn full_path(&self) -> String;

    fn exists(&self) -> Result<bool>;

    fn create(&self) -> Result<()>;

    /// Names of the files directly inside the directory, sorted.
    fn list_files(&self) -> Result<Vec<String>>;

    fn create_file(&self, name: &str) -> Result<Box<dyn OutputFile>>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Writes a whole file at once.
    fn write_file(&self, name: &str, contents: &[u8]) -> Result<u64> {
        let mut file = self.create_file(name)?;
        file.write_all(contents)?;
        Ok(file.finish()?)
    }
}

/// Where a dump is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLocation {
    Local(PathBuf),
}

impl OutputLocation {
    /// Parses an output location.
    ///
    /// - `file:///path` or a plain path -> Local
    /// - any other `scheme://` -> error
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.trim().is_empty() {
            bail!("The output directory cannot be empty");
        }
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(OutputLocation::Local(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            bail!("Output location scheme '{scheme}' is not supported");
        }
        Ok(OutputLocation::Local(PathBuf::from(uri)))
    }

    pub fn open(&self) -> Result<Arc<dyn Directory>> {
        match self {
            OutputLocation::Local(path) => Ok(Arc::new(LocalDirectory::new(path.clone()))),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            OutputLocation::Local(path) => path.display().to_string(),
        }
    }
}
