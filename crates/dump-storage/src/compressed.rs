use crate::OutputFile;
use anyhow::{bail, Result};
use flate2::write::GzEncoder;
use std::io::Write;
use std::str::FromStr;

/// Compression applied to data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Gzip,
}

impl Compression {
    /// File name extension, without the dot. Empty for no compression.
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => "gz",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
        }
    }
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            other => bail!("Unknown compression type: {other}"),
        }
    }
}

/// Wraps `file` so that written bytes are compressed.
pub fn compress(file: Box<dyn OutputFile>, compression: Compression) -> Box<dyn OutputFile> {
    match compression {
        Compression::None => file,
        Compression::Gzip => Box::new(GzipFile {
            name: file.name().to_string(),
            encoder: GzEncoder::new(file, flate2::Compression::default()),
        }),
    }
}

struct GzipFile {
    name: String,
    encoder: GzEncoder<Box<dyn OutputFile>>,
}

impl Write for GzipFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

impl OutputFile for GzipFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_size(&self) -> u64 {
        self.encoder.get_ref().file_size()
    }

    fn finish(self: Box<Self>) -> std::io::Result<u64> {
        let inner = self.encoder.finish()?;
        inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Directory, MemoryDirectory};
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_round_trip_through_directory() {
        let dir = MemoryDirectory::new();
        let mut file = compress(dir.create_file("t.tsv.gz").unwrap(), Compression::Gzip);
        let payload = "1\tabc\n".repeat(1000);
        file.write_all(payload.as_bytes()).unwrap();
        let size = file.finish().unwrap();

        let stored = dir.contents("t.tsv.gz").unwrap();
        assert_eq!(size, stored.len() as u64);
        assert!(stored.len() < payload.len());

        let mut decoded = String::new();
        GzDecoder::new(stored.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("zstd".parse::<Compression>().is_err());
        assert_eq!(Compression::Gzip.extension(), "gz");
    }
}
