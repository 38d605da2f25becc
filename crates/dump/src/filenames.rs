//! Names of the files inside a dump directory.

use std::collections::HashMap;

/// Appended to a data file until it is complete.
pub const IN_PROGRESS_SUFFIX: &str = ".dumping";

pub const INDEX_SUFFIX: &str = ".idx";

/// Longest basename kept as is; leaves room for chunk ids and extensions.
pub const MAX_BASENAME_LENGTH: usize = 225;

pub const GLOBAL_DDL_FILE: &str = "@.sql";
pub const GLOBAL_POST_DDL_FILE: &str = "@.post.sql";
pub const USERS_DDL_FILE: &str = "@.users.sql";
pub const DUMP_STARTED_FILE: &str = "@.json";
pub const DUMP_FINISHED_FILE: &str = "@.done.json";

/// Percent-encodes everything but ASCII letters, digits and `-_.~`.
pub fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub fn encode_table_basename(schema: &str, table: &str) -> String {
    format!("{}@{}", encode_name(schema), encode_name(table))
}

/// Hands out basenames, shortening the ones that are too long.
///
/// Truncated names get an ordinal so that two long names sharing a prefix
/// still map to different files.
#[derive(Debug, Default)]
pub struct BasenameRegistry {
    truncated: HashMap<String, usize>,
}

impl BasenameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn basename(&mut self, encoded: &str) -> String {
        if encoded.len() <= MAX_BASENAME_LENGTH {
            return encoded.to_string();
        }
        let mut end = MAX_BASENAME_LENGTH;
        while !encoded.is_char_boundary(end) {
            end -= 1;
        }
        let prefix = &encoded[..end];
        let ordinal = self.truncated.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}{ordinal}");
        *ordinal += 1;
        name
    }
}

/// `basename.ext`, `basename@N.ext` or `basename@@N.ext` for the last chunk.
pub fn data_filename(basename: &str, extension: &str, chunk: Option<(usize, bool)>) -> String {
    match chunk {
        None => format!("{basename}.{extension}"),
        Some((index, false)) => format!("{basename}@{index}.{extension}"),
        Some((index, true)) => format!("{basename}@@{index}.{extension}"),
    }
}
