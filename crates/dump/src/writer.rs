//! Formatting of rows for `LOAD DATA`-compatible text files.

use shell_core::{ColumnKind, Row, Value};

use crate::options::Dialect;

/// Turns rows into delimited text according to a [`Dialect`].
pub struct RowWriter {
    fields_terminated_by: Vec<u8>,
    lines_terminated_by: Vec<u8>,
    enclosed_by: Option<u8>,
    escaped_by: Option<u8>,
    /// Whether each column gets enclosed.
    enclose: Vec<bool>,
    /// Bytes that must be escaped.
    special: Vec<u8>,
}

impl RowWriter {
    pub fn new(dialect: &Dialect, columns: &[ColumnKind]) -> Self {
        let enclosed_by = dialect.fields_enclosed_by.bytes().next();
        let escaped_by = dialect.fields_escaped_by.bytes().next();
        let enclose = columns
            .iter()
            .map(|kind| {
                enclosed_by.is_some() && (!dialect.fields_optionally_enclosed || !kind.is_numeric())
            })
            .collect();

        let mut special = Vec::new();
        special.extend(escaped_by);
        special.extend(enclosed_by);
        special.extend(dialect.fields_terminated_by.bytes().next());
        special.extend(dialect.lines_terminated_by.bytes().next());

        Self {
            fields_terminated_by: dialect.fields_terminated_by.as_bytes().to_vec(),
            lines_terminated_by: dialect.lines_terminated_by.as_bytes().to_vec(),
            enclosed_by,
            escaped_by,
            enclose,
            special,
        }
    }

    /// Appends one formatted row to `out`, returning the number of bytes added.
    pub fn write_row(&self, row: &Row, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        for (i, value) in row.values().iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&self.fields_terminated_by);
            }
            self.write_field(value, self.enclose.get(i).copied().unwrap_or(false), out);
        }
        out.extend_from_slice(&self.lines_terminated_by);
        out.len() - start
    }

    fn write_field(&self, value: &Value, enclose: bool, out: &mut Vec<u8>) {
        let text = match value {
            Value::Null => {
                match self.escaped_by {
                    Some(escape) => out.extend_from_slice(&[escape, b'N']),
                    None => out.extend_from_slice(b"NULL"),
                }
                return;
            }
            Value::Bytes(bytes) => std::borrow::Cow::Borrowed(bytes.as_slice()),
            other => std::borrow::Cow::Owned(other.to_text().unwrap_or_default().into_bytes()),
        };

        let enclosure = if enclose { self.enclosed_by } else { None };
        out.extend(enclosure);
        match self.escaped_by {
            Some(escape) => {
                for &byte in text.iter() {
                    if byte == 0 {
                        out.extend_from_slice(&[escape, b'0']);
                    } else if self.special.contains(&byte) {
                        out.extend_from_slice(&[escape, byte]);
                    } else {
                        out.push(byte);
                    }
                }
            }
            None => out.extend_from_slice(&text),
        }
        out.extend(enclosure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>) -> Row {
        Row::new(values)
    }

    fn format(dialect: &Dialect, kinds: &[ColumnKind], values: Vec<Value>) -> String {
        let writer = RowWriter::new(dialect, kinds);
        let mut out = Vec::new();
        let n = writer.write_row(&row(values), &mut out);
        assert_eq!(n, out.len());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_default_dialect_escapes_separators() {
        let line = format(
            &Dialect::default_dialect(),
            &[ColumnKind::Integer, ColumnKind::String, ColumnKind::String],
            vec![Value::Int(1), Value::from("a\tb\nc\\"), Value::Null],
        );
        assert_eq!(line, "1\ta\\\tb\\\nc\\\\\t\\N\n");
    }

    #[test]
    fn test_csv_optionally_encloses_strings() {
        let line = format(
            &Dialect::csv(),
            &[ColumnKind::Integer, ColumnKind::String, ColumnKind::Decimal],
            vec![Value::from("7"), Value::from("say \"hi\", bye"), Value::from("1.50")],
        );
        assert_eq!(line, "7,\"say \\\"hi\\\"\\, bye\",1.50\r\n");
    }

    #[test]
    fn test_csv_unix_encloses_everything() {
        let line = format(
            &Dialect::csv_unix(),
            &[ColumnKind::Integer, ColumnKind::Date],
            vec![Value::from("7"), Value::from("2024-01-02")],
        );
        assert_eq!(line, "\"7\",\"2024-01-02\"\n");
    }

    #[test]
    fn test_nul_byte() {
        let line = format(
            &Dialect::default_dialect(),
            &[ColumnKind::Bytes],
            vec![Value::Bytes(vec![b'a', 0, b'b'])],
        );
        assert_eq!(line, "a\\0b\n");
    }
}
