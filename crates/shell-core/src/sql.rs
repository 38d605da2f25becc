//! SQL text helpers for statements built by hand.

/// Quote an identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `` `schema`.`table` ``
pub fn quote_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// Quote a string literal.
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Hexadecimal literal, `X'...'`, for values that are not valid text.
pub fn quote_bytes(value: &[u8]) -> String {
    format!("X'{}'", hex::encode_upper(value))
}

/// Comma separated, quoted identifiers.
pub fn quote_identifier_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_identifier(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("t1"), "`t1`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(quote_table("s", "t"), "`s`.`t`");
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("it's"), "'it\\'s'");
        assert_eq!(quote_string("a\\b\n"), "'a\\\\b\\n'");
    }

    #[test]
    fn test_quote_bytes() {
        assert_eq!(quote_bytes(&[0x80, 0x0a, 0xff]), "X'800AFF'");
        assert_eq!(quote_bytes(&[]), "X''");
    }

    #[test]
    fn test_identifier_list() {
        assert_eq!(quote_identifier_list(&["a", "b"]), "`a`, `b`");
    }
}
