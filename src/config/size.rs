//! Byte size parsing utilities.

use anyhow::Context;

/// Parse a byte size like "64M", "128k", "1G" or "4096" into bytes.
/// Supports:
/// - Plain numbers (interpreted as bytes): "4096"
/// - Kilobytes suffix: "128k" or "128K"
/// - Megabytes suffix: "64M" or "64m"
/// - Gigabytes suffix: "1G" or "1g"
///
/// Units are powers of 1024.
pub fn parse_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty size string");
    }

    let (num_str, multiplier) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1024),
        Some('m' | 'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size value: {s}"))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("Size value out of range: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("128k").unwrap(), 128 * 1024);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size(" 2G ").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12x").is_err());
        assert!(parse_size("-1k").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }
}
