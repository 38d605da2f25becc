use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A `major.minor.patch` server or schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, Error)]
#[error("Invalid version string: '{0}'")]
pub struct ParseVersionError(String);

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    /// Accepts server strings such as `8.0.36-log`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let numeric = s
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();
        if numeric.is_empty() {
            return Err(ParseVersionError(s.to_string()));
        }

        let mut parts = [0u32; 3];
        for (i, part) in numeric.split('.').enumerate() {
            if i >= 3 {
                break;
            }
            if part.is_empty() {
                return Err(ParseVersionError(s.to_string()));
            }
            parts[i] = part
                .parse()
                .map_err(|_| ParseVersionError(s.to_string()))?;
        }

        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}
