//! Command-line value parsing.

pub mod size;

pub use size::parse_size;
