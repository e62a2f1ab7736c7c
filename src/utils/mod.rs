//! Utility functions for string comparison and matching.

pub mod text;

// Re-export commonly used functions at module level
pub use text::{cmp_ignore_case, contains_ignore_case};
