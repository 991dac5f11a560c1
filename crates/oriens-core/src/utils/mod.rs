//! Utility functions for string and amount formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{contains_ignore_case, format_amount, truncate};
