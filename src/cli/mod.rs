pub mod counters;
pub mod io;
pub mod opts;

/// Row-count type used throughout the analyzer and catalog.
pub type RowCount = u64;
