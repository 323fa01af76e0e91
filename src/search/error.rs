use crate::search::kmer::KeyWidth;
use thiserror::Error;

/// Errors surfaced at the library boundary.
///
/// Input and configuration errors leave all state untouched. Resource
/// errors (`Io`, `Sqlite`) abort the operation that hit them after its
/// cleanup path has run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sequence character '{ch}' at position {offset}")]
    InvalidCharacter { ch: char, offset: usize },

    #[error("query of {len} bases is shorter than the {min} base minimum")]
    QueryTooShort { len: usize, min: usize },

    #[error("k-mer size {0} out of range (allowed 4..=32)")]
    KSizeOutOfRange(u8),

    #[error("occurrence bit width {0} out of range (allowed 1..=16)")]
    OccBitsOutOfRange(u8),

    #[error("max_rate {0} out of range (allowed (0, 1])")]
    RateOutOfRange(f64),

    #[error("ngram key needs {bits} bits (k={k}, occurrence bits={occ_bits}); 64 is the widest key class")]
    KeyTooWide { k: u8, occ_bits: u8, bits: u32 },

    #[error("configuration mismatch: {param} is {current} but the persisted analysis used {persisted}")]
    ConfigMismatch {
        param: &'static str,
        current: String,
        persisted: String,
    },

    #[error("shared cache key mismatch: {param} is {current} but the segment was built with {persisted}")]
    CacheKeyMismatch {
        param: &'static str,
        current: String,
        persisted: String,
    },

    #[error("shared cache segment is corrupt or incompatible")]
    SharedCacheCorrupt,

    #[error("dataset {dataset_id} column '{column}' has no persisted analysis")]
    MissingAnalysis { dataset_id: u64, column: String },

    #[error("dataset contains no rows")]
    EmptyDataset,

    #[error("analysis worker failed: {0}")]
    Worker(String),

    #[error("ngram key width mismatch: index uses {expected:?} but this operation produced {found:?}")]
    KeyWidthMismatch {
        expected: KeyWidth,
        found: KeyWidth,
    },

    #[error("catalog error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
