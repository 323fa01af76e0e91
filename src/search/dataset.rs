use crate::search::codec::{encode, Alphabet, PackedSeq};
use crate::search::error::{Error, Result};

/// Block-addressable source of packed rows: the host side of the
/// analyzer. A dataset is split into partitions, each a run of
/// fixed-size blocks; the analyzer hands out global block numbers.
pub trait Dataset: Sync {
    /// Stable identity of the dataset (part of the cache key).
    fn id(&self) -> u64;

    /// Name of the indexed column (part of the cache key).
    fn column(&self) -> &str;

    fn alphabet(&self) -> Alphabet;

    fn partitions(&self) -> usize;

    /// Number of blocks in one partition.
    fn blocks_in(&self, part: usize) -> u64;

    fn total_rows(&self) -> u64;

    /// Rows of one block. The final block of a partition may be short.
    fn read_block(&self, part: usize, block: u64) -> Result<Vec<PackedSeq>>;
}

/// Precomputed interval table from global block numbers to
/// (partition, local block) pairs.
pub struct BlockMap {
    /// `starts[p]` = first global block number of partition `p`;
    /// ascending, one entry per partition.
    starts: Vec<u64>,
    total: u64,
}

impl BlockMap {
    pub fn build(dataset: &dyn Dataset) -> Self {
        let mut starts = Vec::with_capacity(dataset.partitions());
        let mut next = 0u64;
        for p in 0..dataset.partitions() {
            starts.push(next);
            next += dataset.blocks_in(p);
        }
        BlockMap {
            starts,
            total: next,
        }
    }

    pub fn total_blocks(&self) -> u64 {
        self.total
    }

    /// Map a global block number to its partition and local block.
    /// Callers keep `global < total_blocks()`.
    pub fn locate(&self, global: u64) -> (usize, u64) {
        let part = self.starts.partition_point(|&s| s <= global) - 1;
        (part, global - self.starts[part])
    }
}

/// In-memory dataset over pre-packed rows; the stand-in the CLI and the
/// tests drive the analyzer with.
pub struct MemoryDataset {
    id: u64,
    column: String,
    alphabet: Alphabet,
    block_rows: usize,
    parts: Vec<Vec<PackedSeq>>,
}

impl MemoryDataset {
    /// Pack one partition of ASCII rows into a dataset.
    ///
    /// * `block_rows` – rows per block (the parallel work unit).
    pub fn from_ascii<S: AsRef<[u8]>>(
        id: u64,
        column: &str,
        alphabet: Alphabet,
        rows: &[S],
        block_rows: usize,
    ) -> Result<Self> {
        let packed = rows
            .iter()
            .map(|r| encode(alphabet, r.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_packed(id, column, alphabet, vec![packed], block_rows))
    }

    /// Assemble a (possibly partitioned) dataset from packed rows.
    pub fn from_packed(
        id: u64,
        column: &str,
        alphabet: Alphabet,
        parts: Vec<Vec<PackedSeq>>,
        block_rows: usize,
    ) -> Self {
        assert!(block_rows > 0, "block_rows must be positive");
        MemoryDataset {
            id,
            column: column.to_string(),
            alphabet,
            block_rows,
            parts,
        }
    }

    /// Global row number of the first row in a partition; rows are
    /// numbered partition-major, matching index row ids.
    pub fn first_row_of(&self, part: usize) -> u64 {
        self.parts[..part].iter().map(|p| p.len() as u64).sum()
    }
}

impl Dataset for MemoryDataset {
    fn id(&self) -> u64 {
        self.id
    }

    fn column(&self) -> &str {
        &self.column
    }

    fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    fn partitions(&self) -> usize {
        self.parts.len()
    }

    fn blocks_in(&self, part: usize) -> u64 {
        (self.parts[part].len() as u64).div_ceil(self.block_rows as u64)
    }

    fn total_rows(&self) -> u64 {
        self.parts.iter().map(|p| p.len() as u64).sum()
    }

    fn read_block(&self, part: usize, block: u64) -> Result<Vec<PackedSeq>> {
        let rows = &self.parts[part];
        let lo = (block as usize) * self.block_rows;
        if lo >= rows.len() {
            return Err(Error::Worker(format!(
                "block {block} out of range for partition {part}"
            )));
        }
        let hi = (lo + self.block_rows).min(rows.len());
        Ok(rows[lo..hi].to_vec())
    }
}
