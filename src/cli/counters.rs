use crate::cli::RowCount;

/// Per-worker tallies from one analysis scan; workers keep a private
/// copy and the coordinator folds them together after join.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanCounters {
    pub rows: RowCount,
    /// K-mer emissions before per-row dedup.
    pub kmers: u64,
    /// Distinct k-mers after per-row dedup.
    pub distinct_kmers: u64,
    pub batches: u64,
}

impl std::ops::AddAssign for ScanCounters {
    fn add_assign(&mut self, other: Self) {
        self.rows += other.rows;
        self.kmers += other.kmers;
        self.distinct_kmers += other.distinct_kmers;
        self.batches += other.batches;
    }
}
