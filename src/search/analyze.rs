use crate::cli::counters::ScanCounters;
use crate::search::catalog::{unix_now, AnalysisMeta, Catalog};
use crate::search::dataset::{BlockMap, Dataset};
use crate::search::error::{Error, Result};
use crate::search::kmer::{row_kmers, KmerParams};
use crate::search::spill::SpillStore;
use fxhash::{FxHashMap, FxHashSet};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Flush cadence: rows aggregated in memory before a spill commit.
pub const BATCH_ROWS_DEFAULT: u64 = 100_000;

/// Spill directories younger than this survive the janitor.
pub const JANITOR_GRACE: Duration = Duration::from_secs(60);

/// Prefix of per-job spill directories under the temp root.
pub const SPILL_DIR_PREFIX: &str = "kmersearch_";

/// Tuning of one analysis run.
///
/// * `max_rate` – fraction of rows a k-mer must exceed, in (0, 1]
/// * `max_nrow` – absolute row cap on the threshold; 0 disables it
/// * `batch_rows` – spill flush cadence
/// * `workers` – scan parallelism; 0 uses the rayon pool width
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeParams {
    pub kmer: KmerParams,
    pub max_rate: f64,
    pub max_nrow: u64,
    pub batch_rows: u64,
    pub workers: usize,
}

impl AnalyzeParams {
    pub fn new(kmer: KmerParams, max_rate: f64, max_nrow: u64) -> Result<Self> {
        let params = AnalyzeParams {
            kmer,
            max_rate,
            max_nrow,
            batch_rows: BATCH_ROWS_DEFAULT,
            workers: 0,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_rate > 0.0 && self.max_rate <= 1.0) {
            return Err(Error::RateOutOfRange(self.max_rate));
        }
        Ok(())
    }
}

/// Outcome of a completed analysis.
#[derive(Debug)]
pub struct AnalyzeSummary {
    pub total_rows: u64,
    pub threshold: u64,
    /// Persisted `(kmer, nrow)` pairs.
    pub highfreq: Vec<(u64, u64)>,
    /// Folded per-worker scan tallies.
    pub counters: ScanCounters,
}

/// Cooperative cancellation flag, checked at block boundaries and
/// batch commits.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Row-count threshold: a k-mer is high-frequency iff it appears in
/// strictly more rows than this.
pub fn frequency_threshold(max_rate: f64, max_nrow: u64, total_rows: u64) -> u64 {
    let by_rate = (max_rate * total_rows as f64).ceil() as u64;
    if max_nrow > 0 {
        by_rate.min(max_nrow)
    } else {
        by_rate
    }
}

// -----------------------------------------------------------------------------
// Dataset-level serialization
// -----------------------------------------------------------------------------

type LockTable = Mutex<FxHashMap<(u64, String), Arc<Mutex<()>>>>;

static DATASET_LOCKS: OnceLock<LockTable> = OnceLock::new();

/// Exclusive per-(dataset, column) lock; concurrent analyses of the
/// same column serialize on it.
fn dataset_lock(dataset_id: u64, column: &str) -> Arc<Mutex<()>> {
    let table = DATASET_LOCKS.get_or_init(|| Mutex::new(FxHashMap::default()));
    table
        .lock()
        .entry((dataset_id, column.to_string()))
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

// -----------------------------------------------------------------------------
// Stage 1: parallel block scan
// -----------------------------------------------------------------------------

/// State shared by the scan fleet.
struct ScanShared<'a> {
    dataset: &'a dyn Dataset,
    blocks: &'a BlockMap,
    params: KmerParams,
    batch_rows: u64,
    cursor: AtomicU64,
    failed: AtomicBool,
    first_error: Mutex<Option<String>>,
    cancel: &'a CancelToken,
    rows_done: AtomicU64,
    batches_done: AtomicU64,
    totals: Mutex<ScanCounters>,
    pb: &'a ProgressBar,
}

impl ScanShared<'_> {
    fn record_error(&self, msg: String) {
        if !self.failed.swap(true, Ordering::Relaxed) {
            *self.first_error.lock() = Some(msg);
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.failed.load(Ordering::Relaxed)
    }
}

fn flush_batch(
    store: &mut SpillStore,
    batch: &mut FxHashMap<u64, u64>,
    rows_in_batch: &mut u64,
    shared: &ScanShared<'_>,
) -> Result<bool> {
    if batch.is_empty() {
        *rows_in_batch = 0;
        return Ok(false);
    }
    store.upsert_batch(batch.drain())?;
    shared.rows_done.fetch_add(*rows_in_batch, Ordering::Relaxed);
    let batches = shared.batches_done.fetch_add(1, Ordering::Relaxed) + 1;
    shared.pb.set_message(format!(
        "{} rows, {} batches",
        shared.rows_done.load(Ordering::Relaxed),
        batches
    ));
    *rows_in_batch = 0;
    Ok(true)
}

/// One scan worker: claim blocks off the shared cursor until the
/// dataset is exhausted, aggregating per-row k-mer presence into a
/// private spill store.
fn scan_worker(shared: &ScanShared<'_>, spill_path: &Path) -> Result<()> {
    let mut store = SpillStore::create(spill_path)?;
    let mut batch: FxHashMap<u64, u64> = FxHashMap::default();
    let mut rows_in_batch = 0u64;
    let mut seen: FxHashSet<u64> = FxHashSet::default();
    let mut counters = ScanCounters::default();

    loop {
        if shared.should_stop() {
            break;
        }
        let global = shared.cursor.fetch_add(1, Ordering::Relaxed);
        if global >= shared.blocks.total_blocks() {
            break;
        }
        let (part, local) = shared.blocks.locate(global);
        let rows = shared.dataset.read_block(part, local)?;
        for seq in &rows {
            // Dedup within the row: nrow counts distinct rows, not
            // occurrences.
            seen.clear();
            for kmer in row_kmers(seq, &shared.params) {
                counters.kmers += 1;
                if seen.insert(kmer) {
                    counters.distinct_kmers += 1;
                    *batch.entry(kmer).or_insert(0) += 1;
                }
            }
            counters.rows += 1;
            rows_in_batch += 1;
            if rows_in_batch >= shared.batch_rows {
                if shared.should_stop() {
                    return Ok(());
                }
                if flush_batch(&mut store, &mut batch, &mut rows_in_batch, shared)? {
                    counters.batches += 1;
                }
            }
        }
        shared.pb.inc(1);
    }
    if flush_batch(&mut store, &mut batch, &mut rows_in_batch, shared)? {
        counters.batches += 1;
    }
    *shared.totals.lock() += counters;
    store.close()
}

// -----------------------------------------------------------------------------
// Stage 2: hierarchical merge
// -----------------------------------------------------------------------------

/// Pairwise merge waves over the worker spill stores: each wave merges
/// ⌊N/2⌋ (source → target) pairs in parallel and unlinks the sources;
/// an odd leftover carries to the next wave. UPSERT-sum is commutative
/// and associative, so any merge tree yields the same totals.
fn merge_waves(mut files: Vec<PathBuf>, cancel: &CancelToken) -> Result<PathBuf> {
    while files.len() > 1 {
        if cancel.is_cancelled() {
            return Err(Error::Worker("analysis cancelled".to_string()));
        }
        let mut wave: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len() / 2);
        let mut carry: Vec<PathBuf> = Vec::new();
        for pair in files.chunks(2) {
            match pair {
                [target, source] => wave.push((target.clone(), source.clone())),
                [leftover] => carry.push(leftover.clone()),
                _ => unreachable!(),
            }
        }
        let merged: Vec<PathBuf> = wave
            .into_par_iter()
            .map(|(target, source)| -> Result<PathBuf> {
                let mut store = SpillStore::create(&target)?;
                store.merge_from(&source)?;
                store.close()?;
                Ok(target)
            })
            .collect::<Result<_>>()?;
        files = merged;
        files.extend(carry);
    }
    Ok(files.into_iter().next().expect("at least one spill store"))
}

// -----------------------------------------------------------------------------
// Coordinator
// -----------------------------------------------------------------------------

/// Run the full analysis: scan, merge, threshold, persist.
///
/// Takes the dataset's exclusive lock for the duration. On any worker
/// error or cancellation nothing is persisted and the spill directory
/// is unlinked.
pub fn analyze_dataset(
    dataset: &dyn Dataset,
    params: &AnalyzeParams,
    catalog: &mut Catalog,
    temp_root: &Path,
    cancel: &CancelToken,
) -> Result<AnalyzeSummary> {
    params.validate()?;
    let total_rows = dataset.total_rows();
    if total_rows == 0 {
        return Err(Error::EmptyDataset);
    }

    let lock = dataset_lock(dataset.id(), dataset.column());
    let _guard = lock.lock();

    // Spill directory: unlinked on every exit path by the TempDir guard.
    let spill_dir = tempfile::Builder::new()
        .prefix(&format!(
            "{}{}_{}",
            SPILL_DIR_PREFIX,
            std::process::id(),
            unix_now()
        ))
        .tempdir_in(temp_root)?;

    let blocks = BlockMap::build(dataset);
    let workers = if params.workers == 0 {
        rayon::current_num_threads()
    } else {
        params.workers
    }
    .min(blocks.total_blocks().max(1) as usize)
    .max(1);

    let pb = ProgressBar::new(blocks.total_blocks());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("       {bar:40} {pos}/{len} [{elapsed_precise}] {msg}")
            .unwrap(),
    );

    let shared = ScanShared {
        dataset,
        blocks: &blocks,
        params: params.kmer,
        batch_rows: params.batch_rows.max(1),
        cursor: AtomicU64::new(0),
        failed: AtomicBool::new(false),
        first_error: Mutex::new(None),
        cancel,
        rows_done: AtomicU64::new(0),
        batches_done: AtomicU64::new(0),
        totals: Mutex::new(ScanCounters::default()),
        pb: &pb,
    };

    // Registry of spill files; every worker fills its slot exactly once.
    let registry: Mutex<Vec<Option<PathBuf>>> = Mutex::new(vec![None; workers]);

    rayon::scope(|s| {
        for w in 0..workers {
            let shared = &shared;
            let registry = &registry;
            let path = spill_dir.path().join(format!("spill_{w}.db"));
            s.spawn(move |_| {
                registry.lock()[w] = Some(path.clone());
                if let Err(e) = scan_worker(shared, &path) {
                    shared.record_error(e.to_string());
                }
            });
        }
    });

    if cancel.is_cancelled() {
        pb.finish_and_clear();
        return Err(Error::Worker("analysis cancelled".to_string()));
    }
    if shared.failed.load(Ordering::Relaxed) {
        pb.finish_and_clear();
        let msg = shared
            .first_error
            .lock()
            .take()
            .unwrap_or_else(|| "unknown worker failure".to_string());
        return Err(Error::Worker(msg));
    }

    let files: Vec<PathBuf> = registry.into_inner().into_iter().flatten().collect();
    let survivor = merge_waves(files, cancel)?;

    let threshold = frequency_threshold(params.max_rate, params.max_nrow, total_rows);
    let store = SpillStore::create(&survivor)?;
    let highfreq = store.rows_over(threshold)?;
    store.close()?;

    let meta = AnalysisMeta {
        dataset_id: dataset.id(),
        column: dataset.column().to_string(),
        k: params.kmer.k(),
        occ_bits: params.kmer.occ_bits(),
        max_rate: params.max_rate,
        max_nrow: params.max_nrow,
        analyzed_at: unix_now(),
    };
    catalog.replace_highfreq(&meta, &highfreq)?;

    pb.finish_with_message("| Finished analysis");

    let counters = *shared.totals.lock();
    Ok(AnalyzeSummary {
        total_rows,
        threshold,
        highfreq,
        counters,
    })
}

/// Tear down the persisted high-frequency set for `(dataset, column)`.
/// Returns whether a set existed.
pub fn undo_analyze(catalog: &mut Catalog, dataset_id: u64, column: &str) -> Result<bool> {
    let lock = dataset_lock(dataset_id, column);
    let _guard = lock.lock();
    catalog.remove(dataset_id, column)
}

/// Best-effort janitor: remove leftover spill directories under
/// `temp_root`, skipping anything modified within the grace window.
/// Returns the number of directories removed.
pub fn cleanup_spill_dirs(temp_root: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(temp_root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SPILL_DIR_PREFIX) {
            continue;
        }
        let recent = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|age| age < JANITOR_GRACE)
            .unwrap_or(true);
        if recent {
            continue;
        }
        if std::fs::remove_dir_all(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
