use crate::search::catalog::Catalog;
use crate::search::error::{Error, Result};
use crate::search::kmer::{KeyWidth, KmerParams};
use fxhash::{FxHashMap, FxHashSet, FxHasher};
use lru::LruCache;
use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Rows fetched from the catalog per round while loading a cache.
pub const LOAD_BATCH_DEFAULT: u64 = 1000;

/// Default capacity of the parsed-query LRU.
pub const PATTERN_CACHE_CAPACITY: usize = 64;

/// Identity of one high-frequency set. Two caches (local or shared)
/// built under different tuples are incomparable; every attach/load
/// verifies the tuple first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub dataset_id: u64,
    pub column_hash: u64,
    pub k: u8,
    pub occ_bits: u8,
    /// `f64::to_bits` of max_rate, kept as bits for Eq/Hash.
    pub max_rate_bits: u64,
    pub max_nrow: u64,
}

impl CacheKey {
    pub fn new(
        dataset_id: u64,
        column: &str,
        params: &KmerParams,
        max_rate: f64,
        max_nrow: u64,
    ) -> CacheKey {
        CacheKey {
            dataset_id,
            column_hash: hash_column(column),
            k: params.k(),
            occ_bits: params.occ_bits(),
            max_rate_bits: max_rate.to_bits(),
            max_nrow,
        }
    }

    pub fn max_rate(&self) -> f64 {
        f64::from_bits(self.max_rate_bits)
    }
}

pub fn hash_column(column: &str) -> u64 {
    let mut h = FxHasher::default();
    h.write(column.as_bytes());
    h.finish()
}

// -----------------------------------------------------------------------------
// (a) High-frequency k-mer cache
// -----------------------------------------------------------------------------

/// Per-process set of high-frequency k-mer bit patterns, loaded from
/// the catalog in batches after the configuration has been validated
/// against the persisted analysis metadata.
#[derive(Debug)]
pub struct HighFreqCache {
    key: CacheKey,
    width: KeyWidth,
    kmers: FxHashSet<u64>,
}

impl HighFreqCache {
    /// Stream the persisted set for `(dataset, column)` into memory.
    ///
    /// * `batch` – catalog rows per fetch; 0 falls back to the default.
    ///
    /// Fails with [`Error::MissingAnalysis`] when nothing is persisted
    /// and with [`Error::ConfigMismatch`] when any of (k, b, max_rate,
    /// max_nrow) differs from the persisted tuple; nothing is loaded in
    /// either case.
    pub fn load(
        catalog: &Catalog,
        dataset_id: u64,
        column: &str,
        params: &KmerParams,
        max_rate: f64,
        max_nrow: u64,
        batch: u64,
    ) -> Result<Self> {
        let meta = catalog
            .meta_for(dataset_id, column)?
            .ok_or_else(|| Error::MissingAnalysis {
                dataset_id,
                column: column.to_string(),
            })?;

        let mismatch = |param: &'static str, persisted: String, current: String| {
            Err(Error::ConfigMismatch {
                param,
                current,
                persisted,
            })
        };
        if meta.k != params.k() {
            return mismatch("k", meta.k.to_string(), params.k().to_string());
        }
        if meta.occ_bits != params.occ_bits() {
            return mismatch(
                "occurrence_bits",
                meta.occ_bits.to_string(),
                params.occ_bits().to_string(),
            );
        }
        if meta.max_rate.to_bits() != max_rate.to_bits() {
            return mismatch("max_rate", meta.max_rate.to_string(), max_rate.to_string());
        }
        if meta.max_nrow != max_nrow {
            return mismatch("max_nrow", meta.max_nrow.to_string(), max_nrow.to_string());
        }

        let batch = if batch == 0 { LOAD_BATCH_DEFAULT } else { batch };
        let mut kmers = FxHashSet::default();
        let mut offset = 0u64;
        loop {
            let chunk = catalog.kmer_batch(dataset_id, column, offset, batch)?;
            let n = chunk.len() as u64;
            kmers.extend(chunk);
            if n < batch {
                break;
            }
            offset += n;
        }

        Ok(HighFreqCache {
            key: CacheKey::new(dataset_id, column, params, max_rate, max_nrow),
            width: params.kmer_width(),
            kmers,
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn width(&self) -> KeyWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.kmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }

    #[inline]
    pub fn contains(&self, kmer: u64) -> bool {
        self.kmers.contains(&kmer)
    }

    /// Iterate the cached patterns (shared-cache builds).
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.kmers.iter().copied()
    }
}

// -----------------------------------------------------------------------------
// (b) Parsed-query LRU
// -----------------------------------------------------------------------------

/// LRU of extracted key arrays keyed by `(query, k)`. The arrays are
/// owned by the cache and handed out behind `Arc` so a hit survives
/// later evictions.
pub struct QueryPatternCache {
    lru: LruCache<(String, u8), Arc<Vec<u64>>>,
}

impl QueryPatternCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        QueryPatternCache {
            lru: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, query: &str, k: u8) -> Option<Arc<Vec<u64>>> {
        self.lru.get(&(query.to_string(), k)).cloned()
    }

    pub fn put(&mut self, query: &str, k: u8, keys: Vec<u64>) -> Arc<Vec<u64>> {
        let arc = Arc::new(keys);
        self.lru.put((query.to_string(), k), arc.clone());
        arc
    }

    pub fn clear(&mut self) {
        self.lru.clear();
    }
}

// -----------------------------------------------------------------------------
// (c) Adjusted-min-score memo
// -----------------------------------------------------------------------------

/// Memo of adjusted thresholds keyed by the fingerprint of the
/// *filtered* query key set.
#[derive(Default)]
pub struct MinScoreCache {
    map: FxHashMap<u64, u64>,
}

impl MinScoreCache {
    pub fn get(&self, fingerprint: u64) -> Option<u64> {
        self.map.get(&fingerprint).copied()
    }

    pub fn put(&mut self, fingerprint: u64, threshold: u64) {
        self.map.insert(fingerprint, threshold);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

// -----------------------------------------------------------------------------
// Context
// -----------------------------------------------------------------------------

/// Process-local cache context threaded through the build and query
/// paths. Created on first use, freed explicitly or on drop; a change
/// of cache key tears everything down and reloads.
pub struct SearchContext {
    highfreq: Option<HighFreqCache>,
    patterns: QueryPatternCache,
    min_scores: MinScoreCache,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self::new(PATTERN_CACHE_CAPACITY)
    }
}

impl SearchContext {
    pub fn new(pattern_capacity: usize) -> Self {
        SearchContext {
            highfreq: None,
            patterns: QueryPatternCache::new(pattern_capacity),
            min_scores: MinScoreCache::default(),
        }
    }

    /// Make the high-frequency cache for this tuple current.
    ///
    /// * Same tuple already loaded – no work.
    /// * Different tuple – full tear-down, then load.
    /// * No persisted analysis – runs uncached (`Ok(false)`).
    /// * Configuration mismatch – propagated before any lookup.
    /// * Resource failure – degraded mode: uncached, logged here once
    ///   per affected query.
    ///
    /// Returns whether a cache is loaded afterwards.
    pub fn ensure_highfreq(
        &mut self,
        catalog: &Catalog,
        dataset_id: u64,
        column: &str,
        params: &KmerParams,
        max_rate: f64,
        max_nrow: u64,
        batch: u64,
    ) -> Result<bool> {
        let wanted = CacheKey::new(dataset_id, column, params, max_rate, max_nrow);
        if let Some(cache) = &self.highfreq {
            if *cache.key() == wanted {
                return Ok(true);
            }
            self.free();
        }
        match HighFreqCache::load(catalog, dataset_id, column, params, max_rate, max_nrow, batch) {
            Ok(cache) => {
                self.highfreq = Some(cache);
                Ok(true)
            }
            Err(Error::MissingAnalysis { .. }) => Ok(false),
            Err(e @ Error::ConfigMismatch { .. }) => Err(e),
            Err(e) => {
                eprintln!("warning: high-frequency cache unavailable, query runs unfiltered: {e}");
                Ok(false)
            }
        }
    }

    pub fn highfreq(&self) -> Option<&HighFreqCache> {
        self.highfreq.as_ref()
    }

    pub fn patterns(&mut self) -> &mut QueryPatternCache {
        &mut self.patterns
    }

    pub fn min_scores(&mut self) -> &mut MinScoreCache {
        &mut self.min_scores
    }

    /// Split borrow for the scorer: the loaded cache (if any) together
    /// with the threshold memo.
    pub fn scoring_parts(&mut self) -> (Option<&HighFreqCache>, &mut MinScoreCache) {
        (self.highfreq.as_ref(), &mut self.min_scores)
    }

    /// Idempotent tear-down of every cache.
    pub fn free(&mut self) {
        self.highfreq = None;
        self.patterns.clear();
        self.min_scores.clear();
    }
}
