use crate::search::cache::{HighFreqCache, MinScoreCache};
use crate::search::error::{Error, Result};
use crate::search::kmer::{KeyWidth, KmerParams};
use crate::search::shared::SharedKmerCache;
use fxhash::{FxHashMap, FxHasher};
use std::hash::Hasher;

/// Default absolute floor of the score threshold.
pub const MIN_SCORE_DEFAULT: u64 = 1;

/// Default relative rate of the score threshold.
pub const MIN_SCORE_RATE_DEFAULT: f64 = 0.5;

/// Score threshold configuration.
///
/// * `min_score` – absolute floor
/// * `min_score_rate` – fraction of the query's key count
#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub min_score: u64,
    pub min_score_rate: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        ScoreParams {
            min_score: MIN_SCORE_DEFAULT,
            min_score_rate: MIN_SCORE_RATE_DEFAULT,
        }
    }
}

/// Anything that answers "is this k-mer high-frequency": the local
/// cache or a shared-segment attachment.
pub trait KmerLookup {
    fn contains_kmer(&self, kmer: u64) -> bool;
}

impl KmerLookup for HighFreqCache {
    #[inline]
    fn contains_kmer(&self, kmer: u64) -> bool {
        self.contains(kmer)
    }
}

impl KmerLookup for SharedKmerCache {
    #[inline]
    fn contains_kmer(&self, kmer: u64) -> bool {
        self.contains(kmer)
    }
}

/// Order-sensitive fingerprint of a key set; memo key for the
/// adjusted-threshold cache. Computed over the filtered set so queries
/// with differing high-frequency content never collide.
pub fn key_set_fingerprint(keys: &[u64]) -> u64 {
    let mut h = FxHasher::default();
    for &k in keys {
        h.write_u64(k);
    }
    h.write_usize(keys.len());
    h.finish()
}

/// Build-time filter: drop every key whose k-mer part is cached.
/// Survivors keep their order.
pub fn filter_keys(keys: &[u64], params: &KmerParams, cache: &dyn KmerLookup) -> Vec<u64> {
    keys.iter()
        .copied()
        .filter(|&key| !cache.contains_kmer(params.kmer_of_key(key)))
        .collect()
}

/// Base score threshold: max(absolute floor, ⌈rate · nkeys⌉).
pub fn base_threshold(nkeys: usize, params: &ScoreParams) -> u64 {
    let by_rate = (params.min_score_rate * nkeys as f64).ceil() as u64;
    params.min_score.max(by_rate)
}

/// The scoring decision for one query.
#[derive(Debug)]
pub struct QueryPlan {
    /// Keys that can still fire on a filtered index.
    pub filtered_keys: Vec<u64>,
    /// Query keys whose k-mer is high-frequency.
    pub highfreq_hits: u64,
    pub threshold: u64,
}

/// Compute (and memoize) the adjusted threshold for a query key set.
///
/// H keys with cached k-mers can never match a filtered index, so the
/// base threshold slackens by H, clamped at zero. With no cache loaded
/// the plan degrades to the unadjusted base threshold over the full
/// key set.
pub fn plan_query(
    query_keys: &[u64],
    kmer_params: &KmerParams,
    score_params: &ScoreParams,
    cache: Option<&dyn KmerLookup>,
    memo: &mut MinScoreCache,
) -> QueryPlan {
    let base = base_threshold(query_keys.len(), score_params);
    let Some(cache) = cache else {
        return QueryPlan {
            filtered_keys: query_keys.to_vec(),
            highfreq_hits: 0,
            threshold: base,
        };
    };
    let filtered = filter_keys(query_keys, kmer_params, cache);
    let hits = (query_keys.len() - filtered.len()) as u64;
    let fingerprint = key_set_fingerprint(&filtered);
    let threshold = match memo.get(fingerprint) {
        Some(t) => t,
        None => {
            let t = base.saturating_sub(hits);
            memo.put(fingerprint, t);
            t
        }
    };
    QueryPlan {
        filtered_keys: filtered,
        highfreq_hits: hits,
        threshold,
    }
}

// -----------------------------------------------------------------------------
// Inverted index stand-in
// -----------------------------------------------------------------------------

/// Minimal in-memory inverted index: ngram key → posting list of row
/// ids. Stands in for the host's index so the build and query paths
/// run end-to-end.
pub struct MemIndex {
    width: KeyWidth,
    postings: FxHashMap<u64, Vec<u64>>,
    row_ids: Vec<u64>,
}

impl MemIndex {
    pub fn new(width: KeyWidth) -> Self {
        MemIndex {
            width,
            postings: FxHashMap::default(),
            row_ids: Vec::new(),
        }
    }

    pub fn rows(&self) -> u64 {
        self.row_ids.len() as u64
    }

    /// Add one row's (already filtered) keys. The key width is fixed
    /// for the index lifetime; a differently-configured caller is a
    /// fatal inconsistency.
    pub fn add_row(&mut self, row_id: u64, keys: &[u64], params: &KmerParams) -> Result<()> {
        if params.key_width() != self.width {
            return Err(Error::KeyWidthMismatch {
                expected: self.width,
                found: params.key_width(),
            });
        }
        for &key in keys {
            let posting = self.postings.entry(key).or_default();
            // Saturated ordinals can repeat a key within one row
            if posting.last() != Some(&row_id) {
                posting.push(row_id);
            }
        }
        self.row_ids.push(row_id);
        Ok(())
    }

    /// Rows whose hit count reaches `threshold`, ranked by descending
    /// score, ties by ascending row id.
    pub fn search(
        &self,
        query_keys: &[u64],
        threshold: u64,
        params: &KmerParams,
    ) -> Result<Vec<(u64, u64)>> {
        if params.key_width() != self.width {
            return Err(Error::KeyWidthMismatch {
                expected: self.width,
                found: params.key_width(),
            });
        }
        let mut scores: FxHashMap<u64, u64> = FxHashMap::default();
        // A fully slackened threshold qualifies every row (score >= 0)
        if threshold == 0 {
            scores.extend(self.row_ids.iter().map(|&r| (r, 0)));
        }
        for key in query_keys {
            if let Some(posting) = self.postings.get(key) {
                for &row in posting {
                    *scores.entry(row).or_insert(0) += 1;
                }
            }
        }
        let mut out: Vec<(u64, u64)> = scores
            .into_iter()
            .filter(|&(_, score)| score >= threshold)
            .collect();
        out.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(out)
    }
}
