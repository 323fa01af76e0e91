use crate::search::codec::{encode, Alphabet, PackedSeq};
use crate::search::error::{Error, Result};
use fxhash::FxHashMap;
use smallvec::SmallVec;

pub const K_MIN: u8 = 4;
pub const K_MAX: u8 = 32;
pub const OCC_BITS_MIN: u8 = 1;
pub const OCC_BITS_MAX: u8 = 16;
pub const OCC_BITS_DEFAULT: u8 = 8;

/// Hard cap on how many concrete k-mers one degenerate window may
/// expand to. A window whose IUPAC product exceeds this is skipped
/// whole; partial expansion is never emitted.
pub const DEGENERATE_EXPANSION_CAP: usize = 10;

/// Queries below this many bases are rejected.
pub const MIN_QUERY_LEN: usize = 64;

/// The narrowest unsigned width that holds a bit count.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum KeyWidth {
    U16,
    U32,
    U64,
}

impl KeyWidth {
    /// Width class for `bits` total bits. Callers validate `bits <= 64`.
    pub fn for_bits(bits: u32) -> KeyWidth {
        if bits <= 16 {
            KeyWidth::U16
        } else if bits <= 32 {
            KeyWidth::U32
        } else {
            KeyWidth::U64
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            KeyWidth::U16 => 16,
            KeyWidth::U32 => 32,
            KeyWidth::U64 => 64,
        }
    }
}

/// Validated (k, occurrence-bit-width) pair; the unit every extraction
/// and cache operation is parameterized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerParams {
    k: u8,
    occ_bits: u8,
}

impl KmerParams {
    pub fn new(k: u8, occ_bits: u8) -> Result<Self> {
        if !(K_MIN..=K_MAX).contains(&k) {
            return Err(Error::KSizeOutOfRange(k));
        }
        if !(OCC_BITS_MIN..=OCC_BITS_MAX).contains(&occ_bits) {
            return Err(Error::OccBitsOutOfRange(occ_bits));
        }
        let bits = 2 * k as u32 + occ_bits as u32;
        if bits > 64 {
            return Err(Error::KeyTooWide { k, occ_bits, bits });
        }
        Ok(KmerParams { k, occ_bits })
    }

    #[inline]
    pub fn k(&self) -> u8 {
        self.k
    }

    #[inline]
    pub fn occ_bits(&self) -> u8 {
        self.occ_bits
    }

    /// Width class of a full ngram key (2k + b bits).
    pub fn key_width(&self) -> KeyWidth {
        KeyWidth::for_bits(2 * self.k as u32 + self.occ_bits as u32)
    }

    /// Width class of a bare k-mer (2k bits); governs the shared-cache
    /// slot size and the catalog column.
    pub fn kmer_width(&self) -> KeyWidth {
        KeyWidth::for_bits(2 * self.k as u32)
    }

    /// All-ones mask over the 2k k-mer bits.
    #[inline]
    pub fn kmer_mask(&self) -> u64 {
        let bits = 2 * self.k as u32;
        if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    /// Saturation point of the occurrence ordinal (2^b − 1).
    #[inline]
    pub fn max_ordinal(&self) -> u32 {
        (1u32 << self.occ_bits) - 1
    }

    /// Strip the occurrence bits off an ngram key.
    #[inline]
    pub fn kmer_of_key(&self, key: u64) -> u64 {
        key >> self.occ_bits
    }
}

// -----------------------------------------------------------------------------
// Extraction: 2-bit path
// -----------------------------------------------------------------------------

/// Lazy left-to-right k-mer stream over a packed 2-bit sequence.
///
/// Rolls a 2k-bit register: each step shifts in the next base and masks,
/// so emitting all max(0, N−k+1) windows costs O(N).
pub struct KmerIter<'a> {
    bytes: &'a [u8],
    len: usize,
    k: usize,
    mask: u64,
    code: u64,
    pos: usize,
    primed: bool,
}

impl<'a> KmerIter<'a> {
    pub fn new(seq: &'a PackedSeq, params: &KmerParams) -> Self {
        debug_assert_eq!(seq.alphabet, Alphabet::Dna2);
        KmerIter {
            bytes: &seq.bytes,
            len: seq.len,
            k: params.k as usize,
            mask: params.kmer_mask(),
            code: 0,
            pos: 0,
            primed: false,
        }
    }

    #[inline]
    fn base(&self, i: usize) -> u64 {
        ((self.bytes[i >> 2] >> (6 - 2 * (i & 3))) & 0x3) as u64
    }
}

impl Iterator for KmerIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if !self.primed {
            if self.len < self.k {
                return None;
            }
            for i in 0..self.k {
                self.code = (self.code << 2) | self.base(i);
            }
            self.pos = self.k;
            self.primed = true;
            return Some(self.code & self.mask);
        }
        if self.pos >= self.len {
            return None;
        }
        self.code = ((self.code << 2) | self.base(self.pos)) & self.mask;
        self.pos += 1;
        Some(self.code)
    }
}

// -----------------------------------------------------------------------------
// Extraction: 4-bit degenerate path
// -----------------------------------------------------------------------------

/// Per-window expansion buffer. The cap guarantees at most
/// [`DEGENERATE_EXPANSION_CAP`] entries.
type Expansion = SmallVec<[u64; DEGENERATE_EXPANSION_CAP]>;

/// K-mer stream over a packed 4-bit sequence.
///
/// Each window's IUPAC codes are expanded to the Cartesian product of
/// their base sets, emitted in ascending bit order. Windows whose
/// product exceeds the cap contribute nothing.
pub struct DegenerateKmerIter<'a> {
    bytes: &'a [u8],
    len: usize,
    k: usize,
    win: usize,
    buf: Expansion,
    buf_i: usize,
}

impl<'a> DegenerateKmerIter<'a> {
    pub fn new(seq: &'a PackedSeq, params: &KmerParams) -> Self {
        debug_assert_eq!(seq.alphabet, Alphabet::Dna4);
        DegenerateKmerIter {
            bytes: &seq.bytes,
            len: seq.len,
            k: params.k as usize,
            win: 0,
            buf: Expansion::new(),
            buf_i: 0,
        }
    }

    #[inline]
    fn nibble(&self, i: usize) -> u8 {
        (self.bytes[i >> 1] >> (4 - 4 * (i & 1))) & 0xF
    }

    /// Expand the window at `start`, or None when its product is 0 or
    /// exceeds the cap.
    fn expand(&self, start: usize) -> Option<Expansion> {
        // Base lists per position: nibble bit i set means 2-bit base i
        // is a member, so each list is naturally ascending.
        let mut lists: SmallVec<[SmallVec<[u8; 4]>; K_MAX as usize]> = SmallVec::new();
        let mut product = 1usize;
        for p in 0..self.k {
            let nib = self.nibble(start + p);
            product *= nib.count_ones() as usize;
            if product == 0 || product > DEGENERATE_EXPANSION_CAP {
                return None;
            }
            let mut bases: SmallVec<[u8; 4]> = SmallVec::new();
            for b in 0..4u8 {
                if nib & (1 << b) != 0 {
                    bases.push(b);
                }
            }
            lists.push(bases);
        }

        // Odometer over the per-position lists, rightmost digit fastest:
        // ascending lists make the output lexicographic on the bit form.
        let mut out = Expansion::new();
        let mut idx = [0usize; K_MAX as usize];
        loop {
            let mut code = 0u64;
            for p in 0..self.k {
                code = (code << 2) | lists[p][idx[p]] as u64;
            }
            out.push(code);
            let mut p = self.k;
            loop {
                if p == 0 {
                    return Some(out);
                }
                p -= 1;
                idx[p] += 1;
                if idx[p] < lists[p].len() {
                    break;
                }
                idx[p] = 0;
            }
        }
    }
}

impl Iterator for DegenerateKmerIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if self.buf_i < self.buf.len() {
                let code = self.buf[self.buf_i];
                self.buf_i += 1;
                return Some(code);
            }
            if self.len < self.k || self.win > self.len - self.k {
                return None;
            }
            let start = self.win;
            self.win += 1;
            if let Some(exp) = self.expand(start) {
                self.buf = exp;
                self.buf_i = 0;
            }
        }
    }
}

/// Alphabet-dispatched k-mer stream.
pub enum Kmers<'a> {
    Plain(KmerIter<'a>),
    Degenerate(DegenerateKmerIter<'a>),
}

impl<'a> Kmers<'a> {
    pub fn over(seq: &'a PackedSeq, params: &KmerParams) -> Self {
        match seq.alphabet {
            Alphabet::Dna2 => Kmers::Plain(KmerIter::new(seq, params)),
            Alphabet::Dna4 => Kmers::Degenerate(DegenerateKmerIter::new(seq, params)),
        }
    }
}

impl Iterator for Kmers<'_> {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        match self {
            Kmers::Plain(it) => it.next(),
            Kmers::Degenerate(it) => it.next(),
        }
    }
}

// -----------------------------------------------------------------------------
// Key builder
// -----------------------------------------------------------------------------

/// Tags each k-mer of one row with its occurrence ordinal and packs the
/// ngram key `(kmer << b) | ordinal`. Ordinals saturate at 2^b − 1 and
/// restart from zero at every row boundary.
pub struct KeyBuilder {
    occ_bits: u8,
    max_ordinal: u32,
    next_ordinal: FxHashMap<u64, u32>,
}

impl KeyBuilder {
    pub fn new(params: &KmerParams) -> Self {
        KeyBuilder {
            occ_bits: params.occ_bits,
            max_ordinal: params.max_ordinal(),
            next_ordinal: FxHashMap::default(),
        }
    }

    /// Row boundary: ordinals restart at zero.
    pub fn reset(&mut self) {
        self.next_ordinal.clear();
    }

    #[inline]
    pub fn key_for(&mut self, kmer: u64) -> u64 {
        let ord = self.next_ordinal.entry(kmer).or_insert(0);
        let key = (kmer << self.occ_bits) | *ord as u64;
        if *ord < self.max_ordinal {
            *ord += 1;
        }
        key
    }
}

/// Ngram keys of one row, in emission order. The builder is reset
/// first, so callers may reuse one builder across rows.
pub fn extract_row_keys(
    seq: &PackedSeq,
    params: &KmerParams,
    builder: &mut KeyBuilder,
) -> Vec<u64> {
    builder.reset();
    Kmers::over(seq, params).map(|km| builder.key_for(km)).collect()
}

/// Query-side extraction: enforces the minimum query length, encodes,
/// and emits ngram keys.
pub fn extract_query_keys(
    ascii: &[u8],
    alphabet: Alphabet,
    params: &KmerParams,
) -> Result<Vec<u64>> {
    if ascii.len() < MIN_QUERY_LEN {
        return Err(Error::QueryTooShort {
            len: ascii.len(),
            min: MIN_QUERY_LEN,
        });
    }
    let seq = encode(alphabet, ascii)?;
    let mut builder = KeyBuilder::new(params);
    Ok(extract_row_keys(&seq, params, &mut builder))
}

/// Distinct k-mers of one row (the analyzer's per-row dedup set is
/// built from this stream by the caller).
pub fn row_kmers<'a>(seq: &'a PackedSeq, params: &KmerParams) -> Kmers<'a> {
    Kmers::over(seq, params)
}
