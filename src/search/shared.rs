use crate::search::cache::CacheKey;
use crate::search::error::{Error, Result};
use crate::search::kmer::KeyWidth;
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// File-backed shared cache segment layout, all fields u64
/// little-endian:
///
/// ```text
///  Offset  Field
///  0       Magic
///  8       Version
///  16      Slot width in bits (16 / 32 / 64)
///  24      dataset_id        ┐
///  32      column_hash       │
///  40      k                 │ cache key
///  48      occ_bits          │
///  56      max_rate_bits     │
///  64      max_nrow          ┘
///  72      bucket_count (power of two)
///  80      entry_count
///  88      reserved
///  96      occupancy bitmap, bucket_count / 8 bytes
///  ...     slot array, bucket_count × slot width
/// ```
///
/// Slots are addressed by identity hashing (the k-mer is the hash)
/// with linear probing; load factor stays at or below one half, so
/// probes always terminate on an empty slot. The segment is immutable
/// once created: attachments are read-only borrows, dropped handles
/// simply unmap, and only the creator unlinks the file.
const MAGIC: u64 = 0x4B4D_5348_4643_0001; // "KMSHFC" + version tag
const VERSION: u64 = 1;
const HEADER_LEN: usize = 96;
const MIN_BUCKETS: u64 = 64;

#[inline]
fn get_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

#[inline]
fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Cross-process high-frequency k-mer cache over a shared mapping.
#[derive(Debug)]
pub struct SharedKmerCache {
    map: Mmap,
    path: PathBuf,
    key: CacheKey,
    width: KeyWidth,
    buckets: u64,
    entries: u64,
    creator: bool,
}

impl SharedKmerCache {
    /// Build and publish the segment at `path` (creator role).
    ///
    /// * `width` – slot width by k: ≤8 → u16, ≤16 → u32, else u64.
    pub fn create<I>(path: &Path, key: &CacheKey, width: KeyWidth, kmers: I) -> Result<Self>
    where
        I: IntoIterator<Item = u64>,
    {
        let kmers: Vec<u64> = kmers.into_iter().collect();
        let buckets = (kmers.len() as u64 * 2)
            .next_power_of_two()
            .max(MIN_BUCKETS);
        let mask = buckets - 1;
        let slot_bytes = (width.bits() / 8) as usize;
        let bitmap_off = HEADER_LEN;
        let slots_off = bitmap_off + (buckets / 8) as usize;
        let total = slots_off + buckets as usize * slot_bytes;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total as u64)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        put_u64(&mut map, 0, MAGIC);
        put_u64(&mut map, 8, VERSION);
        put_u64(&mut map, 16, width.bits() as u64);
        put_u64(&mut map, 24, key.dataset_id);
        put_u64(&mut map, 32, key.column_hash);
        put_u64(&mut map, 40, key.k as u64);
        put_u64(&mut map, 48, key.occ_bits as u64);
        put_u64(&mut map, 56, key.max_rate_bits);
        put_u64(&mut map, 64, key.max_nrow);
        put_u64(&mut map, 72, buckets);

        let mut entries = 0u64;
        for kmer in kmers {
            let mut idx = kmer & mask;
            loop {
                let bit_byte = bitmap_off + (idx / 8) as usize;
                let bit = 1u8 << (idx % 8);
                if map[bit_byte] & bit == 0 {
                    map[bit_byte] |= bit;
                    let off = slots_off + idx as usize * slot_bytes;
                    map[off..off + slot_bytes]
                        .copy_from_slice(&kmer.to_le_bytes()[..slot_bytes]);
                    entries += 1;
                    break;
                }
                if read_slot(&map, slots_off, slot_bytes, idx) == kmer {
                    break; // duplicate insert is a no-op
                }
                idx = (idx + 1) & mask;
            }
        }
        put_u64(&mut map, 80, entries);

        map.flush()?;
        let map = map.make_read_only()?;
        Ok(SharedKmerCache {
            map,
            path: path.to_path_buf(),
            key: *key,
            width,
            buckets,
            entries,
            creator: true,
        })
    }

    /// Attach to an existing segment, refusing one whose cache key does
    /// not match `expected`. The mapping is read-only and pinned until
    /// the handle drops (detach).
    pub fn attach(path: &Path, expected: &CacheKey) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < HEADER_LEN
            || get_u64(&map, 0) != MAGIC
            || get_u64(&map, 8) != VERSION
        {
            return Err(Error::SharedCacheCorrupt);
        }
        let width = match get_u64(&map, 16) {
            16 => KeyWidth::U16,
            32 => KeyWidth::U32,
            64 => KeyWidth::U64,
            _ => return Err(Error::SharedCacheCorrupt),
        };
        let stored = CacheKey {
            dataset_id: get_u64(&map, 24),
            column_hash: get_u64(&map, 32),
            k: get_u64(&map, 40) as u8,
            occ_bits: get_u64(&map, 48) as u8,
            max_rate_bits: get_u64(&map, 56),
            max_nrow: get_u64(&map, 64),
        };
        check_key(&stored, expected)?;

        let buckets = get_u64(&map, 72);
        if !buckets.is_power_of_two() || buckets < MIN_BUCKETS {
            return Err(Error::SharedCacheCorrupt);
        }
        let slot_bytes = (width.bits() / 8) as usize;
        let expected_len = HEADER_LEN + (buckets / 8) as usize + buckets as usize * slot_bytes;
        if map.len() != expected_len {
            return Err(Error::SharedCacheCorrupt);
        }
        let entries = get_u64(&map, 80);
        Ok(SharedKmerCache {
            map,
            path: path.to_path_buf(),
            key: stored,
            width,
            buckets,
            entries,
            creator: false,
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn width(&self) -> KeyWidth {
        self.width
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity-hash probe.
    pub fn contains(&self, kmer: u64) -> bool {
        let mask = self.buckets - 1;
        let slot_bytes = (self.width.bits() / 8) as usize;
        let slots_off = HEADER_LEN + (self.buckets / 8) as usize;
        let mut idx = kmer & mask;
        loop {
            let bit_byte = HEADER_LEN + (idx / 8) as usize;
            if self.map[bit_byte] & (1u8 << (idx % 8)) == 0 {
                return false;
            }
            if read_slot(&self.map, slots_off, slot_bytes, idx) == kmer {
                return true;
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Unlink the segment. Creator role only; attachments merely
    /// detach by dropping their handle.
    pub fn destroy(self) -> Result<()> {
        debug_assert!(self.creator, "destroy is reserved to the segment creator");
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)?;
        Ok(())
    }
}

#[inline]
fn read_slot(buf: &[u8], slots_off: usize, slot_bytes: usize, idx: u64) -> u64 {
    let off = slots_off + idx as usize * slot_bytes;
    let mut raw = [0u8; 8];
    raw[..slot_bytes].copy_from_slice(&buf[off..off + slot_bytes]);
    u64::from_le_bytes(raw)
}

fn check_key(stored: &CacheKey, expected: &CacheKey) -> Result<()> {
    let mismatch = |param: &'static str, persisted: String, current: String| {
        Err(Error::CacheKeyMismatch {
            param,
            current,
            persisted,
        })
    };
    if stored.dataset_id != expected.dataset_id {
        return mismatch(
            "dataset_id",
            stored.dataset_id.to_string(),
            expected.dataset_id.to_string(),
        );
    }
    if stored.column_hash != expected.column_hash {
        return mismatch(
            "column",
            format!("hash {:#x}", stored.column_hash),
            format!("hash {:#x}", expected.column_hash),
        );
    }
    if stored.k != expected.k {
        return mismatch("k", stored.k.to_string(), expected.k.to_string());
    }
    if stored.occ_bits != expected.occ_bits {
        return mismatch(
            "occurrence_bits",
            stored.occ_bits.to_string(),
            expected.occ_bits.to_string(),
        );
    }
    if stored.max_rate_bits != expected.max_rate_bits {
        return mismatch(
            "max_rate",
            f64::from_bits(stored.max_rate_bits).to_string(),
            f64::from_bits(expected.max_rate_bits).to_string(),
        );
    }
    if stored.max_nrow != expected.max_nrow {
        return mismatch(
            "max_nrow",
            stored.max_nrow.to_string(),
            expected.max_nrow.to_string(),
        );
    }
    Ok(())
}
