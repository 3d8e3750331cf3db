// Overlap cache
//
// Holds the compact form of every overlap owned by the working read range,
// in store order, plus the per-read index into it. Records come either from a
// pass over the overlap store (packed into a heap buffer and optionally
// persisted) or from a previously persisted cache file that is memory-mapped
// read-only.
//
// Discard decisions never touch the records themselves: they go into a dense
// atomic bitset overlay, so a mapped cache stays immutable.
//
// Cache file layout (little-endian):
//   magic "FEOVLC01" (8), version u32, id_min u32, id_max u32, reserved u32,
//   count u64, fingerprint u64, store_hash u64, then `count` 12-byte compact
//   records.
//
// The fingerprint folds the read range and the live store's per-read overlap
// counts; store_hash is the store's content hash. A cache built from a
// different store or range is refused.

use anyhow::{Context, Result, anyhow, bail, ensure};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use super::compact::{COMPACT_OVERLAP_BYTES, CompactOverlap};
use super::record::Overlap;
use super::store::{OverlapSource, STORE_RECORD_BYTES};
use crate::erate_opt::{ReadRange, RefineOpt};
use crate::utils;

pub const CACHE_MAGIC: &[u8; 8] = b"FEOVLC01";
pub const CACHE_VERSION: u32 = 2;
pub const CACHE_HEADER_BYTES: usize = 48;

/// Dense bitset of discarded records, safe to set from many threads.
pub struct DiscardSet {
    words: Vec<AtomicU64>,
    len: usize,
}

impl DiscardSet {
    pub fn new(len: usize) -> Self {
        DiscardSet {
            words: (0..len.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.words[i >> 6].load(Ordering::Relaxed) & (1u64 << (i & 63)) != 0
    }

    /// Set bit `i`; returns true if it was clear before.
    #[inline]
    pub fn set(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        let mask = 1u64 << (i & 63);
        self.words[i >> 6].fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    pub fn count(&self) -> u64 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheHeader {
    version: u32,
    id_min: u32,
    id_max: u32,
    count: u64,
    fingerprint: u64,
    store_hash: u64,
}

impl CacheHeader {
    fn to_bytes(&self) -> [u8; CACHE_HEADER_BYTES] {
        let mut out = [0u8; CACHE_HEADER_BYTES];
        out[0..8].copy_from_slice(CACHE_MAGIC);
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.id_min.to_le_bytes());
        out[16..20].copy_from_slice(&self.id_max.to_le_bytes());
        // 20..24 reserved
        out[24..32].copy_from_slice(&self.count.to_le_bytes());
        out[32..40].copy_from_slice(&self.fingerprint.to_le_bytes());
        out[40..48].copy_from_slice(&self.store_hash.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() >= CACHE_HEADER_BYTES, "cache header truncated");
        ensure!(&bytes[0..8] == CACHE_MAGIC, "bad cache magic");
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let u64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[o..o + 8]);
            u64::from_le_bytes(b)
        };
        Ok(CacheHeader {
            version: u32_at(8),
            id_min: u32_at(12),
            id_max: u32_at(16),
            count: u64_at(24),
            fingerprint: u64_at(32),
            store_hash: u64_at(40),
        })
    }
}

enum Backing {
    Owned(Vec<CompactOverlap>),
    Mapped(Mmap),
}

pub struct OverlapCache {
    range: ReadRange,
    backing: Backing,
    len: usize,
    /// Records of read `range.id_min + i` are `index[i]..index[i + 1]`.
    index: Vec<u64>,
    discards: DiscardSet,
}

impl OverlapCache {
    /// Load the compact overlaps of `range` from `source`.
    ///
    /// When `opt.cache` names an existing file it is validated against the
    /// live store and mapped instead of re-reading the store; when it names a
    /// missing file the packed records are written there after loading.
    pub fn load(source: &mut dyn OverlapSource, range: ReadRange, opt: &RefineOpt) -> Result<Self> {
        source.set_range(range.id_min, range.id_max)?;

        let num_overlaps = source.num_overlaps_in_range();
        let per_read = source.num_overlaps_per_read();
        ensure!(
            per_read.len() == range.len(),
            "overlap store reported counts for {} reads, expected {}",
            per_read.len(),
            range.len()
        );

        let mut index = Vec::with_capacity(per_read.len() + 1);
        index.push(0u64);
        for &c in &per_read {
            let last = *index.last().unwrap_or(&0);
            index.push(last + c as u64);
        }
        ensure!(
            index[per_read.len()] == num_overlaps,
            "overlap store per-read counts sum to {}, but range holds {} overlaps",
            index[per_read.len()],
            num_overlaps
        );

        let fingerprint = Self::fingerprint(range, num_overlaps, &per_read);

        log::info!("Loading overlaps");
        log::info!("  number   {} overlaps", num_overlaps);
        log::info!(
            "  index    {:.1} MB",
            (index.len() * std::mem::size_of::<u64>()) as f64 / 1024.0 / 1024.0
        );
        log::info!(
            "  overlaps {:.1} MB (store records)",
            (num_overlaps as usize * STORE_RECORD_BYTES) as f64 / 1024.0 / 1024.0
        );
        log::info!(
            "  overlaps {:.1} MB (compact records)",
            (num_overlaps as usize * COMPACT_OVERLAP_BYTES) as f64 / 1024.0 / 1024.0
        );

        let header = CacheHeader {
            version: CACHE_VERSION,
            id_min: range.id_min,
            id_max: range.id_max,
            count: num_overlaps,
            fingerprint,
            store_hash: source.content_hash(),
        };

        if let Some(path) = opt.cache.as_deref() {
            if path.exists() {
                log::info!("  cache '{}' detected, load averted", path.display());
                return Self::map(path, range, index, &header);
            }
        }

        let records = Self::pack_from_store(source, &index, range, num_overlaps, opt.overlap_block)?;

        if let Some(path) = opt.cache.as_deref() {
            Self::persist(path, &header, &records)?;
            log::info!("  loaded and cached {} overlaps in '{}'", records.len(), path.display());
        } else {
            log::info!("  loaded {} overlaps", records.len());
        }

        Ok(Self::from_records(range, index, records))
    }

    fn from_records(range: ReadRange, index: Vec<u64>, records: Vec<CompactOverlap>) -> Self {
        let len = records.len();
        OverlapCache {
            range,
            backing: Backing::Owned(records),
            len,
            index,
            discards: DiscardSet::new(len),
        }
    }

    pub fn fingerprint(range: ReadRange, num_overlaps: u64, per_read: &[u32]) -> u64 {
        utils::fingerprint(
            [range.id_min as u64, range.id_max as u64, num_overlaps]
                .into_iter()
                .chain(per_read.iter().map(|&c| c as u64)),
        )
    }

    fn pack_from_store(
        source: &mut dyn OverlapSource,
        index: &[u64],
        range: ReadRange,
        num_overlaps: u64,
        block: usize,
    ) -> Result<Vec<CompactOverlap>> {
        let mut records: Vec<CompactOverlap> = Vec::new();
        records
            .try_reserve_exact(num_overlaps as usize)
            .map_err(|e| anyhow!("cannot allocate {} compact overlaps: {}", num_overlaps, e))?;

        source.rewind()?;
        let mut buf: Vec<Overlap> = Vec::with_capacity(block.min(num_overlaps as usize));
        let mut owner = 0usize;

        while (records.len() as u64) < num_overlaps {
            let n = source.load_block_of_overlaps(&mut buf, block)?;
            ensure!(
                n > 0,
                "overlap store ended after {} of {} overlaps",
                records.len(),
                num_overlaps
            );
            for ovl in &buf {
                let no = records.len() as u64;
                ensure!(
                    no < num_overlaps,
                    "overlap store returned more than {} overlaps",
                    num_overlaps
                );
                while index[owner + 1] <= no {
                    owner += 1;
                }
                let expected = range.id_min + owner as u32;
                ensure!(
                    ovl.a_id == expected,
                    "overlap {} belongs to read {}, expected read {} from per-read counts",
                    no,
                    ovl.a_id,
                    expected
                );
                records.push(CompactOverlap::pack(ovl).with_context(|| format!("overlap {}", no))?);
            }
            log::debug!(
                "  loading overlaps: {} out of {} ({:.4}%)",
                records.len(),
                num_overlaps,
                100.0 * records.len() as f64 / num_overlaps as f64
            );
        }

        Ok(records)
    }

    fn persist(path: &Path, header: &CacheHeader, records: &[CompactOverlap]) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create overlap cache '{}'", path.display()))?;
        let mut writer = BufWriter::with_capacity(1 << 20, file);
        writer.write_all(&header.to_bytes())?;
        for rec in records {
            writer.write_all(&rec.to_le_bytes())?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write overlap cache '{}'", path.display()))?;
        Ok(())
    }

    fn map(path: &Path, range: ReadRange, index: Vec<u64>, expected: &CacheHeader) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open overlap cache '{}'", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };

        let found = CacheHeader::from_bytes(&mmap)
            .with_context(|| format!("'{}' is not an overlap cache", path.display()))?;
        if found != *expected {
            bail!(
                "overlap cache '{}' is stale: built for reads {}..={} with {} overlaps \
                 (version {}, fingerprint {:016x}, store {:016x}), store has reads {}..={} \
                 with {} overlaps (version {}, fingerprint {:016x}, store {:016x}); \
                 remove it to rebuild",
                path.display(),
                found.id_min,
                found.id_max,
                found.count,
                found.version,
                found.fingerprint,
                found.store_hash,
                expected.id_min,
                expected.id_max,
                expected.count,
                expected.version,
                expected.fingerprint,
                expected.store_hash
            );
        }

        let len = expected.count as usize;
        let expected_bytes = CACHE_HEADER_BYTES + len * COMPACT_OVERLAP_BYTES;
        ensure!(
            mmap.len() == expected_bytes,
            "overlap cache '{}' has {} bytes, expected {}",
            path.display(),
            mmap.len(),
            expected_bytes
        );

        log::debug!(
            "Memory-mapped overlap cache: {} bytes ({:.1} MB)",
            mmap.len(),
            mmap.len() as f64 / 1024.0 / 1024.0
        );

        Ok(OverlapCache {
            range,
            backing: Backing::Mapped(mmap),
            len,
            index,
            discards: DiscardSet::new(len),
        })
    }

    pub fn range(&self) -> ReadRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    #[inline]
    pub fn record(&self, i: usize) -> CompactOverlap {
        match &self.backing {
            Backing::Owned(records) => records[i],
            Backing::Mapped(mmap) => {
                let offset = CACHE_HEADER_BYTES + i * COMPACT_OVERLAP_BYTES;
                CompactOverlap::from_le_bytes(&mmap[offset..offset + COMPACT_OVERLAP_BYTES])
            }
        }
    }

    /// Positions of the records owned by `read_id`; empty outside the range.
    #[inline]
    pub fn overlaps_of(&self, read_id: u32) -> Range<usize> {
        if !self.range.contains(read_id) {
            return 0..0;
        }
        let i = (read_id - self.range.id_min) as usize;
        self.index[i] as usize..self.index[i + 1] as usize
    }

    /// Whether record `i` is discarded, merging the persisted bit and the overlay.
    #[inline]
    pub fn is_discarded(&self, i: usize) -> bool {
        self.discards.get(i) || self.record(i).discarded()
    }

    /// Mark record `i` discarded. Returns true if this call changed it.
    #[inline]
    pub fn discard(&self, i: usize) -> bool {
        self.discards.set(i)
    }

    pub fn num_discarded(&self) -> u64 {
        (0..self.len).filter(|&i| self.is_discarded(i)).count() as u64
    }
}
