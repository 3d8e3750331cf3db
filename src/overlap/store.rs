// ferrous-erate/src/overlap/store.rs
//
// Overlap store interface plus two reference implementations: an in-memory
// store used by tests and embedders, and a simple binary file store.
//
// File layout (little-endian):
//   header:  magic "FEOVS001" (8 bytes), record count (u64)
//   records: a_id u32, b_id u32, a_hang i32, b_hang i32,
//            evalue u16, flags u16 (bit 0 = flipped), reserved u32, aux u64
//
// Records are sorted by a_id; the writer refuses anything else and the reader
// verifies it while building its per-read index.
//
// The writer puts UNFINISHED_COUNT in the header until `finish` stores the
// real count, so the file of an aborted run never opens as a valid store.

use anyhow::{Context, Result, bail, ensure};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::record::Overlap;
use crate::utils::{FINGERPRINT_SEED, fingerprint_step};

pub const STORE_MAGIC: &[u8; 8] = b"FEOVS001";
pub const STORE_HEADER_BYTES: u64 = 16;
pub const STORE_RECORD_BYTES: usize = 32;

/// Header count of a store whose writer never finished.
pub const UNFINISHED_COUNT: u64 = u64::MAX;

const FLAG_FLIPPED: u16 = 0x0001;

/// Ordered, blockwise-readable source of overlaps keyed by owning read id.
pub trait OverlapSource {
    /// Restrict the source to owning reads `id_min..=id_max` and rewind.
    fn set_range(&mut self, id_min: u32, id_max: u32) -> Result<()>;

    /// Number of overlaps whose owning read is inside the current range.
    fn num_overlaps_in_range(&self) -> u64;

    /// Overlap count per owning read; index 0 is `id_min`.
    fn num_overlaps_per_read(&self) -> Vec<u32>;

    /// Append up to `max` overlaps, in store order, to `buf` (which is cleared
    /// first). Returns the number loaded; 0 once the range is exhausted.
    fn load_block_of_overlaps(&mut self, buf: &mut Vec<Overlap>, max: usize) -> Result<usize>;

    /// Restart reading from the first overlap of the range.
    fn rewind(&mut self) -> Result<()>;

    /// Hash of every record in the store, in order, ignoring the range.
    /// Two stores with the same records hash the same.
    fn content_hash(&self) -> u64;
}

/// Append-only destination for surviving overlaps.
pub trait OverlapSink {
    fn append(&mut self, ovl: &Overlap) -> Result<()>;

    /// Flush everything and return the number of overlaps written.
    fn finish(&mut self) -> Result<u64>;
}

impl OverlapSink for Vec<Overlap> {
    fn append(&mut self, ovl: &Overlap) -> Result<()> {
        self.push(*ovl);
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        Ok(self.len() as u64)
    }
}

pub fn encode_overlap(ovl: &Overlap) -> [u8; STORE_RECORD_BYTES] {
    let mut out = [0u8; STORE_RECORD_BYTES];
    out[0..4].copy_from_slice(&ovl.a_id.to_le_bytes());
    out[4..8].copy_from_slice(&ovl.b_id.to_le_bytes());
    out[8..12].copy_from_slice(&ovl.a_hang.to_le_bytes());
    out[12..16].copy_from_slice(&ovl.b_hang.to_le_bytes());
    out[16..18].copy_from_slice(&ovl.evalue.to_le_bytes());
    let flags = if ovl.flipped { FLAG_FLIPPED } else { 0 };
    out[18..20].copy_from_slice(&flags.to_le_bytes());
    // 20..24 reserved
    out[24..32].copy_from_slice(&ovl.aux.to_le_bytes());
    out
}

pub fn decode_overlap(bytes: &[u8; STORE_RECORD_BYTES]) -> Overlap {
    fn u32_at(b: &[u8], o: usize) -> u32 {
        u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
    }
    let flags = u16::from_le_bytes([bytes[18], bytes[19]]);
    let mut aux = [0u8; 8];
    aux.copy_from_slice(&bytes[24..32]);

    Overlap {
        a_id: u32_at(bytes, 0),
        b_id: u32_at(bytes, 4),
        a_hang: u32_at(bytes, 8) as i32,
        b_hang: u32_at(bytes, 12) as i32,
        evalue: u16::from_le_bytes([bytes[16], bytes[17]]),
        flipped: flags & FLAG_FLIPPED != 0,
        aux: u64::from_le_bytes(aux),
    }
}

/// Fold one encoded record into a running content hash.
fn hash_record(acc: u64, record: &[u8; STORE_RECORD_BYTES]) -> u64 {
    record.chunks_exact(8).fold(acc, |acc, chunk| {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        fingerprint_step(acc, u64::from_le_bytes(word))
    })
}

fn per_read_counts(a_ids: impl Iterator<Item = u32>, id_min: u32, id_max: u32) -> Vec<u32> {
    if id_max < id_min {
        return Vec::new();
    }
    let mut counts = vec![0u32; (id_max - id_min) as usize + 1];
    for a_id in a_ids {
        if a_id >= id_min && a_id <= id_max {
            counts[(a_id - id_min) as usize] += 1;
        }
    }
    counts
}

// ============================================================================
// In-memory store
// ============================================================================

/// Overlap store held entirely in memory.
pub struct MemoryOverlapStore {
    overlaps: Vec<Overlap>,
    id_min: u32,
    id_max: u32,
    range_begin: usize,
    range_end: usize,
    cursor: usize,
    content_hash: u64,
}

impl MemoryOverlapStore {
    /// Wrap a list of overlaps, which must already be sorted by `a_id`.
    pub fn new(overlaps: Vec<Overlap>) -> Result<Self> {
        if let Some(pos) = overlaps.windows(2).position(|w| w[0].a_id > w[1].a_id) {
            bail!(
                "overlaps not sorted by a_id: record {} has a_id {} after a_id {}",
                pos + 1,
                overlaps[pos + 1].a_id,
                overlaps[pos].a_id
            );
        }
        let range_end = overlaps.len();
        let content_hash = overlaps
            .iter()
            .fold(FINGERPRINT_SEED, |acc, o| hash_record(acc, &encode_overlap(o)));
        Ok(MemoryOverlapStore {
            overlaps,
            id_min: 0,
            id_max: u32::MAX,
            range_begin: 0,
            range_end,
            cursor: 0,
            content_hash,
        })
    }

    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }
}

impl OverlapSource for MemoryOverlapStore {
    fn set_range(&mut self, id_min: u32, id_max: u32) -> Result<()> {
        ensure!(id_min <= id_max, "empty overlap range {}..={}", id_min, id_max);
        self.id_min = id_min;
        self.id_max = id_max;
        self.range_begin = self.overlaps.partition_point(|o| o.a_id < id_min);
        self.range_end = self.overlaps.partition_point(|o| o.a_id <= id_max);
        self.cursor = self.range_begin;
        Ok(())
    }

    fn num_overlaps_in_range(&self) -> u64 {
        (self.range_end - self.range_begin) as u64
    }

    fn num_overlaps_per_read(&self) -> Vec<u32> {
        per_read_counts(
            self.overlaps[self.range_begin..self.range_end].iter().map(|o| o.a_id),
            self.id_min,
            self.id_max,
        )
    }

    fn load_block_of_overlaps(&mut self, buf: &mut Vec<Overlap>, max: usize) -> Result<usize> {
        buf.clear();
        let end = self.range_end.min(self.cursor + max);
        buf.extend_from_slice(&self.overlaps[self.cursor..end]);
        self.cursor = end;
        Ok(buf.len())
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = self.range_begin;
        Ok(())
    }

    fn content_hash(&self) -> u64 {
        self.content_hash
    }
}

// ============================================================================
// File store
// ============================================================================

/// Reader for the binary overlap store file.
pub struct OverlapStoreReader {
    path: PathBuf,
    reader: BufReader<File>,
    /// Overlap count per owning read id, indexed by a_id.
    counts: Vec<u32>,
    id_min: u32,
    id_max: u32,
    range_begin: u64,
    range_len: u64,
    loaded: u64,
    content_hash: u64,
}

impl OverlapStoreReader {
    /// Open a store, check its header and ordering, and select the full id range.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open overlap store '{}'", path.display()))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(1 << 20, file);

        let mut header = [0u8; STORE_HEADER_BYTES as usize];
        reader
            .read_exact(&mut header)
            .with_context(|| format!("overlap store '{}' is truncated", path.display()))?;
        ensure!(
            &header[0..8] == STORE_MAGIC,
            "'{}' is not an overlap store (bad magic)",
            path.display()
        );
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[8..16]);
        let num_overlaps = u64::from_le_bytes(count_bytes);
        ensure!(
            num_overlaps != UNFINISHED_COUNT,
            "overlap store '{}' was never finished; the run that wrote it failed",
            path.display()
        );

        let expected_len = num_overlaps
            .checked_mul(STORE_RECORD_BYTES as u64)
            .and_then(|n| n.checked_add(STORE_HEADER_BYTES));
        ensure!(
            expected_len == Some(file_len),
            "overlap store '{}' has {} bytes, expected {} for {} overlaps",
            path.display(),
            file_len,
            expected_len.unwrap_or(u64::MAX),
            num_overlaps
        );

        // Single pass over the records to build the per-read index.
        let mut counts: Vec<u32> = Vec::new();
        let mut last_a_id = 0u32;
        let mut content_hash = FINGERPRINT_SEED;
        let mut record = [0u8; STORE_RECORD_BYTES];
        for no in 0..num_overlaps {
            reader.read_exact(&mut record)?;
            let a_id = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            ensure!(
                a_id >= last_a_id,
                "overlap store '{}' not sorted: overlap {} has a_id {} after {}",
                path.display(),
                no,
                a_id,
                last_a_id
            );
            last_a_id = a_id;
            content_hash = hash_record(content_hash, &record);
            if counts.len() <= a_id as usize {
                counts.resize(a_id as usize + 1, 0);
            }
            counts[a_id as usize] += 1;
        }

        log::debug!(
            "Indexed overlap store '{}': {} overlaps, max a_id {}",
            path.display(),
            num_overlaps,
            counts.len().saturating_sub(1)
        );

        let mut store = OverlapStoreReader {
            path: path.to_path_buf(),
            reader,
            counts,
            id_min: 0,
            id_max: u32::MAX,
            range_begin: 0,
            range_len: num_overlaps,
            loaded: 0,
            content_hash,
        };
        store.rewind()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn count_for(&self, id: u32) -> u32 {
        self.counts.get(id as usize).copied().unwrap_or(0)
    }
}

impl OverlapSource for OverlapStoreReader {
    fn set_range(&mut self, id_min: u32, id_max: u32) -> Result<()> {
        ensure!(id_min <= id_max, "empty overlap range {}..={}", id_min, id_max);
        let below: u64 = self
            .counts
            .iter()
            .take(id_min as usize)
            .map(|&c| c as u64)
            .sum();
        let inside: u64 = (id_min..=id_max.min(self.counts.len() as u32))
            .map(|id| self.count_for(id) as u64)
            .sum();

        self.id_min = id_min;
        self.id_max = id_max;
        self.range_begin = below;
        self.range_len = inside;
        self.rewind()
    }

    fn num_overlaps_in_range(&self) -> u64 {
        self.range_len
    }

    fn num_overlaps_per_read(&self) -> Vec<u32> {
        if self.id_max == u32::MAX {
            // Full range: size by the largest id actually present.
            let id_max = (self.counts.len() as u32).saturating_sub(1).max(self.id_min);
            return (self.id_min..=id_max).map(|id| self.count_for(id)).collect();
        }
        (self.id_min..=self.id_max).map(|id| self.count_for(id)).collect()
    }

    fn load_block_of_overlaps(&mut self, buf: &mut Vec<Overlap>, max: usize) -> Result<usize> {
        buf.clear();
        let n = (self.range_len - self.loaded).min(max as u64) as usize;
        let mut record = [0u8; STORE_RECORD_BYTES];
        for _ in 0..n {
            self.reader.read_exact(&mut record).with_context(|| {
                format!("short read from overlap store '{}'", self.path.display())
            })?;
            buf.push(decode_overlap(&record));
        }
        self.loaded += n as u64;
        Ok(n)
    }

    fn rewind(&mut self) -> Result<()> {
        let offset = STORE_HEADER_BYTES + self.range_begin * STORE_RECORD_BYTES as u64;
        self.reader.seek(SeekFrom::Start(offset))?;
        self.loaded = 0;
        Ok(())
    }

    fn content_hash(&self) -> u64 {
        self.content_hash
    }
}

/// Writer for the binary overlap store file.
pub struct OverlapStoreWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    last_a_id: u32,
    finished: bool,
}

impl OverlapStoreWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create overlap store '{}'", path.display()))?;
        let mut writer = BufWriter::with_capacity(1 << 20, file);
        writer.write_all(STORE_MAGIC)?;
        writer.write_all(&UNFINISHED_COUNT.to_le_bytes())?;
        Ok(OverlapStoreWriter {
            path: path.to_path_buf(),
            writer,
            written: 0,
            last_a_id: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverlapSink for OverlapStoreWriter {
    fn append(&mut self, ovl: &Overlap) -> Result<()> {
        ensure!(!self.finished, "overlap store '{}' already finished", self.path.display());
        ensure!(
            ovl.a_id >= self.last_a_id,
            "overlap store '{}' is append-only by a_id: got {} after {}",
            self.path.display(),
            ovl.a_id,
            self.last_a_id
        );
        self.writer.write_all(&encode_overlap(ovl))?;
        self.last_a_id = ovl.a_id;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        if !self.finished {
            self.writer.flush()?;
            let file = self.writer.get_mut();
            file.seek(SeekFrom::Start(STORE_MAGIC.len() as u64))?;
            file.write_all(&self.written.to_le_bytes())?;
            file.sync_all()
                .with_context(|| format!("failed to sync overlap store '{}'", self.path.display()))?;
            self.finished = true;
        }
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Overlap> {
        vec![
            Overlap::new(1, 2, 0, 0, 0.01, false),
            Overlap::new(1, 3, 5, -5, 0.02, true),
            Overlap::new(2, 1, 0, 0, 0.01, false),
            Overlap::new(4, 1, -3, 7, 0.03, false),
            Overlap::new(4, 2, 1, 1, 0.04, true),
            Overlap::new(4, 3, 2, 2, 0.05, false),
        ]
    }

    fn drain(src: &mut dyn OverlapSource, block: usize) -> Vec<Overlap> {
        let mut all = Vec::new();
        let mut buf = Vec::new();
        while src.load_block_of_overlaps(&mut buf, block).unwrap() > 0 {
            all.extend_from_slice(&buf);
        }
        all
    }

    #[test]
    fn test_record_codec() {
        let mut ovl = Overlap::new(7, 8_000_000, -65536, 65535, 0.5, true);
        ovl.aux = 0xdead_beef_0bad_f00d;
        assert_eq!(decode_overlap(&encode_overlap(&ovl)), ovl);
    }

    #[test]
    fn test_memory_store_range() {
        let mut store = MemoryOverlapStore::new(sample()).unwrap();
        store.set_range(2, 4).unwrap();
        assert_eq!(store.num_overlaps_in_range(), 4);
        assert_eq!(store.num_overlaps_per_read(), vec![1, 0, 3]);

        let first = drain(&mut store, 3);
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].a_id, 2);

        store.rewind().unwrap();
        assert_eq!(drain(&mut store, 1), first);
    }

    #[test]
    fn test_memory_store_rejects_unsorted() {
        let mut ovls = sample();
        ovls.swap(0, 3);
        assert!(MemoryOverlapStore::new(ovls).is_err());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.ovs");

        let mut writer = OverlapStoreWriter::create(&path).unwrap();
        for ovl in sample() {
            writer.append(&ovl).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 6);

        let mut reader = OverlapStoreReader::open(&path).unwrap();
        assert_eq!(reader.num_overlaps_in_range(), 6);
        assert_eq!(drain(&mut reader, 4), sample());

        reader.set_range(1, 2).unwrap();
        assert_eq!(reader.num_overlaps_in_range(), 3);
        assert_eq!(reader.num_overlaps_per_read(), vec![2, 1]);
        assert_eq!(drain(&mut reader, 2), sample()[0..3].to_vec());

        reader.set_range(3, 4).unwrap();
        assert_eq!(reader.num_overlaps_per_read(), vec![0, 3]);
        assert_eq!(drain(&mut reader, 10), sample()[3..].to_vec());
        reader.rewind().unwrap();
        assert_eq!(drain(&mut reader, 10), sample()[3..].to_vec());
    }

    #[test]
    fn test_file_writer_rejects_unsorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OverlapStoreWriter::create(&dir.path().join("bad.ovs")).unwrap();
        writer.append(&Overlap::new(5, 1, 0, 0, 0.0, false)).unwrap();
        assert!(writer.append(&Overlap::new(4, 1, 0, 0, 0.0, false)).is_err());
    }

    #[test]
    fn test_file_reader_rejects_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.ovs");
        let mut writer = OverlapStoreWriter::create(&path).unwrap();
        writer.append(&Overlap::new(1, 2, 0, 0, 0.0, false)).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(OverlapStoreReader::open(&path).is_err());
    }

    #[test]
    fn test_unfinished_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.ovs");
        drop(OverlapStoreWriter::create(&empty).unwrap());
        assert_eq!(std::fs::metadata(&empty).unwrap().len(), STORE_HEADER_BYTES);
        assert!(OverlapStoreReader::open(&empty).is_err());

        let partial = dir.path().join("partial.ovs");
        let mut writer = OverlapStoreWriter::create(&partial).unwrap();
        writer.append(&Overlap::new(1, 2, 0, 0, 0.0, false)).unwrap();
        drop(writer);
        assert!(OverlapStoreReader::open(&partial).is_err());

        // Finishing with zero records is a valid, empty store.
        let mut writer = OverlapStoreWriter::create(&empty).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
        let reader = OverlapStoreReader::open(&empty).unwrap();
        assert_eq!(reader.num_overlaps_in_range(), 0);
    }

    #[test]
    fn test_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash.ovs");
        let mut writer = OverlapStoreWriter::create(&path).unwrap();
        for ovl in sample() {
            writer.append(&ovl).unwrap();
        }
        writer.finish().unwrap();

        let memory = MemoryOverlapStore::new(sample()).unwrap();
        let mut file = OverlapStoreReader::open(&path).unwrap();
        assert_eq!(memory.content_hash(), file.content_hash());

        // The range does not change the hash.
        file.set_range(3, 4).unwrap();
        assert_eq!(memory.content_hash(), file.content_hash());

        let mut changed = sample();
        changed[4].evalue += 1;
        let changed = MemoryOverlapStore::new(changed).unwrap();
        assert_ne!(memory.content_hash(), changed.content_hash());
    }
}
