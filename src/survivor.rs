// ferrous-erate/src/survivor.rs
//
// Copy the overlaps that survived refinement from the original store to a new
// one. The cache does not hold every field of an overlap, so survivors are
// re-read from the source, which must replay exactly the records the cache
// was loaded from, in the same order.
//
// Sequential by necessity: the output store is append-only and ordered.

use anyhow::{Result, bail, ensure};

use crate::overlap::cache::OverlapCache;
use crate::overlap::compact::CompactOverlap;
use crate::overlap::record::Overlap;
use crate::overlap::store::{OverlapSink, OverlapSource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurvivorStats {
    pub retained: u64,
    pub dropped: u64,
}

pub struct SurvivorWriter {
    block: usize,
}

impl SurvivorWriter {
    pub fn new(block: usize) -> Self {
        SurvivorWriter { block: block.max(1) }
    }

    /// Replay `source` over the cache's read range and append every record
    /// whose discard flag is clear to `sink`.
    ///
    /// Each replayed record must pack to the cached record at the same
    /// position (ids, hangs, rate and orientation); any mismatch, or a
    /// different record count, means the cache does not describe this store
    /// and is fatal.
    pub fn write(
        &self,
        source: &mut dyn OverlapSource,
        cache: &OverlapCache,
        sink: &mut dyn OverlapSink,
    ) -> Result<SurvivorStats> {
        let range = cache.range();
        source.set_range(range.id_min, range.id_max)?;

        let num_overlaps = source.num_overlaps_in_range();
        ensure!(
            num_overlaps == cache.len() as u64,
            "overlap store holds {} overlaps for reads {}..={}, cache holds {}",
            num_overlaps,
            range.id_min,
            range.id_max,
            cache.len()
        );

        log::info!(
            "Writing survivors for reads {} to {} ({} overlaps)",
            range.id_min,
            range.id_max,
            num_overlaps
        );

        let mut stats = SurvivorStats::default();
        let mut buf: Vec<Overlap> = Vec::with_capacity(self.block.min(cache.len().max(1)));
        let mut no = 0usize;

        loop {
            let n = source.load_block_of_overlaps(&mut buf, self.block)?;
            if n == 0 {
                break;
            }
            for ovl in &buf {
                if no >= cache.len() {
                    bail!(
                        "overlap store yielded more than the {} cached overlaps",
                        cache.len()
                    );
                }
                let cached = cache.record(no);
                ensure!(
                    ovl.a_id == cached.a_id() && ovl.b_id == cached.b_id(),
                    "overlap {} out of order: store has {}-{}, cache has {}-{}",
                    no,
                    ovl.a_id,
                    ovl.b_id,
                    cached.a_id(),
                    cached.b_id()
                );
                ensure!(
                    CompactOverlap::pack(ovl)?.same_overlap(&cached),
                    "overlap {} ({}-{}) differs from the cached record: store has \
                     hangs {}/{} evalue {}, cache has hangs {}/{} evalue {}",
                    no,
                    ovl.a_id,
                    ovl.b_id,
                    ovl.a_hang,
                    ovl.b_hang,
                    ovl.evalue,
                    cached.a_hang(),
                    cached.b_hang(),
                    cached.erate()
                );

                if cache.is_discarded(no) {
                    stats.dropped += 1;
                } else {
                    sink.append(ovl)?;
                    stats.retained += 1;
                }

                if no & 0x000f_ffff == 0 {
                    log::debug!("  overlap {:10} {:8}-{:8}", no, ovl.a_id, ovl.b_id);
                }
                no += 1;
            }
        }

        ensure!(
            no == cache.len(),
            "overlap store ended after {} of {} cached overlaps",
            no,
            cache.len()
        );

        let written = sink.finish()?;
        log::info!("  discarded {}", stats.dropped);
        log::info!("  remain    {} ({} written)", stats.retained, written);

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erate_opt::{ReadRange, RefineOpt};
    use crate::overlap::store::MemoryOverlapStore;

    fn overlaps() -> Vec<Overlap> {
        let mut ovls = vec![
            Overlap::new(1, 2, 0, 0, 0.01, false),
            Overlap::new(1, 3, 0, 0, 0.02, true),
            Overlap::new(2, 1, 0, 0, 0.01, false),
            Overlap::new(3, 1, 0, 0, 0.02, true),
        ];
        for (i, o) in ovls.iter_mut().enumerate() {
            o.aux = 1000 + i as u64;
        }
        ovls
    }

    #[test]
    fn test_writes_survivors_with_full_fidelity() {
        let mut store = MemoryOverlapStore::new(overlaps()).unwrap();
        let cache = OverlapCache::load(&mut store, ReadRange::new(1, 3), &RefineOpt::default()).unwrap();
        cache.discard(1);

        let mut out: Vec<Overlap> = Vec::new();
        let stats = SurvivorWriter::new(3).write(&mut store, &cache, &mut out).unwrap();

        assert_eq!(stats, SurvivorStats { retained: 3, dropped: 1 });
        let expected: Vec<Overlap> = overlaps()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, o)| o)
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_order_mismatch_is_fatal() {
        let mut store = MemoryOverlapStore::new(overlaps()).unwrap();
        let cache = OverlapCache::load(&mut store, ReadRange::new(1, 3), &RefineOpt::default()).unwrap();

        let mut swapped = overlaps();
        swapped.swap(0, 1);
        let mut other = MemoryOverlapStore::new(swapped).unwrap();

        let mut out: Vec<Overlap> = Vec::new();
        assert!(SurvivorWriter::new(2).write(&mut other, &cache, &mut out).is_err());
    }

    #[test]
    fn test_changed_record_is_fatal() {
        let mut store = MemoryOverlapStore::new(overlaps()).unwrap();
        let cache = OverlapCache::load(&mut store, ReadRange::new(1, 3), &RefineOpt::default()).unwrap();

        // Same ids and order, different hangs and rate on 2 -> 1.
        let mut changed = overlaps();
        changed[2] = Overlap::new(2, 1, 30, -30, 0.40, false);
        let mut other = MemoryOverlapStore::new(changed).unwrap();

        let mut out: Vec<Overlap> = Vec::new();
        assert!(SurvivorWriter::new(2).write(&mut other, &cache, &mut out).is_err());

        // Only the auxiliary payload differs: still the same overlaps.
        let mut relabeled = overlaps();
        relabeled[2].aux = 7;
        let mut other = MemoryOverlapStore::new(relabeled).unwrap();
        let mut out: Vec<Overlap> = Vec::new();
        let stats = SurvivorWriter::new(2).write(&mut other, &cache, &mut out).unwrap();
        assert_eq!(stats.retained, 4);
        assert_eq!(out[2].aux, 7);
    }

    #[test]
    fn test_count_mismatch_is_fatal() {
        let mut store = MemoryOverlapStore::new(overlaps()).unwrap();
        let cache = OverlapCache::load(&mut store, ReadRange::new(1, 3), &RefineOpt::default()).unwrap();

        let mut longer = overlaps();
        longer.push(Overlap::new(3, 2, 0, 0, 0.03, false));
        let mut other = MemoryOverlapStore::new(longer).unwrap();

        let mut out: Vec<Overlap> = Vec::new();
        assert!(SurvivorWriter::new(2).write(&mut other, &cache, &mut out).is_err());
    }
}
