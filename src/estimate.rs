use anyhow::{Result, ensure};
// ferrous-erate/src/estimate.rs
//
// Main entry points: load the compact overlaps, refine the read profiles, and
// write the surviving overlaps.

use crate::erate_opt::{ReadRange, RefineOpt};
use crate::overlap::cache::OverlapCache;
use crate::overlap::store::{OverlapSink, OverlapSource};
use crate::read_store::ReadStore;
use crate::refine::{RefineSummary, RefinementDriver};
use crate::survivor::{SurvivorStats, SurvivorWriter};

#[derive(Debug, Clone, Default)]
pub struct EstimateSummary {
    pub refine: RefineSummary,
    pub survivors: SurvivorStats,
}

/// Full run over `range`: load (or map) the cache, run every refinement
/// iteration, then replay `store` into `output` keeping the survivors.
///
/// An empty range (a partition holding no reads) finishes `output` with no
/// overlaps.
pub fn main_estimate(
    reads: &dyn ReadStore,
    store: &mut dyn OverlapSource,
    output: &mut dyn OverlapSink,
    range: ReadRange,
    opt: &RefineOpt,
) -> Result<EstimateSummary> {
    opt.validate()?;
    range.validate()?;

    log::info!("  id_min  = {:9}", range.id_min);
    log::info!("  id_max  = {:9} num_reads = {:9}", range.id_max, reads.read_count());

    if range.is_empty() {
        log::info!("No reads in range, nothing to refine");
        output.finish()?;
        return Ok(EstimateSummary::default());
    }

    let cache = OverlapCache::load(store, range, opt)?;

    let mut driver = RefinementDriver::new(reads, cache, opt)?;
    let refine = driver.run()?;
    let cache = driver.into_cache();

    let survivors = SurvivorWriter::new(opt.overlap_block).write(store, &cache, output)?;

    ensure!(
        survivors.dropped == cache.num_discarded(),
        "survivor pass dropped {} overlaps but {} are marked discarded",
        survivors.dropped,
        cache.num_discarded()
    );

    Ok(EstimateSummary { refine, survivors })
}

/// Load the overlaps of `range` and persist them to `opt.cache` without
/// refining. Returns the number of cached overlaps.
pub fn main_cache(store: &mut dyn OverlapSource, range: ReadRange, opt: &RefineOpt) -> Result<usize> {
    opt.validate()?;
    range.validate()?;
    ensure!(opt.cache.is_some(), "no cache file given");

    if range.is_empty() {
        log::info!("No reads in range, nothing to cache");
        return Ok(0);
    }

    let cache = OverlapCache::load(store, range, opt)?;
    Ok(cache.len())
}
