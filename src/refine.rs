//! Iterative error-profile refinement.
//!
//! Each iteration has two phases separated by a full barrier:
//!
//! 1. A parallel pass over the reads of the working range. For every read,
//!    the overlaps it owns that are still alive are checked against the
//!    current profiles (from the second iteration on) and either discarded or
//!    added to an interval list with half of their reported error rate. The
//!    interval means become the read's new per-base update buffer.
//! 2. A sequential pass folding every update buffer into its read's
//!    cumulative error array.
//!
//! The number of iterations is fixed; there is no convergence test.
//!
//! A discard is decided from the owning read's side only. The mirrored record
//! owned by the partner read is judged independently when the partner's own
//! pass reaches it, and the two decisions may differ.

use anyhow::{Context, Result, bail, ensure};
use rayon::prelude::*;
use std::ops::Add;

use crate::erate_opt::RefineOpt;
use crate::evalue;
use crate::intervals::IntervalList;
use crate::overlap::cache::OverlapCache;
use crate::overlap::compact::OverlapSpan;
use crate::profile::{CumulativeView, ErrorProfiles};
use crate::read_store::ReadStore;
use crate::utils::{cputime, realtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    /// Iteration `k` is next to run (or running).
    Iterating(u32),
    Finalized,
    /// An iteration failed; profiles and discards are not usable.
    Aborted,
}

/// Overlap counts for one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationStats {
    pub iteration: u32,
    /// Overlaps skipped because an earlier iteration discarded them.
    pub discarded_previously: u64,
    /// Overlaps discarded by this iteration.
    pub discarded_now: u64,
    /// Overlaps that contributed to this iteration's profiles.
    pub retained: u64,
    /// Reads whose cumulative profile changed in the rebuild.
    pub profiles_changed: u64,
}

impl Add for IterationStats {
    type Output = IterationStats;

    fn add(self, other: IterationStats) -> IterationStats {
        IterationStats {
            iteration: self.iteration.max(other.iteration),
            discarded_previously: self.discarded_previously + other.discarded_previously,
            discarded_now: self.discarded_now + other.discarded_now,
            retained: self.retained + other.retained,
            profiles_changed: self.profiles_changed + other.profiles_changed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefineSummary {
    pub iterations: Vec<IterationStats>,
}

impl RefineSummary {
    pub fn total_discarded(&self) -> u64 {
        self.iterations.iter().map(|s| s.discarded_now).sum()
    }
}

pub struct RefinementDriver<'a> {
    reads: &'a dyn ReadStore,
    cache: OverlapCache,
    profiles: ErrorProfiles,
    opt: RefineOpt,
    state: DriverState,
}

impl<'a> RefinementDriver<'a> {
    /// Allocate profiles for the cache's read range. The driver owns the cache
    /// and the profiles until `into_cache`.
    pub fn new(reads: &'a dyn ReadStore, cache: OverlapCache, opt: &RefineOpt) -> Result<Self> {
        opt.validate()?;
        let profiles = ErrorProfiles::new(reads, cache.range())?;
        Ok(RefinementDriver {
            reads,
            cache,
            profiles,
            opt: opt.clone(),
            state: DriverState::Initializing,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cache(&self) -> &OverlapCache {
        &self.cache
    }

    pub fn profiles(&self) -> &ErrorProfiles {
        &self.profiles
    }

    pub fn into_cache(self) -> OverlapCache {
        self.cache
    }

    /// Run every remaining iteration.
    pub fn run(&mut self) -> Result<RefineSummary> {
        let mut summary = RefineSummary::default();
        while let Some(stats) = self.step()? {
            summary.iterations.push(stats);
        }
        Ok(summary)
    }

    /// Run one full iteration (parallel pass + rebuild). Returns `None` once
    /// all configured iterations are done.
    pub fn step(&mut self) -> Result<Option<IterationStats>> {
        let k = match self.state {
            DriverState::Initializing => 0,
            DriverState::Iterating(k) => k,
            DriverState::Finalized => return Ok(None),
            DriverState::Aborted => bail!("refinement was aborted by an earlier error"),
        };
        if k >= self.opt.iterations {
            self.state = DriverState::Finalized;
            return Ok(None);
        }

        self.state = DriverState::Iterating(k);
        match self.iterate(k) {
            Ok(stats) => {
                self.state = if k + 1 < self.opt.iterations {
                    DriverState::Iterating(k + 1)
                } else {
                    DriverState::Finalized
                };
                Ok(Some(stats))
            }
            Err(e) => {
                self.state = DriverState::Aborted;
                Err(e.context(format!("refinement iteration {}", k)))
            }
        }
    }

    fn iterate(&mut self, iteration: u32) -> Result<IterationStats> {
        let range = self.cache.range();
        let t_real = realtime();
        let t_cpu = cputime();

        log::info!(
            "Processing from read {} to {} out of {} reads, iteration {}.",
            range.id_min,
            range.id_max,
            self.reads.read_count(),
            iteration
        );

        let cache = &self.cache;
        let reads = self.reads;
        let tolerance = self.opt.erate_tolerance;
        let (view, lengths, update) = self.profiles.split_for_update();

        // Parallel pass. The reduce completes only after every read is done,
        // which is the barrier before the rebuild below.
        let mut stats = update
            .par_iter_mut()
            .zip(lengths.par_iter())
            .enumerate()
            .with_min_len(self.opt.read_block)
            .map(|(idx, (buffer, &length))| {
                let read_id = range.id_min + idx as u32;
                if read_id % 1000 == 0 {
                    log::trace!("read {}", read_id);
                }
                refine_read(read_id, length, buffer, &view, cache, reads, iteration, tolerance)
            })
            .try_reduce(IterationStats::default, |a, b| Ok(a + b))?;

        // Sequential pass.
        stats.profiles_changed = self.profiles.rebuild() as u64;
        stats.iteration = iteration;

        log::info!("  discarded {} (in previous iterations)", stats.discarded_previously);
        log::info!("  discard   {} (in this iteration)", stats.discarded_now);
        log::info!("  remain    {}", stats.retained);
        log::info!("  profiles changed {}", stats.profiles_changed);
        log::debug!(
            "  iteration {} took {:.3} sec real, {:.3} sec CPU",
            iteration,
            realtime() - t_real,
            cputime() - t_cpu
        );

        Ok(stats)
    }
}

/// Estimated error rate of an overlap from the current profiles: the mean
/// per-base error of the aligned bases on A plus that on B. Each read's
/// profile holds half of the error rates of the overlaps covering it, so the
/// sum is comparable to the reported rate.
///
/// A partner outside the working range has no profile; its half is taken to
/// equal A's.
pub fn estimated_erate(view: &CumulativeView<'_>, span: &OverlapSpan) -> f64 {
    let a = view
        .mean_error(span.a_id, span.a_beg, span.a_end)
        .unwrap_or(0.0);
    let b = view
        .mean_error(span.b_id, span.b_beg, span.b_end)
        .unwrap_or(a);
    a + b
}

#[allow(clippy::too_many_arguments)]
fn refine_read(
    read_id: u32,
    length: u32,
    buffer: &mut [u16],
    view: &CumulativeView<'_>,
    cache: &OverlapCache,
    reads: &dyn ReadStore,
    iteration: u32,
    tolerance: f64,
) -> Result<IterationStats> {
    let mut stats = IterationStats::default();
    if length == 0 {
        return Ok(stats);
    }

    let owned = cache.overlaps_of(read_id);
    let mut erates: IntervalList<f64> = IntervalList::with_capacity(owned.len());

    for oo in owned {
        if cache.is_discarded(oo) {
            stats.discarded_previously += 1;
            continue;
        }

        let record = cache.record(oo);
        ensure!(
            record.a_id() == read_id,
            "overlap {} is owned by read {} but indexed under read {}",
            oo,
            record.a_id(),
            read_id
        );
        let span = record
            .span(length, reads.sequence_length(record.b_id()))
            .with_context(|| format!("overlap {}", oo))?;

        let erate = evalue::decode(span.erate);

        if iteration > 0 && estimated_erate(view, &span) + tolerance < erate {
            cache.discard(oo);
            stats.discarded_now += 1;
            continue;
        }

        stats.retained += 1;
        erates.add(span.a_beg, span.a_len(), erate / 2.0);
    }

    buffer.fill(0);
    for run in erates.finalize() {
        ensure!(
            run.hi <= length,
            "read {}: error interval [{}, {}) past read end {}",
            read_id,
            run.lo,
            run.hi,
            length
        );
        buffer[run.lo as usize..run.hi as usize].fill(evalue::encode(run.mean()));
    }

    Ok(stats)
}
