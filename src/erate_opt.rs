// ferrous-erate/src/erate_opt.rs
//
// Refinement options and working read range.

use anyhow::{Result, bail, ensure};
use std::path::PathBuf;

use crate::defaults;
use crate::overlap::compact::MAX_READ_ID;

/// Inclusive range of read ids processed by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRange {
    pub id_min: u32,
    pub id_max: u32,
}

impl ReadRange {
    pub fn new(id_min: u32, id_max: u32) -> Self {
        ReadRange { id_min, id_max }
    }

    /// Resolve explicit `-b`/`-e` bounds or a `-p PART PARTS` partition
    /// against a store of `num_reads` reads (ids `1..=num_reads`).
    ///
    /// Explicit bounds win over a partition and must name at least one read.
    /// Part `i` (1-based) of `n` covers `(i-1)*N/n + 1 ..= i*N/n`, with the
    /// last part always ending at `N`; with more parts than reads some parts
    /// are empty.
    pub fn resolve(
        begin: Option<u32>,
        end: Option<u32>,
        partition: Option<(u32, u32)>,
        num_reads: u32,
    ) -> Result<Self> {
        let range = match (begin, end, partition) {
            (None, None, Some((part, parts))) => Self::from_partition(part, parts, num_reads)?,
            (b, e, _) => {
                let range = ReadRange::new(b.unwrap_or(1), e.unwrap_or(num_reads));
                ensure!(
                    !range.is_empty(),
                    "empty read range {}..={}",
                    range.id_min,
                    range.id_max
                );
                range
            }
        };
        range.validate()?;
        Ok(range)
    }

    pub fn from_partition(part: u32, parts: u32, num_reads: u32) -> Result<Self> {
        ensure!(parts > 0, "partition count must be positive");
        ensure!(
            part >= 1 && part <= parts,
            "partition {} out of range 1..={}",
            part,
            parts
        );
        let nf = num_reads as u64;
        let p = (part - 1) as u64;
        let pm = parts as u64;

        let id_min = (p * nf / pm + 1) as u32;
        let id_max = if part == parts {
            num_reads
        } else {
            ((p + 1) * nf / pm) as u32
        };
        Ok(ReadRange::new(id_min, id_max))
    }

    /// Empty ranges (`id_max < id_min`) are valid and select no reads.
    pub fn validate(&self) -> Result<()> {
        if self.id_min == 0 {
            bail!("read ids start at 1, got range {}..={}", self.id_min, self.id_max);
        }
        ensure!(
            self.id_max <= MAX_READ_ID,
            "read range end {} exceeds maximum read id {}",
            self.id_max,
            MAX_READ_ID
        );
        Ok(())
    }

    #[inline]
    pub fn contains(&self, read_id: u32) -> bool {
        read_id >= self.id_min && read_id <= self.id_max
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.id_max < self.id_min {
            0
        } else {
            (self.id_max - self.id_min) as usize + 1
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u32> {
        self.id_min..=self.id_max
    }
}

/// Options for a refinement run.
#[derive(Debug, Clone)]
pub struct RefineOpt {
    pub iterations: u32,      // Fixed number of refinement passes
    pub erate_tolerance: f64, // Discard if estimate + tolerance < reported erate
    pub read_block: usize,    // Reads per parallel work unit
    pub overlap_block: usize, // Overlaps per store read
    pub cache: Option<PathBuf>, // Persisted compact overlap cache
}

impl Default for RefineOpt {
    fn default() -> Self {
        RefineOpt {
            iterations: defaults::ITERATIONS,
            erate_tolerance: defaults::ERATE_TOLERANCE,
            read_block: defaults::READ_BLOCK,
            overlap_block: defaults::OVERLAP_BLOCK,
            cache: None,
        }
    }
}

impl RefineOpt {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.erate_tolerance.is_finite() && self.erate_tolerance >= 0.0,
            "error rate tolerance must be a non-negative number, got {}",
            self.erate_tolerance
        );
        ensure!(self.read_block > 0, "read block size must be positive");
        ensure!(self.overlap_block > 0, "overlap block size must be positive");
        Ok(())
    }
}
