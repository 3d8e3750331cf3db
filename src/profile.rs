// ferrous-erate/src/profile.rs
//
// Per-read error profiles.
//
// Every read in the working range owns two arrays:
//   - update:     u16 per base, the encoded mean error computed by the
//                 current iteration (rewritten every iteration)
//   - cumulative: u32 per base + 1, exclusive prefix sum of `update`, so the
//                 summed error of bases [beg, end) is cum[end] - cum[beg]
//
// The two arrays are stored in separate vectors so the parallel pass can hold
// every read's cumulative array shared while each task writes its own update
// buffer.

use anyhow::{Result, ensure};

use crate::erate_opt::ReadRange;
use crate::evalue::{self, MAX_EVALUE};
use crate::read_store::ReadStore;

/// Longest read whose cumulative error still fits a u32.
pub const MAX_PROFILE_LENGTH: u32 = u32::MAX / MAX_EVALUE as u32;

/// Borrowed view of one read's profile.
#[derive(Debug, Clone, Copy)]
pub struct ReadErrorProfile<'a> {
    pub length: u32,
    pub cumulative: &'a [u32],
    pub update: &'a [u16],
}

impl ReadErrorProfile<'_> {
    /// Mean decoded error rate of bases `[beg, end)`.
    pub fn mean_error(&self, beg: u32, end: u32) -> f64 {
        let sum = self.cumulative[end as usize] as u64 - self.cumulative[beg as usize] as u64;
        evalue::decode_mean(sum, end - beg)
    }
}

/// Read-only access to the lengths and cumulative arrays of every read.
#[derive(Clone, Copy)]
pub struct CumulativeView<'a> {
    range: ReadRange,
    lengths: &'a [u32],
    cumulative: &'a [Vec<u32>],
}

impl<'a> CumulativeView<'a> {
    #[inline]
    pub fn contains(&self, read_id: u32) -> bool {
        self.range.contains(read_id)
    }

    /// Mean error of bases `[beg, end)` of `read_id`, or `None` when the read
    /// has no profile (outside the range or deleted).
    #[inline]
    pub fn mean_error(&self, read_id: u32, beg: u32, end: u32) -> Option<f64> {
        if !self.contains(read_id) {
            return None;
        }
        let idx = (read_id - self.range.id_min) as usize;
        if self.lengths[idx] == 0 {
            return None;
        }
        let cum = &self.cumulative[idx];
        let sum = cum[end as usize] as u64 - cum[beg as usize] as u64;
        Some(evalue::decode_mean(sum, end - beg))
    }
}

pub struct ErrorProfiles {
    range: ReadRange,
    lengths: Vec<u32>,
    cumulative: Vec<Vec<u32>>,
    update: Vec<Vec<u16>>,
}

impl ErrorProfiles {
    /// Allocate zeroed profiles for every read of `range`.
    pub fn new(reads: &dyn ReadStore, range: ReadRange) -> Result<Self> {
        let n = range.len();
        let mut lengths = Vec::with_capacity(n);
        let mut cumulative = Vec::with_capacity(n);
        let mut update = Vec::with_capacity(n);
        let mut bytes = 0u64;

        for read_id in range.iter() {
            let length = reads.sequence_length(read_id);
            ensure!(
                length <= MAX_PROFILE_LENGTH,
                "read {} has length {}, profiles support at most {} bases",
                read_id,
                length,
                MAX_PROFILE_LENGTH
            );

            if length == 0 {
                cumulative.push(Vec::new());
                update.push(Vec::new());
            } else {
                cumulative.push(vec![0u32; length as usize + 1]);
                update.push(vec![0u16; length as usize]);
                bytes += (length as u64 + 1) * 4 + length as u64 * 2;
            }
            lengths.push(length);
        }

        log::info!(
            "Initialized {} read profiles ({:.1} MB)",
            n,
            bytes as f64 / 1024.0 / 1024.0
        );

        Ok(ErrorProfiles {
            range,
            lengths,
            cumulative,
            update,
        })
    }

    pub fn range(&self) -> ReadRange {
        self.range
    }

    pub fn num_reads(&self) -> usize {
        self.lengths.len()
    }

    /// Sequence length of `read_id`, 0 when outside the range.
    pub fn length(&self, read_id: u32) -> u32 {
        if self.range.contains(read_id) {
            self.lengths[(read_id - self.range.id_min) as usize]
        } else {
            0
        }
    }

    pub fn profile(&self, read_id: u32) -> Option<ReadErrorProfile<'_>> {
        if !self.range.contains(read_id) {
            return None;
        }
        let idx = (read_id - self.range.id_min) as usize;
        Some(ReadErrorProfile {
            length: self.lengths[idx],
            cumulative: &self.cumulative[idx],
            update: &self.update[idx],
        })
    }

    /// Split into the shared cumulative view and the per-read update buffers.
    pub fn split_for_update(&mut self) -> (CumulativeView<'_>, &[u32], &mut [Vec<u16>]) {
        (
            CumulativeView {
                range: self.range,
                lengths: &self.lengths,
                cumulative: &self.cumulative,
            },
            &self.lengths,
            &mut self.update,
        )
    }

    /// Fold every update buffer into its cumulative array and return how many
    /// reads ended up with a different profile than before.
    ///
    /// The prefix sum is a strict left-to-right recurrence; this must only run
    /// after every update buffer of the iteration has been written.
    pub fn rebuild(&mut self) -> usize {
        let mut changed = 0;
        for (cum, upd) in self.cumulative.iter_mut().zip(self.update.iter()) {
            if upd.is_empty() {
                continue;
            }
            let mut differs = cum[0] != 0;
            cum[0] = 0;
            for (p, &u) in upd.iter().enumerate() {
                let next = cum[p] + u as u32;
                differs |= cum[p + 1] != next;
                cum[p + 1] = next;
            }
            changed += differs as usize;
        }
        changed
    }
}
