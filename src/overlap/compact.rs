//! Bit-packed overlap summary.
//!
//! A `CompactOverlap` keeps only what refinement needs (ids, hangs, error
//! rate, orientation) in three 32-bit words, so every overlap of a large
//! read range can stay resident at once:
//!
//! ```text
//! word 0:  a_id[0..23]    b_id_hi[23..32]
//! word 1:  b_id_lo[0..14] a_hang[14..31]
//! word 2:  b_hang[0..17]  erate[17..29]  flipped[29]  discarded[30]
//! ```
//!
//! `b_id` is split into a 9-bit high part and a 14-bit low part so that both
//! read ids get 23 bits of range. Hangs are 17-bit two's complement.

use anyhow::{Result, ensure};

use super::record::Overlap;
use crate::evalue::EVALUE_BITS;

pub const ID_BITS: u32 = 23;
pub const HANG_BITS: u32 = 17;

const B_ID_LO_BITS: u32 = 14;
const B_ID_HI_BITS: u32 = ID_BITS - B_ID_LO_BITS;

pub const MAX_READ_ID: u32 = (1 << ID_BITS) - 1;
pub const MIN_HANG: i32 = -(1 << (HANG_BITS - 1));
pub const MAX_HANG: i32 = (1 << (HANG_BITS - 1)) - 1;

const ID_MASK: u32 = (1 << ID_BITS) - 1;
const B_ID_LO_MASK: u32 = (1 << B_ID_LO_BITS) - 1;
const B_ID_HI_MASK: u32 = (1 << B_ID_HI_BITS) - 1;
const HANG_MASK: u32 = (1 << HANG_BITS) - 1;
const ERATE_MASK: u32 = (1 << EVALUE_BITS) - 1;

const A_HANG_SHIFT: u32 = B_ID_LO_BITS;
const ERATE_SHIFT: u32 = HANG_BITS;
const FLIPPED_SHIFT: u32 = ERATE_SHIFT + EVALUE_BITS;
const DISCARDED_SHIFT: u32 = FLIPPED_SHIFT + 1;

/// Size of one packed record on disk and in memory.
pub const COMPACT_OVERLAP_BYTES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CompactOverlap {
    words: [u32; 3],
}

#[inline]
fn sign_extend_hang(raw: u32) -> i32 {
    ((raw << (32 - HANG_BITS)) as i32) >> (32 - HANG_BITS)
}

impl CompactOverlap {
    /// Pack a full overlap record. Every field must fit its bit width; the
    /// overlap store is expected to respect these bounds already, so a
    /// failure here is a data-integrity error.
    pub fn pack(ovl: &Overlap) -> Result<Self> {
        ensure!(
            ovl.a_id <= MAX_READ_ID,
            "overlap a_id {} exceeds {}-bit read id range",
            ovl.a_id,
            ID_BITS
        );
        ensure!(
            ovl.b_id <= MAX_READ_ID,
            "overlap b_id {} exceeds {}-bit read id range",
            ovl.b_id,
            ID_BITS
        );
        ensure!(
            (MIN_HANG..=MAX_HANG).contains(&ovl.a_hang),
            "overlap {}-{}: a_hang {} outside [{}, {}]",
            ovl.a_id,
            ovl.b_id,
            ovl.a_hang,
            MIN_HANG,
            MAX_HANG
        );
        ensure!(
            (MIN_HANG..=MAX_HANG).contains(&ovl.b_hang),
            "overlap {}-{}: b_hang {} outside [{}, {}]",
            ovl.a_id,
            ovl.b_id,
            ovl.b_hang,
            MIN_HANG,
            MAX_HANG
        );
        ensure!(
            (ovl.evalue as u32) <= ERATE_MASK,
            "overlap {}-{}: evalue {} exceeds {} bits",
            ovl.a_id,
            ovl.b_id,
            ovl.evalue,
            EVALUE_BITS
        );

        let b_id_hi = (ovl.b_id >> B_ID_LO_BITS) & B_ID_HI_MASK;
        let b_id_lo = ovl.b_id & B_ID_LO_MASK;

        let w0 = (ovl.a_id & ID_MASK) | (b_id_hi << ID_BITS);
        let w1 = b_id_lo | (((ovl.a_hang as u32) & HANG_MASK) << A_HANG_SHIFT);
        let w2 = ((ovl.b_hang as u32) & HANG_MASK)
            | ((ovl.evalue as u32) << ERATE_SHIFT)
            | ((ovl.flipped as u32) << FLIPPED_SHIFT);

        let packed = CompactOverlap { words: [w0, w1, w2] };

        debug_assert_eq!(packed.a_id(), ovl.a_id);
        debug_assert_eq!(packed.b_id(), ovl.b_id);
        debug_assert_eq!(packed.a_hang(), ovl.a_hang);
        debug_assert_eq!(packed.b_hang(), ovl.b_hang);
        debug_assert_eq!(packed.erate(), ovl.evalue);
        debug_assert_eq!(packed.flipped(), ovl.flipped);

        Ok(packed)
    }

    #[inline]
    pub fn a_id(&self) -> u32 {
        self.words[0] & ID_MASK
    }

    #[inline]
    pub fn b_id(&self) -> u32 {
        let hi = self.words[0] >> ID_BITS;
        let lo = self.words[1] & B_ID_LO_MASK;
        (hi << B_ID_LO_BITS) | lo
    }

    #[inline]
    pub fn a_hang(&self) -> i32 {
        sign_extend_hang((self.words[1] >> A_HANG_SHIFT) & HANG_MASK)
    }

    #[inline]
    pub fn b_hang(&self) -> i32 {
        sign_extend_hang(self.words[2] & HANG_MASK)
    }

    /// Encoded error rate.
    #[inline]
    pub fn erate(&self) -> u16 {
        ((self.words[2] >> ERATE_SHIFT) & ERATE_MASK) as u16
    }

    #[inline]
    pub fn flipped(&self) -> bool {
        (self.words[2] >> FLIPPED_SHIFT) & 1 == 1
    }

    /// The persisted discard bit. Runtime discards go to the cache overlay
    /// instead; see `OverlapCache::is_discarded`.
    #[inline]
    pub fn discarded(&self) -> bool {
        (self.words[2] >> DISCARDED_SHIFT) & 1 == 1
    }

    /// True when both records describe the same overlap; the discard bit is
    /// not compared.
    #[inline]
    pub fn same_overlap(&self, other: &CompactOverlap) -> bool {
        let keep = !(1u32 << DISCARDED_SHIFT);
        self.words[0] == other.words[0]
            && self.words[1] == other.words[1]
            && self.words[2] & keep == other.words[2] & keep
    }

    pub fn to_words(&self) -> [u32; 3] {
        self.words
    }

    pub fn from_words(words: [u32; 3]) -> Self {
        CompactOverlap { words }
    }

    pub fn to_le_bytes(&self) -> [u8; COMPACT_OVERLAP_BYTES] {
        let mut out = [0u8; COMPACT_OVERLAP_BYTES];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode from at least `COMPACT_OVERLAP_BYTES` bytes; extra bytes are ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        CompactOverlap {
            words: [word(0), word(1), word(2)],
        }
    }

    /// Expand the hangs into begin/end coordinates on both reads.
    ///
    /// A negative `a_hang` means B extends past the start of A, so the
    /// alignment begins at `-a_hang` on B; a positive `b_hang` means B extends
    /// past the end of A. Both spans must be non-empty and inside their read.
    pub fn span(&self, length_a: u32, length_b: u32) -> Result<OverlapSpan> {
        let a_hang = self.a_hang() as i64;
        let b_hang = self.b_hang() as i64;

        let a_beg = a_hang.max(0);
        let a_end = length_a as i64 + b_hang.min(0);
        let b_beg = (-a_hang).max(0);
        let b_end = length_b as i64 - b_hang.max(0);

        ensure!(
            0 <= a_beg && a_beg < a_end && a_end <= length_a as i64,
            "overlap {}-{}: invalid span [{}, {}) on read {} of length {}",
            self.a_id(),
            self.b_id(),
            a_beg,
            a_end,
            self.a_id(),
            length_a
        );
        ensure!(
            0 <= b_beg && b_beg < b_end && b_end <= length_b as i64,
            "overlap {}-{}: invalid span [{}, {}) on read {} of length {}",
            self.a_id(),
            self.b_id(),
            b_beg,
            b_end,
            self.b_id(),
            length_b
        );

        Ok(OverlapSpan {
            a_id: self.a_id(),
            b_id: self.b_id(),
            a_beg: a_beg as u32,
            a_end: a_end as u32,
            b_beg: b_beg as u32,
            b_end: b_end as u32,
            fwd: !self.flipped(),
            erate: self.erate(),
        })
    }
}

/// Absolute alignment coordinates derived from a `CompactOverlap` and the
/// lengths of both reads. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapSpan {
    pub a_id: u32,
    pub b_id: u32,
    pub a_beg: u32,
    pub a_end: u32,
    pub b_beg: u32,
    pub b_end: u32,
    pub fwd: bool,
    pub erate: u16,
}

impl OverlapSpan {
    #[inline]
    pub fn a_len(&self) -> u32 {
        self.a_end - self.a_beg
    }

    #[inline]
    pub fn b_len(&self) -> u32 {
        self.b_end - self.b_beg
    }
}
