//! Fixed-point error-rate encoding.
//!
//! Error rates in `[0, 1]` are stored as 12-bit codes. The same code space is
//! used by overlap records, the per-base update buffers, and (summed) the
//! cumulative error arrays, so all arithmetic on profiles stays integral.

/// Number of bits in an encoded error rate.
pub const EVALUE_BITS: u32 = 12;

/// Largest encodable code; decodes to an error rate of exactly 1.0.
pub const MAX_EVALUE: u16 = (1 << EVALUE_BITS) - 1;

/// Encode an error rate. Values outside `[0, 1]` are clamped, NaN encodes as 0.
#[inline]
pub fn encode(erate: f64) -> u16 {
    if erate.is_nan() {
        return 0;
    }
    (erate.clamp(0.0, 1.0) * MAX_EVALUE as f64).round() as u16
}

/// Decode a code back to an error rate.
#[inline]
pub fn decode(code: u16) -> f64 {
    code as f64 / MAX_EVALUE as f64
}

/// Mean error rate of `len` bases whose codes sum to `sum`.
#[inline]
pub fn decode_mean(sum: u64, len: u32) -> f64 {
    if len == 0 {
        return 0.0;
    }
    sum as f64 / len as f64 / MAX_EVALUE as f64
}
