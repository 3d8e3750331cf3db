// ferrous-erate/src/overlap/record.rs
//
// Full-fidelity overlap record as held by the overlap store.

use crate::evalue;

/// One pairwise alignment between read `a_id` and read `b_id`.
///
/// `aux` carries alignment bookkeeping the refinement never looks at; it only
/// has to survive the trip from the input store to the output store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overlap {
    pub a_id: u32,
    pub b_id: u32,
    pub a_hang: i32,
    pub b_hang: i32,
    pub evalue: u16, // Encoded error rate, see crate::evalue
    pub flipped: bool,
    pub aux: u64,
}

impl Overlap {
    pub fn new(a_id: u32, b_id: u32, a_hang: i32, b_hang: i32, erate: f64, flipped: bool) -> Self {
        Overlap {
            a_id,
            b_id,
            a_hang,
            b_hang,
            evalue: evalue::encode(erate),
            flipped,
            aux: 0,
        }
    }

    /// Decoded error rate.
    pub fn erate(&self) -> f64 {
        evalue::decode(self.evalue)
    }
}
