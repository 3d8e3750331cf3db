//! Weighted interval aggregation.
//!
//! Collects half-open intervals `[lo, lo + length)` with an additive weight
//! and reduces them to a sorted list of disjoint runs, each carrying the
//! number of input intervals covering it (`depth`) and the sum of their
//! weights (`value`). Refinement uses this to turn the overlaps of one read
//! into a per-base mean error rate.

use std::ops::{Add, Sub};

/// Additive weight carried by an interval.
pub trait Weight: Copy + Default + PartialEq + Add<Output = Self> + Sub<Output = Self> {}

impl<T> Weight for T where T: Copy + Default + PartialEq + Add<Output = T> + Sub<Output = T> {}

/// One run of constant coverage produced by `IntervalList::finalize`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalRun<V> {
    pub lo: u32,
    pub hi: u32,
    pub depth: u32,
    pub value: V,
}

impl<V> IntervalRun<V> {
    #[inline]
    pub fn len(&self) -> u32 {
        self.hi - self.lo
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi == self.lo
    }
}

impl IntervalRun<f64> {
    /// Mean weight of the intervals covering this run; 0 when uncovered.
    #[inline]
    pub fn mean(&self) -> f64 {
        if self.depth > 0 {
            self.value / self.depth as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Event<V> {
    pos: u32,
    start: bool,
    weight: V,
}

#[derive(Debug, Clone, Default)]
pub struct IntervalList<V> {
    intervals: Vec<(u32, u32, V)>,
}

impl<V: Weight> IntervalList<V> {
    pub fn new() -> Self {
        IntervalList {
            intervals: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        IntervalList {
            intervals: Vec::with_capacity(capacity),
        }
    }

    /// Register `[lo, lo + length)` with `weight`. Empty intervals are ignored.
    pub fn add(&mut self, lo: u32, length: u32, weight: V) {
        if length == 0 {
            return;
        }
        self.intervals.push((lo, lo.saturating_add(length), weight));
    }

    /// Number of intervals added so far.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Sweep the interval endpoints and emit the covered runs in order.
    ///
    /// Runs are split at every endpoint; neighbours that touch and agree on
    /// both depth and summed weight are merged. Uncovered gaps are skipped.
    pub fn finalize(&self) -> Vec<IntervalRun<V>> {
        let mut events: Vec<Event<V>> = Vec::with_capacity(self.intervals.len() * 2);
        for &(lo, hi, weight) in &self.intervals {
            events.push(Event {
                pos: lo,
                start: true,
                weight,
            });
            events.push(Event {
                pos: hi,
                start: false,
                weight,
            });
        }
        events.sort_unstable_by_key(|e| e.pos);

        let mut runs: Vec<IntervalRun<V>> = Vec::new();
        let mut depth = 0u32;
        let mut value = V::default();
        let mut prev = 0u32;

        let mut i = 0;
        while i < events.len() {
            let pos = events[i].pos;

            if depth > 0 && prev < pos {
                match runs.last_mut() {
                    Some(last) if last.hi == prev && last.depth == depth && last.value == value => {
                        last.hi = pos;
                    }
                    _ => runs.push(IntervalRun {
                        lo: prev,
                        hi: pos,
                        depth,
                        value,
                    }),
                }
            }

            while i < events.len() && events[i].pos == pos {
                let e = &events[i];
                if e.start {
                    depth += 1;
                    value = value + e.weight;
                } else {
                    depth -= 1;
                    value = value - e.weight;
                }
                i += 1;
            }

            // Drop accumulated rounding once nothing is open.
            if depth == 0 {
                value = V::default();
            }
            prev = pos;
        }

        runs
    }
}
