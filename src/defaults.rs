// src/defaults.rs

// Refinement Constants
pub const ITERATIONS: u32 = 4;
pub const ERATE_TOLERANCE: f64 = 0.03;

// Scheduling Constants
pub const READ_BLOCK: usize = 1000;
pub const OVERLAP_BLOCK: usize = 1_000_000;

// Other Constants
pub const VERBOSITY: i32 = 3;
pub const OUTPUT_STORE: &str = "refined.ovs";
