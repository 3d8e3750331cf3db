pub mod defaults;
pub mod erate_opt; // Refinement options and read ranges
pub mod estimate; // Top-level load / refine / write orchestration
pub mod evalue; // Fixed-point error-rate encoding
pub mod intervals; // Weighted interval aggregation
pub mod overlap; // Overlap records, compact packing, stores, cache
pub mod profile; // Per-read cumulative error profiles
pub mod read_store;
pub mod refine; // Iterative refinement driver
pub mod survivor; // Surviving-overlap output
pub mod utils;
