// Overlap records, their compact form, stores, and the in-memory cache.

pub mod cache;
pub mod compact;
pub mod record;
pub mod store;

pub use cache::OverlapCache;
pub use compact::{CompactOverlap, OverlapSpan};
pub use record::Overlap;
pub use store::{MemoryOverlapStore, OverlapSink, OverlapSource, OverlapStoreReader, OverlapStoreWriter};
