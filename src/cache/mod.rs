//! Provides a size-tracked fill-on-miss cache.
//!
//! A fill cache is the little sibling of a fully fledged LRU cache: it never evicts anything.
//! Each value is produced at most once per key by a caller supplied closure, stored, and then
//! replayed on every subsequent access. This is exactly the right shape for workloads which
//! re-visit a bounded working set a couple of times - the prime example being a dataset scan
//! which is iterated once per training epoch. The first pass pays for fetching each batch from
//! the storage engine, all further passes replay the batches from memory.
//!
//! The configured byte budget is advisory: the cache tracks how much memory its entries
//! allocate (via the [ByteSize](ByteSize) trait) and complains in the log once the budget is
//! exceeded, but it will not drop entries to enforce it. If a workload needs a strict bound,
//! it needs a cache which evicts - which this one deliberately is not.
//!
//! The [reader](crate::reader) wires a [FillCache] in front of its scan cursor when requested
//! via [ReaderBuilder::with_cache](crate::reader::ReaderBuilder::with_cache).
mod fill_cache;

pub use fill_cache::ByteSize;
pub use fill_cache::FillCache;
