//! Read-path primitives shared by the aggregator.
//!
//! - [`TtlCache`]: key -> value store with per-read freshness and lazy eviction
//! - [`RequestDeduplicator`]: coalesces concurrent identical requests into one execution
//!
//! Both are plain values owned by whoever constructs them; there are no process globals.

mod dedup;
mod ttl;

pub use dedup::RequestDeduplicator;
pub use ttl::{CacheEntry, TtlCache};
