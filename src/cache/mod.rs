//! Transform result caching
//!
//! Results are addressed by a [`CacheKey`] derived from everything that
//! can change a transform's output. Entries are immutable once written.
//!
//! # Tiers
//!
//! | Tier | Scope | Lifetime |
//! |------|-------|----------|
//! | Memory | One pipeline instance | Until the pipeline is dropped |
//! | Disk | Project + configuration | Until `tcache cache clear` |
//!
//! Disk entries carry a SHA-256 checksum line; an entry that fails the
//! check is treated as a miss and overwritten by the next store.

pub mod key;
pub mod store;

pub use key::{cache_file_stem, content_hash, CacheKey, CacheKeyComputer, CACHE_FORMAT_VERSION};
pub use store::{format_bytes, CacheEntry, CacheStats, Lookup, TransformCache};
