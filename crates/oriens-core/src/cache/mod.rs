//! Caching layers for the sync core.
//!
//! - `QueryCache`: in-memory read cache keyed by view, page and filter digest.
//!   Cleared as a whole by every confirmed write.
//! - `FallbackStore`: durable last-known values per user (preferences, the
//!   chart window, tags, projects) stored as JSON, painted before the first
//!   remote read completes.

pub mod fallback;
pub mod query;

pub use fallback::{CachedData, FallbackStore};
pub use query::{CacheEntry, CacheKey, Generation, QueryCache, ViewKind};
