//! Caches: the per-transaction record cache and the shared key/value cache.

pub mod record;
pub mod remote;
pub mod shared;

pub use record::{CacheMiss, RecordCache};
pub use remote::RedisCache;
pub use shared::{open_shared_cache, MemoryCache, SharedCache};
