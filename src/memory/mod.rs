//! Provides an in-process cache tier which supports leases.
//!
//! The [LeaseCache] is a size constrained LRU cache for binary values which additionally hands
//! out lease tokens on a miss, just like memcache does. Whoever obtains the lease is expected to
//! compute the missing value and to store it via **lease_set**, while all other requesters are
//! told that the miss is **hot** and that they should retry a bit later. This protects the
//! origin from a stampede of identical requests once a popular entry expires.
//!
//! The [MemoryCacheClient] wraps a cache in an actor and exposes it as
//! [CacheClient](crate::client::CacheClient). This is the cache tier used when no remote cache is
//! available and also serves well for testing.
mod client;
mod lease_cache;

pub use client::MemoryCacheClient;
pub use client::MemoryCacheStats;
pub use client::DEFAULT_LEASE_TTL;
pub use lease_cache::LeaseCache;
