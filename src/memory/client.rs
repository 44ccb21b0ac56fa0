//! Provides an actor which owns a [LeaseCache] and serves it as [CacheClient].
//!
//! All operations are sent as **Call** into a bounded queue. The actor processes them one after
//! another (so the cache itself needs no locking) and reports the result back via a oneshot
//! channel. The actor stops once all handles to it are dropped or once **stop** is invoked.
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::client::{CacheClient, CacheError, LeaseGetReply, LeaseToken, StoreResult};
use crate::fmt::format_size;
use crate::memory::LeaseCache;
use crate::stats::Average;

/// Specifies how long a lease is valid if no explicit value is given.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10);

/// Specifies the maximal number of calls waiting for the actor.
///
/// If the queue is full, callers are suspended until there is room again.
const QUEUE_SIZE: usize = 1024;

enum Call {
    Get(String, oneshot::Sender<Option<Bytes>>),
    LeaseGet(String, oneshot::Sender<LeaseGetReply>),
    Set(String, Bytes, u32, oneshot::Sender<StoreResult>),
    LeaseSet(String, Bytes, u32, LeaseToken, oneshot::Sender<StoreResult>),
    Remove(String, oneshot::Sender<()>),
    Flush(oneshot::Sender<()>),
    Stats(oneshot::Sender<MemoryCacheStats>),
    Stop,
}

/// Describes the state of a memory cache.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryCacheStats {
    /// Contains the number of entries.
    pub entries: usize,
    /// Contains the max number of entries.
    pub capacity: usize,
    /// Contains the number of leases being tracked.
    pub leases: usize,
    /// Contains the allocated memory in bytes.
    pub allocated_memory: usize,
    /// Contains the max memory in bytes.
    pub max_memory: usize,
    /// Contains the hit rate in percent.
    pub hit_rate: f32,
    /// Contains the number of reads since the last flush.
    pub reads: usize,
    /// Contains the number of writes since the last flush.
    pub writes: usize,
}

impl Display for MemoryCacheStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Entries:   {} / {}", self.entries, self.capacity)?;
        writeln!(
            f,
            "Memory:    {} / {}",
            format_size(self.allocated_memory),
            format_size(self.max_memory)
        )?;
        writeln!(f, "Leases:    {}", self.leases)?;
        writeln!(f, "Reads:     {}", self.reads)?;
        writeln!(f, "Writes:    {}", self.writes)?;
        writeln!(f, "Hit Rate:  {:.1} %", self.hit_rate)
    }
}

/// Provides a [CacheClient] which is backed by an in-process [LeaseCache].
///
/// # Example
///
/// ```
/// # use lookaside::client::{CacheClient, LeaseGetReply};
/// # use lookaside::memory::MemoryCacheClient;
/// # use bytes::Bytes;
/// # #[tokio::main]
/// # async fn main() {
/// let client = MemoryCacheClient::start(1024, 1024 * 1024);
///
/// client.set("Foo", Bytes::from_static(b"Bar"), 60).await.unwrap();
/// assert_eq!(client.get("Foo").await.unwrap(), Some(Bytes::from_static(b"Bar")));
///
/// match client.lease_get("Unknown").await.unwrap() {
///     LeaseGetReply::Miss(token) => assert_eq!(token.is_owned(), true),
///     _ => panic!("Expected a miss"),
/// }
/// # }
/// ```
pub struct MemoryCacheClient {
    queue: mpsc::Sender<Call>,
    call_duration: Average,
}

impl MemoryCacheClient {
    /// Spawns a new actor which manages a cache of the given size.
    ///
    /// Note that this has to be invoked within a tokio runtime.
    pub fn start(capacity: usize, max_memory: usize) -> Arc<Self> {
        MemoryCacheClient::start_with_lease_ttl(capacity, max_memory, DEFAULT_LEASE_TTL)
    }

    /// Spawns a new actor which manages a cache of the given size and lease TTL.
    pub fn start_with_lease_ttl(
        capacity: usize,
        max_memory: usize,
        lease_ttl: Duration,
    ) -> Arc<Self> {
        let (queue, endpoint) = mpsc::channel(QUEUE_SIZE);
        let cache = LeaseCache::new(capacity, max_memory, lease_ttl);
        crate::spawn!(actor(cache, endpoint));

        Arc::new(MemoryCacheClient {
            queue,
            call_duration: Average::new(),
        })
    }

    async fn invoke<T>(
        &self,
        call: impl FnOnce(oneshot::Sender<T>) -> Call,
    ) -> Result<T, CacheError> {
        let (callback, promise) = oneshot::channel();
        let watch = Instant::now();

        if self.queue.send(call(callback)).await.is_err() {
            return Err(CacheError::Unavailable);
        }

        let result = promise.await.map_err(|_| CacheError::Unavailable)?;
        self.call_duration.add_duration(watch.elapsed());

        Ok(result)
    }

    /// Removes the entry (and any lease) for the given key.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.invoke(|callback| Call::Remove(key.to_owned(), callback))
            .await
    }

    /// Removes all entries and leases.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.invoke(Call::Flush).await
    }

    /// Reports the current state of the underlying cache.
    pub async fn stats(&self) -> Result<MemoryCacheStats, CacheError> {
        self.invoke(Call::Stats).await
    }

    /// Returns the average round-trip time of calls into the actor.
    pub fn call_duration(&self) -> &Average {
        &self.call_duration
    }

    /// Stops the actor.
    ///
    /// All pending calls are still processed, every later call fails with
    /// [CacheError::Unavailable].
    pub async fn stop(&self) {
        let _ = self.queue.send(Call::Stop).await;
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.invoke(|callback| Call::Get(key.to_owned(), callback))
            .await
    }

    async fn lease_get(&self, key: &str) -> Result<LeaseGetReply, CacheError> {
        self.invoke(|callback| Call::LeaseGet(key.to_owned(), callback))
            .await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: u32,
    ) -> Result<StoreResult, CacheError> {
        self.invoke(|callback| Call::Set(key.to_owned(), value, ttl_seconds, callback))
            .await
    }

    async fn lease_set(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: u32,
        token: LeaseToken,
    ) -> Result<StoreResult, CacheError> {
        self.invoke(|callback| {
            Call::LeaseSet(key.to_owned(), value, ttl_seconds, token, callback)
        })
        .await
    }
}

async fn actor(mut cache: LeaseCache, mut endpoint: mpsc::Receiver<Call>) {
    while let Some(call) = endpoint.recv().await {
        // A caller which gave up waiting simply drops its promise, so send errors are ignored.
        match call {
            Call::Get(key, callback) => {
                let _ = callback.send(cache.get(&key));
            }
            Call::LeaseGet(key, callback) => {
                let _ = callback.send(cache.lease_get(&key));
            }
            Call::Set(key, value, ttl, callback) => {
                let _ = callback.send(cache.set(&key, value, ttl));
            }
            Call::LeaseSet(key, value, ttl, token, callback) => {
                let _ = callback.send(cache.lease_set(&key, value, ttl, token));
            }
            Call::Remove(key, callback) => {
                cache.remove(&key);
                let _ = callback.send(());
            }
            Call::Flush(callback) => {
                cache.flush();
                let _ = callback.send(());
            }
            Call::Stats(callback) => {
                let _ = callback.send(MemoryCacheStats {
                    entries: cache.len(),
                    capacity: cache.capacity(),
                    leases: cache.num_leases(),
                    allocated_memory: cache.allocated_memory(),
                    max_memory: cache.max_memory(),
                    hit_rate: cache.hit_rate(),
                    reads: cache.reads(),
                    writes: cache.writes(),
                });
            }
            Call::Stop => break,
        }
    }

    log::debug!("Memory cache actor has stopped.");
}
