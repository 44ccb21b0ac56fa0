//! Stores replies in the cache tier without delaying the response.
//!
//! Each store is executed by its own background task: the reply is serialized and either
//! written via **lease_set** (if the caller owns a lease, which is thereby released) or via a
//! plain **set**. The outcome is only logged and counted, it never affects the request which
//! produced the reply.
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::client::{CacheClient, LeaseToken, StoreResult};
use crate::codec::{self, Message};
use crate::stats::LookasideStats;

/// Schedules the background stores of a lookaside stage.
pub struct WriteBack {
    client: Arc<dyn CacheClient>,
    ttl_seconds: u32,
    leases_enabled: bool,
    stats: Arc<LookasideStats>,
}

impl WriteBack {
    /// Creates a new scheduler which stores entries with the given TTL.
    pub fn new(
        client: Arc<dyn CacheClient>,
        ttl_seconds: u32,
        leases_enabled: bool,
        stats: Arc<LookasideStats>,
    ) -> Self {
        WriteBack {
            client,
            ttl_seconds,
            leases_enabled,
            stats,
        }
    }

    /// Returns the TTL applied to all stored entries.
    pub fn ttl_seconds(&self) -> u32 {
        self.ttl_seconds
    }

    /// Schedules storing the given reply under the given key.
    ///
    /// Returns immediately. The returned handle can be used to await the completion of the
    /// store, but it is perfectly fine to drop it.
    pub fn store<T>(&self, key: String, reply: T, token: LeaseToken) -> JoinHandle<()>
    where
        T: Message + Send + 'static,
    {
        self.stats.write_backs.inc();

        let client = self.client.clone();
        let stats = self.stats.clone();
        let ttl_seconds = self.ttl_seconds;
        let use_lease = self.leases_enabled && token.is_owned();

        tokio::spawn(async move {
            let data = codec::serialize(&reply);
            let result = if use_lease {
                client.lease_set(&key, data, ttl_seconds, token).await
            } else {
                client.set(&key, data, ttl_seconds).await
            };

            match result {
                Ok(StoreResult::Stored) => (),
                Ok(StoreResult::NotStored) => {
                    stats.write_back_failures.inc();
                    log::debug!("The cache tier rejected the write-back of {}.", key);
                }
                Err(error) => {
                    stats.write_back_failures.inc();
                    log::debug!("Failed to write back {}: {}", key, error);
                }
            }
        })
    }
}
