//! Looks up cached replies while protecting the origin against stampedes.
//!
//! If leases are disabled, a lookup is a single **get**. Otherwise **lease_get** is used: a miss
//! either hands out a lease token (the caller now owns the miss and has to re-populate the cache)
//! or it reports a **hot miss** (someone else owns it). Hot misses are retried following the
//! [backoff](crate::lookaside::lease::LeaseSettings::backoff) schedule, hoping that the owner
//! provides the value in the meantime.
//!
//! Caching is best effort: transport errors and entries which cannot be decoded are both treated
//! as a plain miss. A lookup therefore never fails, it only ends with or without a reply.
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::client::{CacheClient, LeaseGetReply, LeaseToken};
use crate::codec::{self, Message};
use crate::lookaside::lease::LeaseSettings;
use crate::stats::LookasideStats;

/// Represents the outcome of a single cache lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheOutcome {
    /// The entry was present.
    Hit(Bytes),
    /// The entry was missing. A non-zero token means that the caller owns the lease.
    Miss(LeaseToken),
    /// The entry is missing but another requester owns the lease, so the lookup should be
    /// retried.
    HotMiss,
}

impl From<LeaseGetReply> for CacheOutcome {
    fn from(reply: LeaseGetReply) -> Self {
        match reply {
            LeaseGetReply::Hit(data) => CacheOutcome::Hit(data),
            LeaseGetReply::Miss(token) if token.is_hot_miss() => CacheOutcome::HotMiss,
            LeaseGetReply::Miss(token) => CacheOutcome::Miss(token),
        }
    }
}

/// Contains the result of a fetch.
///
/// Either a **reply** was found, or the **token** contains the lease which has to be passed on
/// to the write-back (or [LeaseToken::NONE] if no lease is owned).
#[derive(Debug, PartialEq)]
pub struct Fetched<T> {
    /// Contains the cached reply, if one was found.
    pub reply: Option<T>,
    /// Contains the lease token owned by the caller.
    pub token: LeaseToken,
}

impl<T> Fetched<T> {
    fn hit(reply: T) -> Self {
        Fetched {
            reply: Some(reply),
            token: LeaseToken::NONE,
        }
    }

    fn miss(token: LeaseToken) -> Self {
        Fetched { reply: None, token }
    }
}

/// Performs cache lookups for a lookaside stage.
pub struct Fetcher {
    client: Arc<dyn CacheClient>,
    settings: LeaseSettings,
    stats: Arc<LookasideStats>,
}

impl Fetcher {
    /// Creates a new fetcher which uses the given client and settings.
    pub fn new(
        client: Arc<dyn CacheClient>,
        settings: LeaseSettings,
        stats: Arc<LookasideStats>,
    ) -> Self {
        Fetcher {
            client,
            settings,
            stats,
        }
    }

    /// Looks up the reply cached for the given key.
    pub async fn fetch<T: Message>(&self, key: &str) -> Fetched<T> {
        let watch = Instant::now();
        let result = if self.settings.enabled {
            self.fetch_with_lease(key).await
        } else {
            self.fetch_plain(key).await
        };
        self.stats.lookup_duration.add_duration(watch.elapsed());

        result
    }

    async fn fetch_plain<T: Message>(&self, key: &str) -> Fetched<T> {
        match self.client.get(key).await {
            Ok(Some(data)) => self.decode(key, data),
            Ok(None) => Fetched::miss(LeaseToken::NONE),
            Err(error) => {
                self.stats.cache_errors.inc();
                log::debug!("Failed to look up {}: {}", key, error);
                Fetched::miss(LeaseToken::NONE)
            }
        }
    }

    async fn fetch_with_lease<T: Message>(&self, key: &str) -> Fetched<T> {
        for delay in self.settings.backoff() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.client.lease_get(key).await {
                Ok(reply) => CacheOutcome::from(reply),
                Err(error) => {
                    self.stats.cache_errors.inc();
                    log::debug!("Failed to look up {} using a lease: {}", key, error);
                    return Fetched::miss(LeaseToken::NONE);
                }
            };

            match outcome {
                CacheOutcome::Hit(data) => return self.decode(key, data),
                CacheOutcome::Miss(token) => {
                    if token.is_owned() {
                        self.stats.owned_leases.inc();
                    }
                    return Fetched::miss(token);
                }
                CacheOutcome::HotMiss => {
                    self.stats.hot_misses.inc();
                    log::debug!("Hot miss for {}...", key);
                }
            }
        }

        self.stats.exhausted_leases.inc();
        log::debug!(
            "Giving up on {} after {} lease retries.",
            key,
            self.settings.num_retries
        );

        Fetched::miss(LeaseToken::NONE)
    }

    fn decode<T: Message>(&self, key: &str, data: Bytes) -> Fetched<T> {
        match codec::deserialize::<T>(data) {
            Ok(reply) => Fetched::hit(reply),
            Err(error) => {
                self.stats.codec_errors.inc();
                log::debug!("Ignoring unreadable cache entry {}: {}", key, error);
                Fetched::miss(LeaseToken::NONE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{CacheError, LeaseGetReply, LeaseToken};
    use crate::codec;
    use crate::lookaside::fetch::{CacheOutcome, Fetched, Fetcher};
    use crate::lookaside::lease::LeaseSettings;
    use crate::message::{HelloReply, ReplyResult};
    use crate::stats::LookasideStats;
    use crate::testing::{test_async, CacheCall, RecordingClient};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn fetcher(client: RecordingClient, settings: LeaseSettings) -> (Fetcher, Arc<RecordingClient>) {
        let client = Arc::new(client);
        (
            Fetcher::new(client.clone(), settings, Arc::new(LookasideStats::new())),
            client,
        )
    }

    fn leases(initial_wait_ms: u64, num_retries: u32) -> LeaseSettings {
        LeaseSettings {
            enabled: true,
            initial_wait_ms,
            max_wait_ms: 10,
            num_retries,
        }
    }

    fn hot_miss() -> Result<LeaseGetReply, CacheError> {
        Ok(LeaseGetReply::Miss(LeaseToken::HOT_MISS))
    }

    #[test]
    fn outcomes_are_derived_from_lease_replies() {
        assert_eq!(
            CacheOutcome::from(LeaseGetReply::Miss(LeaseToken::HOT_MISS)),
            CacheOutcome::HotMiss
        );
        assert_eq!(
            CacheOutcome::from(LeaseGetReply::Miss(LeaseToken(42))),
            CacheOutcome::Miss(LeaseToken(42))
        );
        assert_eq!(
            CacheOutcome::from(LeaseGetReply::Hit(Bytes::from_static(b"x"))),
            CacheOutcome::Hit(Bytes::from_static(b"x"))
        );
    }

    #[test]
    fn plain_hits_are_decoded() {
        test_async(async {
            let reply = HelloReply::new(ReplyResult::Found, "cached");
            let (client, _) = RecordingClient::new();
            client.script_get(Ok(Some(codec::serialize(&reply))));
            let (fetcher, client) = fetcher(client, LeaseSettings::default());

            let fetched = fetcher.fetch::<HelloReply>("key").await;

            assert_eq!(fetched, Fetched::hit(reply));
            assert_eq!(client.calls(), vec![CacheCall::Get("key".to_owned())]);
        });
    }

    #[test]
    fn plain_misses_and_errors_yield_no_token() {
        test_async(async {
            let (client, _) = RecordingClient::new();
            client.script_get(Ok(None));
            client.script_get(Err(CacheError::Unavailable));
            let (fetcher, client) = fetcher(client, LeaseSettings::default());

            assert_eq!(
                fetcher.fetch::<HelloReply>("a").await,
                Fetched::miss(LeaseToken::NONE)
            );
            assert_eq!(
                fetcher.fetch::<HelloReply>("b").await,
                Fetched::miss(LeaseToken::NONE)
            );
            assert_eq!(client.calls().len(), 2);
            assert_eq!(fetcher.stats.cache_errors.get(), 1);
        });
    }

    #[test]
    fn unreadable_entries_are_treated_as_misses() {
        test_async(async {
            let (client, _) = RecordingClient::new();
            client.script_get(Ok(Some(Bytes::from_static(&[0x2a, 0x00]))));
            let (fetcher, _) = fetcher(client, LeaseSettings::default());

            let fetched = fetcher.fetch::<HelloReply>("key").await;

            assert_eq!(fetched, Fetched::miss(LeaseToken::NONE));
            assert_eq!(fetcher.stats.codec_errors.get(), 1);
        });
    }

    #[test]
    fn constant_hot_misses_exhaust_all_retries() {
        test_async(async {
            let (client, _) = RecordingClient::new();
            for _ in 0..10 {
                client.script_lease_get(hot_miss());
            }
            let (fetcher, client) = fetcher(client, leases(1, 3));

            let fetched = fetcher.fetch::<HelloReply>("key").await;

            assert_eq!(fetched, Fetched::miss(LeaseToken::NONE));
            assert_eq!(client.lease_get_count(), 4);
            assert_eq!(fetcher.stats.hot_misses.get(), 4);
            assert_eq!(fetcher.stats.exhausted_leases.get(), 1);
        });
    }

    #[test]
    fn an_owned_lease_ends_the_loop() {
        test_async(async {
            let (client, _) = RecordingClient::new();
            client.script_lease_get(hot_miss());
            client.script_lease_get(Ok(LeaseGetReply::Miss(LeaseToken(42))));
            client.script_lease_get(hot_miss());
            let (fetcher, client) = fetcher(client, leases(2, 10));

            let watch = Instant::now();
            let fetched = fetcher.fetch::<HelloReply>("key").await;

            assert_eq!(fetched, Fetched::miss(LeaseToken(42)));
            assert_eq!(client.lease_get_count(), 2);
            assert_eq!(watch.elapsed() >= Duration::from_millis(2), true);
            assert_eq!(fetcher.stats.owned_leases.get(), 1);
        });
    }

    #[test]
    fn a_hit_after_a_hot_miss_is_returned() {
        test_async(async {
            let reply = HelloReply::new(ReplyResult::Ok, "computed by someone else");
            let (client, _) = RecordingClient::new();
            client.script_lease_get(hot_miss());
            client.script_lease_get(Ok(LeaseGetReply::Hit(codec::serialize(&reply))));
            let (fetcher, _) = fetcher(client, leases(1, 10));

            assert_eq!(fetcher.fetch::<HelloReply>("key").await, Fetched::hit(reply));
        });
    }

    #[test]
    fn transport_errors_end_the_lease_loop() {
        test_async(async {
            let (client, _) = RecordingClient::new();
            client.script_lease_get(hot_miss());
            client.script_lease_get(Err(CacheError::Transport(anyhow::anyhow!("timeout"))));
            client.script_lease_get(Ok(LeaseGetReply::Miss(LeaseToken(42))));
            let (fetcher, client) = fetcher(client, leases(1, 10));

            let fetched = fetcher.fetch::<HelloReply>("key").await;

            assert_eq!(fetched, Fetched::miss(LeaseToken::NONE));
            assert_eq!(client.lease_get_count(), 2);
            assert_eq!(fetcher.stats.cache_errors.get(), 1);
        });
    }
}
