//! Permits to set up a [LookasideRoute] programmatically.
use std::sync::Arc;

use crate::client::CacheClient;
use crate::lookaside::fetch::Fetcher;
use crate::lookaside::helper::LookasideHelper;
use crate::lookaside::key::{self, build_key_suffix, KeyBuilder};
use crate::lookaside::lease::LeaseSettings;
use crate::lookaside::writeback::WriteBack;
use crate::lookaside::LookasideRoute;
use crate::message::Request;
use crate::route::RouteHandlePtr;
use crate::stats::LookasideStats;

/// Collects the settings of a lookaside stage.
///
/// Everything except the child route, the cache client and the helper is optional: by default
/// no prefix is used, keys aren't split, leases are disabled and entries never expire
/// (a TTL of 0).
pub struct LookasideBuilder<R: Request, H: LookasideHelper<R>> {
    child: RouteHandlePtr<R>,
    client: Arc<dyn CacheClient>,
    helper: H,
    prefix: String,
    key_split_size: u32,
    node_id: Option<u64>,
    ttl_seconds: u32,
    lease_settings: LeaseSettings,
    stats: Option<Arc<LookasideStats>>,
}

impl<R: Request, H: LookasideHelper<R>> LookasideBuilder<R, H> {
    /// Creates a new builder for a stage in front of the given child route.
    pub fn new(child: RouteHandlePtr<R>, client: Arc<dyn CacheClient>, helper: H) -> Self {
        LookasideBuilder {
            child,
            client,
            helper,
            prefix: String::new(),
            key_split_size: 1,
            node_id: None,
            ttl_seconds: 0,
            lease_settings: LeaseSettings::default(),
            stats: None,
        }
    }

    /// Specifies the prefix to prepend to each cache key.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Specifies across how many physical slots each key is spread.
    pub fn key_split_size(mut self, key_split_size: u32) -> Self {
        self.key_split_size = key_split_size;
        self
    }

    /// Overwrites the node id which selects the slot if keys are split.
    ///
    /// By default, [key::node_id] is used.
    pub fn node_id(mut self, node_id: u64) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Specifies the TTL of cached entries in seconds.
    pub fn ttl(mut self, ttl_seconds: u32) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Specifies the lease settings to use.
    pub fn lease_settings(mut self, lease_settings: LeaseSettings) -> Self {
        self.lease_settings = lease_settings;
        self
    }

    /// Reports the metrics of the stage into the given (possibly shared) stats.
    pub fn stats(mut self, stats: Arc<LookasideStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Creates the stage.
    pub fn build(self) -> LookasideRoute<R, H> {
        let stats = self.stats.unwrap_or_default();
        let node_id = self.node_id.unwrap_or_else(key::node_id);

        LookasideRoute {
            child: self.child,
            helper: self.helper,
            key_builder: KeyBuilder::new(
                self.prefix,
                build_key_suffix(self.key_split_size, node_id),
            ),
            fetcher: Fetcher::new(self.client.clone(), self.lease_settings, stats.clone()),
            write_back: WriteBack::new(
                self.client,
                self.ttl_seconds,
                self.lease_settings.enabled,
                stats.clone(),
            ),
            lease_settings: self.lease_settings,
            stats,
        }
    }
}
