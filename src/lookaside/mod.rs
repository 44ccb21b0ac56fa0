//! Provides the cache-aside route stage.
//!
//! A [LookasideRoute] is placed in front of a child route. For each request, the
//! [LookasideHelper] first decides whether the request is a cache candidate. If so, the
//! cache key is derived (see [key]) and looked up (see [fetch]). A hit is returned directly,
//! without ever invoking the child. On a miss the request is forwarded to the child and its
//! reply is stored in the background (see [writeback]), regardless of the result it carries.
//!
//! Requests which aren't candidates are forwarded as is. They never cause any interaction with
//! the cache tier.
//!
//! Note that caching is strictly best effort. Whatever goes wrong while talking to the cache,
//! the request is still answered, either by a genuine hit or by the child.
//!
//! # Lookups and leases
//!
//! Without leases, a lookup is a single **get**. With leases enabled, the first requester
//! which misses a key is handed a lease token and is responsible for re-populating the entry.
//! Concurrent requesters observe a **hot miss** and retry with an increasing backoff (see
//! [lease]), hoping to find the entry once the lease owner has stored it. If they run out of
//! retries, they fall back to the child route themselves.
//!
//! # Creating a stage
//!
//! A stage can either be assembled using the [LookasideBuilder] or be created from a JSON
//! configuration using [factory::create_lookaside_route].
use std::sync::Arc;

use async_trait::async_trait;

use crate::lookaside::fetch::Fetcher;
use crate::lookaside::helper::LookasideHelper;
use crate::lookaside::key::KeyBuilder;
use crate::lookaside::lease::LeaseSettings;
use crate::lookaside::writeback::WriteBack;
use crate::message::Request;
use crate::route::{RouteHandle, RouteHandlePtr, RouteTraverser};
use crate::stats::LookasideStats;

pub mod builder;
pub mod factory;
pub mod fetch;
pub mod helper;
pub mod key;
pub mod lease;
pub mod writeback;

pub use builder::LookasideBuilder;

/// Serves cached replies and populates the cache with the replies of its child route.
///
/// Use a [LookasideBuilder] or [factory::create_lookaside_route] to create a stage.
pub struct LookasideRoute<R: Request, H: LookasideHelper<R>> {
    child: RouteHandlePtr<R>,
    helper: H,
    key_builder: KeyBuilder,
    fetcher: Fetcher,
    write_back: WriteBack,
    lease_settings: LeaseSettings,
    stats: Arc<LookasideStats>,
}

impl<R: Request, H: LookasideHelper<R>> LookasideRoute<R, H> {
    /// Returns the child route to which misses are forwarded.
    pub fn child(&self) -> &RouteHandlePtr<R> {
        &self.child
    }

    /// Returns the helper which decides upon candidates and keys.
    pub fn helper(&self) -> &H {
        &self.helper
    }

    /// Returns the builder used to derive the effective cache keys.
    pub fn key_builder(&self) -> &KeyBuilder {
        &self.key_builder
    }

    /// Returns the TTL of cached entries in seconds.
    pub fn ttl_seconds(&self) -> u32 {
        self.write_back.ttl_seconds()
    }

    /// Returns the lease settings in use.
    pub fn lease_settings(&self) -> LeaseSettings {
        self.lease_settings
    }

    /// Returns the metrics of this stage.
    pub fn stats(&self) -> &Arc<LookasideStats> {
        &self.stats
    }
}

#[async_trait]
impl<R: Request, H: LookasideHelper<R>> RouteHandle<R> for LookasideRoute<R, H> {
    async fn route(&self, request: &R) -> R::Reply {
        self.stats.requests.inc();

        if !self.helper.cache_candidate(request) {
            return self.child.route(request).await;
        }

        self.stats.candidates.inc();
        let key = self.key_builder.build(&self.helper.build_key(request));
        let fetched = self.fetcher.fetch::<R::Reply>(&key).await;
        if let Some(reply) = fetched.reply {
            self.stats.hits.inc();
            return reply;
        }

        self.stats.misses.inc();
        let reply = self.child.route(request).await;
        std::mem::drop(self.write_back.store(key, reply.clone(), fetched.token));

        reply
    }

    fn traverse(&self, request: &R, traverser: &dyn RouteTraverser<R>) {
        traverser.visit(self.child.as_ref(), request);
    }

    fn route_name(&self) -> String {
        format!(
            "lookaside-cache|name={}|ttl={}s|leases={}",
            self.helper.name(),
            self.ttl_seconds(),
            self.lease_settings.enabled
        )
    }
}
