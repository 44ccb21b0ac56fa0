//! A cache-aside routing stage for key/value request pipelines.
//!
//! # Introduction
//! **lookaside** provides a single stage of a request routing tree which sits between an
//! upstream client and a downstream handler (the *child route*). For each incoming request the
//! stage may either serve a previously cached reply directly, which short-circuits the rest of
//! the routing tree, or it forwards the request to its child and then asynchronously stores the
//! child's reply in a cache tier under a derived key.
//!
//! Caching is strictly best effort: an unavailable cache, a failing RPC or an unreadable entry
//! never fails the request itself. The only replies ever returned are either genuine cache hits
//! or the reply of the child route.
//!
//! # Features
//! * **Pluggable candidacy and key building**. A [LookasideHelper](lookaside::helper::LookasideHelper)
//!   decides per request whether caching applies at all and derives the key to use.
//! * **Lease based stampede protection**. If enabled, a miss hands out a lease token to exactly
//!   one requester which is then responsible to re-populate the cache. All others observe a
//!   *hot miss* and retry using an exponential (but capped) backoff. See
//!   [lease](lookaside::lease) and [fetch](lookaside::fetch).
//! * **Non-blocking write-back**. Serializing and storing a reply happens in a background task,
//!   so the response path never waits for the cache tier. See [writeback](lookaside::writeback).
//! * **Key splitting**. Hot keys can be spread across several physical cache slots, where each
//!   node deterministically uses one of them. See [key](lookaside::key).
//! * **Declarative construction**. A stage can be created from a JSON object (see
//!   [factory](lookaside::factory)) and gracefully degrades to its bare child if no cache client
//!   can be obtained.
//! * **Schema tolerant payloads**. Replies are stored using a tagged binary struct encoding (see
//!   [codec]) which skips unknown fields, so readers and writers of different versions can share
//!   a cache.
//!
//! # Modules
//! * [lookaside]: The actual route stage along with its building blocks.
//! * [client]: The capability used to talk to the cache tier.
//! * [memory]: An in-process, lease aware cache tier which implements the client capability.
//! * [registry]: Hands out shared cache clients per *flavor*.
//! * [route]: The contract of the surrounding routing tree.
//! * [message] and [codec]: Typed requests and replies and their binary representation.
//!
//! # Example
//! ```
//! # use std::sync::Arc;
//! # use lookaside::lookaside::LookasideBuilder;
//! # use lookaside::lookaside::helper::KeyPrefixHelper;
//! # use lookaside::memory::MemoryCacheClient;
//! # use lookaside::message::{HelloRequest, ReplyResult};
//! # use lookaside::route::{NullRoute, RouteHandle};
//! # #[tokio::main]
//! # async fn main() {
//! let client = MemoryCacheClient::start(1024, 1024 * 1024);
//! let route = LookasideBuilder::<HelloRequest, KeyPrefixHelper>::new(
//!     Arc::new(NullRoute),
//!     client,
//!     KeyPrefixHelper::default(),
//! )
//! .prefix("demo:")
//! .ttl(10)
//! .build();
//!
//! let reply = route.route(&HelloRequest::new("world")).await;
//! assert_eq!(reply.result, ReplyResult::NotFound);
//! # }
//! ```
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod client;
pub mod codec;
pub mod fmt;
pub mod lookaside;
pub mod memory;
pub mod message;
pub mod registry;
pub mod route;
pub mod stats;

/// Initializes the logging system.
///
/// This can safely be invoked several times, only the first call installs the logger.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests and embedding applications might both try to set up logging...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async block within `tokio::spawn` and to discard
/// the resulting join handle.
///
/// This is the "fire and forget" primitive used for work which must never delay the caller.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate lookaside;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn logging_can_be_initialized_repeatedly() {
        crate::init_logging();
        crate::init_logging();
        log::debug!("Logging is up and running.");
    }
}
