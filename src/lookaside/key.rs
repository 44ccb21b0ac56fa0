//! Derives the cache keys used by a lookaside stage.
//!
//! A cache key is composed of three parts: the **prefix** of the stage, the key computed by the
//! [LookasideHelper](crate::lookaside::helper::LookasideHelper) for the request and the
//! **split suffix**.
//!
//! The split suffix permits to spread a single hot key over several physical cache slots. If a
//! key split size **N** greater than one is configured, each node appends `:ks<i>` where **i** is
//! derived from a stable node id modulo **N**. Therefore all requests of one node hit the same
//! slot, but the load of all nodes is distributed across **N** slots.
//!
//! # Example
//!
//! ```
//! # use lookaside::lookaside::key::{build_key_suffix, KeyBuilder};
//! assert_eq!(build_key_suffix(1, 4711), "");
//! assert_eq!(build_key_suffix(4, 4711), ":ks3");
//!
//! let builder = KeyBuilder::new("cache:", build_key_suffix(4, 4711));
//! assert_eq!(builder.build("hello:world"), "cache:hello:world:ks3");
//! ```
use std::hash::Hasher;

use fnv::FnvHasher;

lazy_static::lazy_static! {
    static ref NODE_ID: u64 = compute_node_id();
}

/// Computes the split suffix to append to each cache key.
///
/// Returns an empty string if **key_split_size** is at most one.
pub fn build_key_suffix(key_split_size: u32, node_id: u64) -> String {
    if key_split_size <= 1 {
        String::new()
    } else {
        format!(":ks{}", node_id % key_split_size as u64)
    }
}

/// Returns the id of this node.
///
/// The id is derived from the host name and therefore remains stable across restarts. It is
/// computed once per process.
pub fn node_id() -> u64 {
    *NODE_ID
}

fn compute_node_id() -> u64 {
    let host_name = host_name();
    let mut hasher = FnvHasher::default();
    hasher.write(host_name.as_bytes());
    let id = hasher.finish();

    log::debug!("Using node id {} (derived from host {}).", id, host_name);

    id
}

fn host_name() -> String {
    if let Ok(host_name) = std::env::var("HOSTNAME") {
        if !host_name.trim().is_empty() {
            return host_name.trim().to_owned();
        }
    }

    match std::fs::read_to_string("/etc/hostname") {
        Ok(host_name) if !host_name.trim().is_empty() => host_name.trim().to_owned(),
        _ => "localhost".to_owned(),
    }
}

/// Combines the static parts of a cache key with the key computed per request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyBuilder {
    prefix: String,
    suffix: String,
}

impl KeyBuilder {
    /// Creates a new builder using the given prefix and suffix.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        KeyBuilder {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Returns the full cache key for the given helper key.
    pub fn build(&self, helper_key: &str) -> String {
        let mut key =
            String::with_capacity(self.prefix.len() + helper_key.len() + self.suffix.len());
        key.push_str(&self.prefix);
        key.push_str(helper_key);
        key.push_str(&self.suffix);

        key
    }

    /// Returns the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the split suffix.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

#[cfg(test)]
mod tests {
    use crate::lookaside::key::{build_key_suffix, node_id, KeyBuilder};

    #[test]
    fn suffix_is_empty_without_splitting() {
        assert_eq!(build_key_suffix(0, 17), "");
        assert_eq!(build_key_suffix(1, 17), "");
    }

    #[test]
    fn suffix_selects_a_shard_within_the_split_size() {
        for split in 2..=16 {
            for node in [0, 1, 7, 4711, u64::MAX] {
                let suffix = build_key_suffix(split, node);
                assert_eq!(suffix.is_empty(), false);

                let shard: u64 = suffix.trim_start_matches(":ks").parse().unwrap();
                assert_eq!(shard < split as u64, true);
                assert_eq!(shard, node % split as u64);
            }
        }
    }

    #[test]
    fn keys_are_deterministic() {
        let builder = KeyBuilder::new("p:", build_key_suffix(3, node_id()));

        assert_eq!(node_id(), node_id());
        assert_eq!(builder.build("hello:a"), builder.build("hello:a"));
        assert_ne!(builder.build("hello:a"), builder.build("hello:b"));
        assert_eq!(builder.build("hello:a").starts_with("p:hello:a:ks"), true);
    }

    #[test]
    fn empty_parts_are_permitted() {
        let builder = KeyBuilder::default();
        assert_eq!(builder.build("plain"), "plain");
        assert_eq!(builder.prefix(), "");
        assert_eq!(builder.suffix(), "");
    }
}
