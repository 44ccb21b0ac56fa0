//! Decides which requests are cached and under which key.
//!
//! A lookaside stage itself is agnostic to the requests it handles. The decision whether a
//! request is a **cache candidate** and the derivation of its key are delegated to a
//! [LookasideHelper], which is created once per stage from the optional **helper_config**.
//!
//! [KeyPrefixHelper] is a helper for all [Keyed] requests, which selects candidates by the
//! prefix of their key.
//!
//! # Example
//!
//! ```
//! # use serde_json::json;
//! # use lookaside::lookaside::helper::{KeyPrefixHelper, LookasideHelper};
//! # use lookaside::message::HelloRequest;
//! let helper: KeyPrefixHelper = LookasideHelper::<HelloRequest>::from_config(Some(&json!({
//!     "key_prefixes": ["user:"]
//! })))
//! .unwrap();
//!
//! assert_eq!(helper.cache_candidate(&HelloRequest::new("user:42")), true);
//! assert_eq!(helper.cache_candidate(&HelloRequest::new("group:42")), false);
//! assert_eq!(helper.build_key(&HelloRequest::new("user:42")), "hello:user:42");
//! ```
use serde_json::Value;

use crate::message::{Keyed, Request};

/// Determines the caching behaviour of a lookaside stage for requests of type **R**.
pub trait LookasideHelper<R>: Send + Sync + Sized + 'static {
    /// Creates the helper from the **helper_config** of the stage (if present).
    fn from_config(config: Option<&Value>) -> anyhow::Result<Self>;

    /// Returns a short name which is reported as part of the route name.
    fn name(&self) -> String;

    /// Determines if the given request should be served from and stored in the cache.
    fn cache_candidate(&self, request: &R) -> bool;

    /// Computes the key for the given request.
    ///
    /// This is only invoked for cache candidates. The result must only depend on the request,
    /// as all stages sharing a cache have to agree on it.
    fn build_key(&self, request: &R) -> String;
}

/// Caches [Keyed] requests based on the prefix of their key.
///
/// Supports the config properties **key_prefixes** (a list of strings, if empty or absent all
/// keys are candidates) and **name**.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyPrefixHelper {
    name: String,
    key_prefixes: Vec<String>,
}

impl Default for KeyPrefixHelper {
    fn default() -> Self {
        KeyPrefixHelper {
            name: "key-prefix".to_owned(),
            key_prefixes: Vec::new(),
        }
    }
}

impl KeyPrefixHelper {
    /// Creates a helper which considers all keys starting with one of the given prefixes.
    pub fn with_prefixes<I, S>(key_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPrefixHelper {
            key_prefixes: key_prefixes.into_iter().map(|prefix| prefix.into()).collect(),
            ..KeyPrefixHelper::default()
        }
    }

    /// Returns the configured key prefixes.
    pub fn key_prefixes(&self) -> &[String] {
        &self.key_prefixes
    }
}

impl<R: Request + Keyed> LookasideHelper<R> for KeyPrefixHelper {
    fn from_config(config: Option<&Value>) -> anyhow::Result<Self> {
        let mut helper = KeyPrefixHelper::default();
        let config = match config {
            None | Some(Value::Null) => return Ok(helper),
            Some(Value::Object(config)) => config,
            Some(_) => {
                return Err(anyhow::anyhow!(
                    "KeyPrefixHelper: 'helper_config' has to be an object."
                ))
            }
        };

        match config.get("name") {
            None => (),
            Some(Value::String(name)) => helper.name = name.clone(),
            Some(_) => {
                return Err(anyhow::anyhow!(
                    "KeyPrefixHelper: 'name' has to be a string."
                ))
            }
        }

        match config.get("key_prefixes") {
            None => (),
            Some(Value::Array(prefixes)) => {
                for prefix in prefixes {
                    match prefix.as_str() {
                        Some(prefix) => helper.key_prefixes.push(prefix.to_owned()),
                        None => {
                            return Err(anyhow::anyhow!(
                                "KeyPrefixHelper: 'key_prefixes' must only contain strings."
                            ))
                        }
                    }
                }
            }
            Some(_) => {
                return Err(anyhow::anyhow!(
                    "KeyPrefixHelper: 'key_prefixes' has to be a list."
                ))
            }
        }

        Ok(helper)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn cache_candidate(&self, request: &R) -> bool {
        self.key_prefixes.is_empty()
            || self
                .key_prefixes
                .iter()
                .any(|prefix| request.key().starts_with(prefix.as_str()))
    }

    fn build_key(&self, request: &R) -> String {
        format!("{}:{}", R::NAME, request.key())
    }
}
