//! Creates lookaside stages from their declarative configuration.
//!
//! A stage is described by a JSON object:
//!
//! ```json
//! {
//!     "child": "...",
//!     "ttl": 30,
//!     "prefix": "web:",
//!     "flavor": "web",
//!     "key_split_size": 4,
//!     "lease_enable": true,
//!     "lease_initial_wait_ms": 2,
//!     "lease_max_wait_ms": 500,
//!     "lease_num_retries": 10,
//!     "helper_config": { "key_prefixes": ["user:"] }
//! }
//! ```
//!
//! Only **child** (handed to a [RouteFactory]) and **ttl** (in seconds) are required. Malformed
//! or missing properties are reported as error before anything is built.
//!
//! If no cache client can be obtained for the selected **flavor**, the stage is skipped
//! entirely: [create_lookaside_route] then yields [Construction::Bare] carrying the uncached
//! child route.
//!
//! # Example
//!
//! ```
//! # use serde_json::{json, Value};
//! # use std::sync::Arc;
//! # use lookaside::lookaside::factory::create_lookaside_route;
//! # use lookaside::lookaside::helper::KeyPrefixHelper;
//! # use lookaside::message::HelloRequest;
//! # use lookaside::registry::ClientRegistry;
//! # use lookaside::route::{NullRoute, RouteHandle, RouteHandlePtr};
//! # #[tokio::main]
//! # async fn main() {
//! let registry = ClientRegistry::new();
//! registry.register_memory_flavor("web", 1024, 1024 * 1024);
//! let factory = |_: &Value| -> anyhow::Result<RouteHandlePtr<HelloRequest>> {
//!     Ok(Arc::new(NullRoute))
//! };
//!
//! let route = create_lookaside_route::<HelloRequest, KeyPrefixHelper>(
//!     &json!({"child": "null", "ttl": 30, "lease_enable": true}),
//!     &factory,
//!     &registry,
//! )
//! .unwrap()
//! .into_route();
//!
//! assert_eq!(
//!     route.route_name(),
//!     "lookaside-cache|name=key-prefix|ttl=30s|leases=true"
//! );
//! # }
//! ```
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use crate::lookaside::helper::LookasideHelper;
use crate::lookaside::lease::LeaseSettings;
use crate::lookaside::{LookasideBuilder, LookasideRoute};
use crate::message::Request;
use crate::registry::ClientRegistry;
use crate::route::{RouteFactory, RouteHandlePtr};

/// Contains the flavor which is used if none is configured.
pub const DEFAULT_FLAVOR: &str = "web";

/// Contains the validated configuration of a lookaside stage.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteConfig {
    /// Contains the description of the child route.
    pub child: Value,
    /// Contains the TTL of cached entries in seconds.
    pub ttl_seconds: u32,
    /// Contains the prefix prepended to all keys.
    pub prefix: String,
    /// Selects the cache tier to use.
    pub flavor: String,
    /// Contains the number of slots across which each key is spread.
    pub key_split_size: u32,
    /// Contains the lease settings.
    pub lease_settings: LeaseSettings,
    /// Contains the opaque config which is handed to the helper.
    pub helper_config: Option<Value>,
}

impl RouteConfig {
    /// Parses and validates the given configuration object.
    ///
    /// # Errors
    /// Fails if a required property is missing or if a property has an invalid type or value.
    ///
    /// # Example
    /// ```
    /// # use serde_json::json;
    /// # use lookaside::lookaside::factory::RouteConfig;
    /// let config = RouteConfig::parse(&json!({"child": "null", "ttl": 10})).unwrap();
    /// assert_eq!(config.ttl_seconds, 10);
    /// assert_eq!(config.flavor, "web");
    /// assert_eq!(config.key_split_size, 1);
    ///
    /// let error = RouteConfig::parse(&json!({"child": "null"})).err().unwrap();
    /// assert_eq!(error.to_string(), "LookasideRoute: 'ttl' property is missing.");
    /// ```
    pub fn parse(config: &Value) -> anyhow::Result<Self> {
        if !config.is_object() {
            return Err(anyhow::anyhow!(
                "LookasideRoute: The configuration has to be an object."
            ));
        }

        let child = config
            .get("child")
            .filter(|child| !child.is_null())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("LookasideRoute: 'child' property is missing."))?;

        let ttl_seconds = u32::try_from(required_non_negative(config, "ttl")?)
            .map_err(|_| anyhow::anyhow!("LookasideRoute: 'ttl' is too large."))?;

        let key_split_size = optional_non_negative(config, "key_split_size", 1)?;
        if key_split_size == 0 {
            return Err(anyhow::anyhow!(
                "LookasideRoute: 'key_split_size' has to be a positive integer."
            ));
        }
        let key_split_size = u32::try_from(key_split_size)
            .map_err(|_| anyhow::anyhow!("LookasideRoute: 'key_split_size' is too large."))?;

        let helper_config = match config.get("helper_config") {
            None => None,
            Some(helper_config) if helper_config.is_object() => Some(helper_config.clone()),
            Some(other) => {
                return Err(anyhow::anyhow!(
                    "LookasideRoute: 'helper_config' is not an object but was {}.",
                    other
                ))
            }
        };

        Ok(RouteConfig {
            child,
            ttl_seconds,
            prefix: optional_string(config, "prefix", "")?,
            flavor: optional_string(config, "flavor", DEFAULT_FLAVOR)?,
            key_split_size,
            lease_settings: LeaseSettings::parse(config)?,
            helper_config,
        })
    }

    /// Parses the given JSON text and validates the resulting configuration.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Value = serde_json::from_str(json)
            .context("LookasideRoute: Cannot parse the configuration")?;

        RouteConfig::parse(&config)
    }
}

/// Represents the outcome of creating a lookaside stage.
pub enum Construction<R: Request, H: LookasideHelper<R>> {
    /// The stage has been created.
    Lookaside(Arc<LookasideRoute<R, H>>),
    /// No cache client was available, therefore the child route is used directly.
    Bare(RouteHandlePtr<R>),
}

impl<R: Request, H: LookasideHelper<R>> Construction<R, H> {
    /// Determines if the resulting route actually uses the cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, Construction::Lookaside(_))
    }

    /// Returns the route handle to plug into the routing tree.
    pub fn into_route(self) -> RouteHandlePtr<R> {
        match self {
            Construction::Lookaside(route) => {
                let route: RouteHandlePtr<R> = route;
                route
            }
            Construction::Bare(child) => child,
        }
    }
}

/// Creates a lookaside stage from the given configuration.
///
/// The child route is created using the given **factory** and the cache client is obtained
/// from the **registry** using the configured flavor.
///
/// # Errors
/// Fails if the configuration is invalid or if either the child route or the helper cannot be
/// created. Failing to obtain a cache client is not an error, it results in
/// [Construction::Bare].
pub fn create_lookaside_route<R, H>(
    config: &Value,
    factory: &dyn RouteFactory<R>,
    registry: &ClientRegistry,
) -> anyhow::Result<Construction<R, H>>
where
    R: Request,
    H: LookasideHelper<R>,
{
    let config = RouteConfig::parse(config)?;
    let child = factory
        .create(&config.child)
        .context("LookasideRoute: Cannot create the child route")?;
    let helper =
        H::from_config(config.helper_config.as_ref()).context("LookasideRoute: Invalid helper")?;

    let client = match registry.client_for(&config.flavor) {
        Ok(client) => client,
        Err(error) => {
            log::error!(
                "Cannot obtain a cache client for flavor '{}', routing without cache: {:#}",
                config.flavor,
                error
            );
            return Ok(Construction::Bare(child));
        }
    };

    let route = LookasideBuilder::new(child, client, helper)
        .prefix(config.prefix)
        .key_split_size(config.key_split_size)
        .ttl(config.ttl_seconds)
        .lease_settings(config.lease_settings)
        .build();

    Ok(Construction::Lookaside(Arc::new(route)))
}

/// Reads an optional boolean property.
pub(crate) fn optional_bool(config: &Value, name: &str, default: bool) -> anyhow::Result<bool> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(value)) => Ok(*value),
        Some(other) => Err(anyhow::anyhow!(
            "LookasideRoute: '{}' has to be a boolean but was {}.",
            name,
            other
        )),
    }
}

/// Reads an optional non-negative integer property.
pub(crate) fn optional_non_negative(
    config: &Value,
    name: &str,
    default: u64,
) -> anyhow::Result<u64> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| {
            anyhow::anyhow!(
                "LookasideRoute: '{}' has to be a non-negative integer but was {}.",
                name,
                value
            )
        }),
    }
}

/// Reads a required non-negative integer property.
pub(crate) fn required_non_negative(config: &Value, name: &str) -> anyhow::Result<u64> {
    match config.get(name) {
        None | Some(Value::Null) => Err(anyhow::anyhow!(
            "LookasideRoute: '{}' property is missing.",
            name
        )),
        Some(_) => optional_non_negative(config, name, 0),
    }
}

/// Reads an optional string property.
pub(crate) fn optional_string(config: &Value, name: &str, default: &str) -> anyhow::Result<String> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(default.to_owned()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(anyhow::anyhow!(
            "LookasideRoute: '{}' has to be a string but was {}.",
            name,
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::lookaside::factory::{create_lookaside_route, RouteConfig};
    use crate::lookaside::helper::{KeyPrefixHelper, LookasideHelper};
    use crate::lookaside::lease::LeaseSettings;
    use crate::message::{HelloRequest, ReplyResult};
    use crate::registry::ClientRegistry;
    use crate::route::{NullRoute, RouteHandlePtr};
    use crate::testing::{test_async, CountingRoute};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn child_factory(config: &Value) -> anyhow::Result<RouteHandlePtr<HelloRequest>> {
        match config.as_str() {
            Some("null") => Ok(Arc::new(NullRoute)),
            Some(message) => Ok(Arc::new(CountingRoute::new(message))),
            None => Err(anyhow::anyhow!("Unknown route: {}", config)),
        }
    }

    fn error_of(config: Value) -> String {
        RouteConfig::parse(&config).err().unwrap().to_string()
    }

    #[test]
    fn defaults_are_applied() {
        let config = RouteConfig::parse(&json!({"child": "Hello", "ttl": 0})).unwrap();
        assert_eq!(
            config,
            RouteConfig {
                child: json!("Hello"),
                ttl_seconds: 0,
                prefix: "".to_owned(),
                flavor: "web".to_owned(),
                key_split_size: 1,
                lease_settings: LeaseSettings::default(),
                helper_config: None,
            }
        );
    }

    #[test]
    fn all_properties_are_parsed() {
        let config = RouteConfig::from_json_str(
            r#"{
                "child": {"type": "pool"},
                "ttl": 30,
                "prefix": "p:",
                "flavor": "wildcard",
                "key_split_size": 4,
                "lease_enable": true,
                "lease_initial_wait_ms": 4,
                "lease_max_wait_ms": 40,
                "lease_num_retries": 3,
                "helper_config": {"name": "custom"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.child, json!({"type": "pool"}));
        assert_eq!(config.ttl_seconds, 30);
        assert_eq!(config.prefix, "p:");
        assert_eq!(config.flavor, "wildcard");
        assert_eq!(config.key_split_size, 4);
        assert_eq!(
            config.lease_settings,
            LeaseSettings {
                enabled: true,
                initial_wait_ms: 4,
                max_wait_ms: 40,
                num_retries: 3,
            }
        );
        assert_eq!(config.helper_config, Some(json!({"name": "custom"})));
    }

    #[test]
    fn malformed_configs_are_rejected() {
        assert_eq!(
            error_of(json!({"child": "Hello"})),
            "LookasideRoute: 'ttl' property is missing."
        );
        assert_eq!(
            error_of(json!({"ttl": 10})),
            "LookasideRoute: 'child' property is missing."
        );
        assert_eq!(
            error_of(json!({"child": "Hello", "ttl": 10, "prefix": 42})),
            "LookasideRoute: 'prefix' has to be a string but was 42."
        );
        assert_eq!(
            error_of(json!({"child": "Hello", "ttl": -1})),
            "LookasideRoute: 'ttl' has to be a non-negative integer but was -1."
        );
        assert_eq!(
            error_of(json!({"child": "Hello", "ttl": 10, "key_split_size": 0})),
            "LookasideRoute: 'key_split_size' has to be a positive integer."
        );
        assert_eq!(
            error_of(json!({"child": "Hello", "ttl": "10"})).is_empty(),
            false
        );
        assert_eq!(
            error_of(json!({"child": "Hello", "ttl": 10, "lease_enable": 1})).is_empty(),
            false
        );
        assert_eq!(
            error_of(json!(["child", "ttl"])),
            "LookasideRoute: The configuration has to be an object."
        );
        assert_eq!(RouteConfig::from_json_str("{ttl: 10").is_err(), true);
    }

    #[test]
    fn a_stage_is_created_if_a_client_is_available() {
        test_async(async {
            let registry = ClientRegistry::new();
            registry.register_memory_flavor("web", 128, 1024 * 1024);

            let construction = create_lookaside_route::<HelloRequest, KeyPrefixHelper>(
                &json!({"child": "Hello", "ttl": 15, "helper_config": {"name": "greetings"}}),
                &child_factory,
                &registry,
            )
            .unwrap();

            assert_eq!(construction.is_cached(), true);
            let route = construction.into_route();
            assert_eq!(
                route.route_name(),
                "lookaside-cache|name=greetings|ttl=15s|leases=false"
            );
            assert_eq!(registry.active_clients(), 1);

            let reply = route.route(&HelloRequest::new("World")).await;
            assert_eq!(reply.message, "Hello World");
        });
    }

    #[test]
    fn a_missing_client_degrades_to_the_bare_child() {
        test_async(async {
            let registry = ClientRegistry::new();

            let construction = create_lookaside_route::<HelloRequest, KeyPrefixHelper>(
                &json!({"child": "Hello", "ttl": 15, "flavor": "unknown"}),
                &child_factory,
                &registry,
            )
            .unwrap();

            assert_eq!(construction.is_cached(), false);
            let route = construction.into_route();
            assert_eq!(route.route_name(), "counting");

            let reply = route.route(&HelloRequest::new("World")).await;
            assert_eq!(reply.result, ReplyResult::Ok);
            assert_eq!(reply.message, "Hello World");
        });
    }

    #[test]
    fn configuration_errors_are_fatal_even_without_a_client() {
        let registry = ClientRegistry::new();

        let result = create_lookaside_route::<HelloRequest, KeyPrefixHelper>(
            &json!({"child": "Hello", "ttl": 15, "flavor": "unknown", "helper_config": 42}),
            &child_factory,
            &registry,
        );
        assert_eq!(result.is_err(), true);

        let result = create_lookaside_route::<HelloRequest, KeyPrefixHelper>(
            &json!({"child": 42, "ttl": 15}),
            &child_factory,
            &registry,
        );
        assert_eq!(result.is_err(), true);
    }

    /// Caches every request and doesn't look at its config at all.
    struct CacheAllHelper;

    impl LookasideHelper<HelloRequest> for CacheAllHelper {
        fn from_config(_config: Option<&Value>) -> anyhow::Result<Self> {
            Ok(CacheAllHelper)
        }

        fn name(&self) -> String {
            "all".to_owned()
        }

        fn cache_candidate(&self, _request: &HelloRequest) -> bool {
            true
        }

        fn build_key(&self, request: &HelloRequest) -> String {
            request.key.clone()
        }
    }

    #[test]
    fn helper_config_has_to_be_an_object() {
        let registry = ClientRegistry::new();

        for helper_config in [json!(42), json!("x"), json!(null), json!([1, 2])] {
            let result = create_lookaside_route::<HelloRequest, CacheAllHelper>(
                &json!({"child": "Hello", "ttl": 1, "helper_config": helper_config}),
                &child_factory,
                &registry,
            );
            assert_eq!(result.is_err(), true);
        }

        assert_eq!(
            error_of(json!({"child": "Hello", "ttl": 1, "helper_config": 42})),
            "LookasideRoute: 'helper_config' is not an object but was 42."
        );
        assert_eq!(
            RouteConfig::parse(&json!({"child": "Hello", "ttl": 1, "helper_config": {}}))
                .unwrap()
                .helper_config,
            Some(json!({}))
        );
    }
}
