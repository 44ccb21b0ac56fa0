//! Defines the contract of the routing tree into which a lookaside stage is plugged.
//!
//! A routing tree is composed of [RouteHandle]s. Each handle receives a request, may forward it
//! to one or more children and finally produces a reply. Handles are shared between all
//! concurrently routed requests, therefore they are kept as [RouteHandlePtr].
//!
//! Next to routing, a tree can be **traversed** using a [RouteTraverser]. This permits to
//! inspect which handles a request would reach, without actually routing it.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use lookaside::message::{HelloRequest, ReplyResult};
//! # use lookaside::route::{NullRoute, RouteHandle, RouteHandlePtr};
//! # #[tokio::main]
//! # async fn main() {
//! let route: RouteHandlePtr<HelloRequest> = Arc::new(NullRoute);
//!
//! let reply = route.route(&HelloRequest::new("test")).await;
//! assert_eq!(reply.result, ReplyResult::NotFound);
//! assert_eq!(route.route_name(), "null");
//! # }
//! ```
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::{Reply, ReplyResult, Request};

/// Represents a node within a routing tree.
#[async_trait]
pub trait RouteHandle<R: Request>: Send + Sync {
    /// Routes the given request and returns the reply.
    ///
    /// Note that this never fails. Problems are reported as reply with an appropriate
    /// [ReplyResult].
    async fn route(&self, request: &R) -> R::Reply;

    /// Reports all children which would handle the given request to the given traverser.
    ///
    /// By default, a handle has no children.
    fn traverse(&self, _request: &R, _traverser: &dyn RouteTraverser<R>) {}

    /// Returns a short description of this handle.
    fn route_name(&self) -> String;
}

/// Represents a shared route handle.
pub type RouteHandlePtr<R> = Arc<dyn RouteHandle<R>>;

/// Visits the handles of a routing tree.
pub trait RouteTraverser<R: Request> {
    /// Invoked for each handle which would handle the given request.
    fn visit(&self, handle: &dyn RouteHandle<R>, request: &R);
}

/// Creates route handles from their declarative configuration.
///
/// This is used to build the child of a stage which is itself created from a configuration.
pub trait RouteFactory<R: Request> {
    /// Creates the route handle described by the given configuration.
    fn create(&self, config: &Value) -> anyhow::Result<RouteHandlePtr<R>>;
}

impl<R, F> RouteFactory<R> for F
where
    R: Request,
    F: Fn(&Value) -> anyhow::Result<RouteHandlePtr<R>>,
{
    fn create(&self, config: &Value) -> anyhow::Result<RouteHandlePtr<R>> {
        self(config)
    }
}

/// Answers every request with [ReplyResult::NotFound].
pub struct NullRoute;

#[async_trait]
impl<R: Request> RouteHandle<R> for NullRoute {
    async fn route(&self, _request: &R) -> R::Reply {
        R::Reply::from_result(ReplyResult::NotFound)
    }

    fn route_name(&self) -> String {
        "null".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{GoodbyeRequest, HelloRequest, ReplyResult};
    use crate::route::{NullRoute, RouteFactory, RouteHandle, RouteHandlePtr, RouteTraverser};
    use crate::testing::{test_async, CountingRoute};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    struct NameCollector(Mutex<Vec<String>>);

    impl RouteTraverser<HelloRequest> for NameCollector {
        fn visit(&self, handle: &dyn RouteHandle<HelloRequest>, _request: &HelloRequest) {
            self.0.lock().unwrap().push(handle.route_name());
        }
    }

    #[test]
    fn null_route_answers_not_found() {
        test_async(async {
            let reply = RouteHandle::<GoodbyeRequest>::route(&NullRoute, &GoodbyeRequest::new("x"))
                .await;
            assert_eq!(reply.result, ReplyResult::NotFound);
        });
    }

    #[test]
    fn leaves_have_no_children() {
        let collector = NameCollector(Mutex::new(Vec::new()));
        RouteHandle::<HelloRequest>::traverse(&NullRoute, &HelloRequest::new("x"), &collector);
        assert_eq!(collector.0.lock().unwrap().is_empty(), true);
    }

    #[test]
    fn closures_act_as_route_factories() {
        let factory = |config: &Value| -> anyhow::Result<RouteHandlePtr<HelloRequest>> {
            match config.as_str() {
                Some("null") => Ok(Arc::new(NullRoute)),
                Some(message) => Ok(Arc::new(CountingRoute::new(message))),
                None => Err(anyhow::anyhow!("Expected a string")),
            }
        };

        assert_eq!(factory.create(&json!("null")).unwrap().route_name(), "null");
        assert_eq!(
            factory.create(&json!("Hello")).unwrap().route_name(),
            "counting"
        );
        assert_eq!(factory.create(&json!(42)).is_err(), true);
    }
}
