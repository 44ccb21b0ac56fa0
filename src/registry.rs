//! Provides a registry which hands out shared cache clients per **flavor**.
//!
//! A flavor names a cache tier (e.g. "web" or "wildcard"). For each flavor a [ClientFactory] is
//! registered which knows how to create a client for it. All route stages which use the same
//! flavor share a single client, which is identified by its persistence id
//! (`LookasideClient:<flavor>`).
//!
//! The registry itself only keeps a weak reference to each client. Therefore a client is torn
//! down as soon as the last route stage using it is dropped (e.g. when the routing tree is
//! reconfigured) and a fresh one is created once it is requested again.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use lookaside::registry::ClientRegistry;
//! # #[tokio::main]
//! # async fn main() {
//! let registry = ClientRegistry::new();
//! registry.register_memory_flavor("web", 1024, 1024 * 1024);
//!
//! // Both lookups yield the same client...
//! let client = registry.client_for("web").unwrap();
//! let other = registry.client_for("web").unwrap();
//! assert_eq!(Arc::ptr_eq(&client, &other), true);
//!
//! // An unknown flavor is reported as error...
//! assert_eq!(registry.client_for("unknown").is_err(), true);
//!
//! // Once terminated, no more clients are handed out...
//! registry.terminate();
//! assert_eq!(registry.is_running(), false);
//! assert_eq!(registry.client_for("web").is_err(), true);
//! # }
//! ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Context;

use crate::client::CacheClient;
use crate::memory::MemoryCacheClient;

/// Creates the cache client for a flavor.
///
/// Note that a factory must not call back into the [ClientRegistry] as it is invoked while the
/// registry is locked.
pub trait ClientFactory: Send + Sync {
    /// Creates a new client for the given flavor.
    fn create(&self, flavor: &str) -> anyhow::Result<Arc<dyn CacheClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str) -> anyhow::Result<Arc<dyn CacheClient>> + Send + Sync,
{
    fn create(&self, flavor: &str) -> anyhow::Result<Arc<dyn CacheClient>> {
        self(flavor)
    }
}

/// Keeps the factories and the currently alive clients of all flavors.
pub struct ClientRegistry {
    factories: Mutex<HashMap<String, Arc<dyn ClientFactory>>>,
    clients: Mutex<HashMap<String, Weak<dyn CacheClient>>>,
    is_running: AtomicBool,
}

impl ClientRegistry {
    /// Creates a new and empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(ClientRegistry {
            factories: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Computes the id under which the shared client of a flavor is kept.
    ///
    /// # Example
    /// ```
    /// # use lookaside::registry::ClientRegistry;
    /// assert_eq!(ClientRegistry::persistence_id("web"), "LookasideClient:web");
    /// ```
    pub fn persistence_id(flavor: &str) -> String {
        format!("LookasideClient:{}", flavor)
    }

    /// Registers the factory to use for the given flavor.
    ///
    /// A previously registered factory is replaced. Clients which are already alive remain in
    /// use until they are released.
    pub fn register_factory<F>(&self, flavor: &str, factory: F)
    where
        F: ClientFactory + 'static,
    {
        let _ = self
            .factories
            .lock()
            .unwrap()
            .insert(flavor.to_owned(), Arc::new(factory));
    }

    /// Registers a factory which serves the given flavor using an in-process
    /// [MemoryCacheClient].
    ///
    /// Note that the client is spawned lazily, therefore **client_for** has to be called within a
    /// tokio runtime for this flavor.
    pub fn register_memory_flavor(&self, flavor: &str, capacity: usize, max_memory: usize) {
        self.register_factory(
            flavor,
            move |_: &str| -> anyhow::Result<Arc<dyn CacheClient>> {
                Ok(MemoryCacheClient::start(capacity, max_memory))
            },
        );
    }

    /// Returns the shared client for the given flavor.
    ///
    /// If no client is alive, a new one is created using the registered factory.
    ///
    /// # Errors
    /// Fails if the registry has been terminated, if no factory is known for the flavor or if
    /// the factory fails.
    pub fn client_for(&self, flavor: &str) -> anyhow::Result<Arc<dyn CacheClient>> {
        if !self.is_running() {
            return Err(anyhow::anyhow!(
                "Cannot provide a client for '{}' as the registry has been terminated.",
                flavor
            ));
        }

        let persistence_id = ClientRegistry::persistence_id(flavor);
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(&persistence_id).and_then(Weak::upgrade) {
            return Ok(client);
        }

        if clients.remove(&persistence_id).is_some() {
            log::info!("Shared client {} has been released before.", persistence_id);
        }

        let factory = self
            .factories
            .lock()
            .unwrap()
            .get(flavor)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No cache client is known for flavor '{}'.", flavor))?;

        let client = factory
            .create(flavor)
            .with_context(|| format!("Failed to create the cache client {}", persistence_id))?;

        log::info!("Created shared client {}.", persistence_id);
        let _ = clients.insert(persistence_id, Arc::downgrade(&client));

        Ok(client)
    }

    /// Returns the number of shared clients which are currently alive.
    pub fn active_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap()
            .values()
            .filter(|client| client.strong_count() > 0)
            .count()
    }

    /// Determines if the registry still hands out clients.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the registry.
    ///
    /// All factories are released and no more clients are handed out. Clients which are in use
    /// remain alive until their last user drops them.
    pub fn terminate(&self) {
        self.factories.lock().unwrap().clear();
        self.clients.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::client::CacheClient;
    use crate::registry::ClientRegistry;
    use crate::testing::RecordingClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_registry() -> (Arc<ClientRegistry>, Arc<AtomicUsize>) {
        let registry = ClientRegistry::new();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        registry.register_factory(
            "web",
            move |_: &str| -> anyhow::Result<Arc<dyn CacheClient>> {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(RecordingClient::new().0))
            },
        );

        (registry, created)
    }

    #[test]
    fn clients_are_shared_per_flavor() {
        let (registry, created) = counting_registry();

        let first = registry.client_for("web").unwrap();
        let second = registry.client_for("web").unwrap();

        assert_eq!(Arc::ptr_eq(&first, &second), true);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_clients(), 1);
    }

    #[test]
    fn clients_are_torn_down_with_their_last_user() {
        let (registry, created) = counting_registry();

        let first = registry.client_for("web").unwrap();
        let second = registry.client_for("web").unwrap();
        drop(first);
        assert_eq!(registry.active_clients(), 1);
        drop(second);
        assert_eq!(registry.active_clients(), 0);

        // A new client is created on demand...
        let _third = registry.client_for("web").unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_factories_are_reported() {
        let registry = ClientRegistry::new();
        registry.register_factory("broken", |_: &str| -> anyhow::Result<Arc<dyn CacheClient>> {
            Err(anyhow::anyhow!("no route to host"))
        });

        let error = registry.client_for("broken").err().unwrap();
        assert_eq!(
            format!("{:#}", error),
            "Failed to create the cache client LookasideClient:broken: no route to host"
        );
        assert_eq!(registry.client_for("unknown").is_err(), true);
    }

    #[test]
    fn terminate_keeps_clients_in_use_alive() {
        let (registry, _) = counting_registry();
        let client = registry.client_for("web").unwrap();

        registry.terminate();

        assert_eq!(registry.client_for("web").is_err(), true);
        assert_eq!(Arc::strong_count(&client), 1);
    }
}
