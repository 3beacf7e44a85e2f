//! Registry of named tool providers.
//!
//! Providers are registered under unique names before a server session
//! starts; the session attaches every provider's tools onto the MCP service
//! it is about to serve. The registry is explicitly constructed and handed
//! to whoever needs it; there is no process-wide instance.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::DeliverMcp;

/// A named bundle of MCP tools that can be attached to a server service.
pub trait ToolProvider: Send + Sync {
    /// Attaches this provider's tools to the service being assembled.
    ///
    /// # Errors
    /// Returns an [`AttachError`] when the provider cannot contribute its
    /// tools.
    fn attach(&self, service: &mut DeliverMcp) -> Result<(), AttachError>;
}

/// Failure reported by a provider while attaching its tools.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AttachError {
    message: String,
}

impl AttachError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service name must not be empty")]
    EmptyName,
    #[error("service already registered: {0}")]
    AlreadyRegistered(String),
    #[error("service not registered: {0}")]
    NotFound(String),
}

type ProviderMap = HashMap<String, Arc<dyn ToolProvider>>;

/// Thread-safe map of service name to tool provider.
///
/// Clones share the same underlying map. Reads take the shared lock, writes
/// the exclusive lock; no lock is held while provider code runs.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<ServiceRegistryInner>,
}

#[derive(Default)]
struct ServiceRegistryInner {
    services: RwLock<ProviderMap>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `provider` under `name`.
    ///
    /// # Errors
    /// Rejects an empty name and a name that is already bound; an existing
    /// binding is left untouched.
    pub fn register(
        &self,
        name: &str,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut services = self.write_lock();
        if services.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        services.insert(name.to_string(), provider);
        Ok(())
    }

    /// Removes the binding for `name`.
    ///
    /// # Errors
    /// Fails when `name` is not bound.
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut services = self.write_lock();
        if services.remove(name).is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Looks up the provider bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.read_lock().get(name).cloned()
    }

    /// An independent copy of the current bindings; mutating it does not
    /// affect the registry.
    #[must_use]
    pub fn snapshot(&self) -> ProviderMap {
        self.read_lock().clone()
    }

    /// Bound names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.read_lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// Drops every binding.
    pub fn clear(&self) {
        self.write_lock().clear();
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, ProviderMap> {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, ProviderMap> {
        self.inner
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProvider;

    impl ToolProvider for NullProvider {
        fn attach(&self, _service: &mut DeliverMcp) -> Result<(), AttachError> {
            Ok(())
        }
    }

    fn provider() -> Arc<dyn ToolProvider> {
        Arc::new(NullProvider)
    }

    #[test]
    fn distinct_names_are_counted() {
        let registry = ServiceRegistry::new();
        registry.register("alpha", provider()).unwrap();
        registry.register("beta", provider()).unwrap();
        registry.register("gamma", provider()).unwrap();

        assert_eq!(registry.count(), 3);
        assert_eq!(registry.names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn duplicate_names_keep_the_original_binding() {
        let registry = ServiceRegistry::new();
        let original = provider();
        registry.register("alpha", original.clone()).unwrap();

        let err = registry.register("alpha", provider()).unwrap_err();

        assert_eq!(err, RegistryError::AlreadyRegistered("alpha".to_string()));
        assert_eq!(registry.count(), 1);
        let bound = registry.get("alpha").unwrap();
        assert!(Arc::ptr_eq(&bound, &original));
    }

    #[test]
    fn empty_names_are_rejected_without_side_effects() {
        let registry = ServiceRegistry::new();
        let err = registry.register("", provider()).unwrap_err();

        assert_eq!(err, RegistryError::EmptyName);
        assert_eq!(registry.count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_removes_only_bound_names() {
        let registry = ServiceRegistry::new();
        registry.register("alpha", provider()).unwrap();

        registry.unregister("alpha").unwrap();
        assert!(registry.get("alpha").is_none());

        let err = registry.unregister("alpha").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("alpha".to_string()));
    }

    #[test]
    fn snapshot_is_independent_of_the_registry() {
        let registry = ServiceRegistry::new();
        registry.register("alpha", provider()).unwrap();

        let mut snapshot = registry.snapshot();
        snapshot.remove("alpha");
        snapshot.insert("phantom".to_string(), provider());

        assert_eq!(registry.count(), 1);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("phantom").is_none());
    }

    #[test]
    fn clear_drops_every_binding() {
        let registry = ServiceRegistry::new();
        registry.register("alpha", provider()).unwrap();
        registry.register("beta", provider()).unwrap();

        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.names(), Vec::<String>::new());
    }

    #[test]
    fn concurrent_registrations_count_each_name_once() {
        let registry = ServiceRegistry::new();
        let mut handles = Vec::new();
        for worker in 0..8_u32 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for slot in 0..50_u32 {
                    let name = format!("svc-{}-{slot}", worker % 4);
                    let _ = registry.register(&name, provider());
                    let _ = registry.get(&name);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Four name prefixes times fifty slots; every name was attempted by
        // two workers and the duplicate attempt must have been rejected.
        assert_eq!(registry.count(), 200);
    }

    #[test]
    fn concurrent_mixed_operations_leave_a_consistent_map() {
        let registry = ServiceRegistry::new();
        registry.register("stable", provider()).unwrap();

        let mut handles = Vec::new();
        for worker in 0..6_u32 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let name = format!("worker-{worker}");
                for _ in 0..100 {
                    registry.register(&name, provider()).unwrap();
                    assert!(registry.get(&name).is_some());
                    assert!(registry.get("stable").is_some());
                    registry.unregister(&name).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.names(), vec!["stable"]);
    }
}
