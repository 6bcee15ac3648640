//! Named provider factories.
//!
//! [`ProviderRegistry`] maps a provider name to a factory that builds a
//! [`Provider`] from a [`ProviderConfig`]. Registration and lookup may happen
//! concurrently; the map sits behind a read/write lock.

use super::{Provider, ProviderConfig};
use crate::error::{PipelineError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a provider instance from its resolved configuration.
pub type ProviderFactoryFn =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Registry of provider factories keyed by name.
///
/// # Example
///
/// ```
/// use llm_ensemble::provider::{MockProvider, ProviderRegistry};
/// use std::sync::Arc;
///
/// let registry = ProviderRegistry::new();
/// registry.register(Arc::new(MockProvider::fixed("echo", "hi")));
/// assert!(registry.contains("echo"));
/// ```
#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactoryFn>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register_factory(
        &self,
        name: impl Into<String>,
        factory: impl Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    ) {
        let name = name.into();
        tracing::debug!(provider = %name, "registering provider factory");
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// Register a fixed instance under its own name. Every lookup returns it.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        self.register_factory(name, move |_| Ok(provider.clone()));
    }

    /// Build the provider registered under `name`.
    pub fn create(&self, name: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        // Clone the factory out so it runs without holding the lock.
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("provider '{}'", name)))?;
        factory(config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    #[test]
    fn test_register_and_create() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::fixed("a", "x")));
        let p = registry.create("a", &ProviderConfig::default()).unwrap();
        assert_eq!(p.name(), "a");
    }

    #[test]
    fn test_factory_sees_config() {
        let registry = ProviderRegistry::new();
        registry.register_factory("m", |cfg| {
            let model = cfg.model.clone().unwrap_or_else(|| "default".into());
            Ok(Arc::new(MockProvider::fixed("m", "x").with_model(model)) as Arc<dyn Provider>)
        });
        let p = registry
            .create("m", &ProviderConfig::default().with_model("big"))
            .unwrap();
        assert_eq!(p.model(), "big");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry
            .create("nope", &ProviderConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn test_names_sorted_and_unregister() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::fixed("b", "x")));
        registry.register(Arc::new(MockProvider::fixed("a", "x")));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.unregister("a"));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(ProviderRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.register(Arc::new(MockProvider::fixed(format!("p{}", i), "x")));
                    registry.names().len()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap() >= 1);
        }
        assert_eq!(registry.names().len(), 8);
    }
}
