//! Adapter type registry
//!
//! Adapter types are resolved by an explicit name → factory lookup populated
//! at startup. No reflection, no discovery: a type the binary did not
//! register simply does not exist.

use crate::adapter::Adapter;
use crate::error::{Result, RuntimeError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Constructor for one adapter type
pub type AdapterFactory = Arc<dyn Fn() -> Arc<dyn Adapter> + Send + Sync>;

/// Name-keyed adapter factories
///
/// Populated once during startup, read-only afterwards.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl FactoryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `type_name`, replacing any previous one
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Adapter> + Send + Sync + 'static,
    {
        debug!(type_name, "adapter factory registered");
        self.factories
            .insert(type_name.to_string(), Arc::new(factory));
    }

    /// Instantiate an adapter of the given type
    pub fn create(&self, type_name: &str) -> Result<Arc<dyn Adapter>> {
        self.factories
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| RuntimeError::UnknownAdapterType(type_name.to_string()))
    }

    /// Registered type names, for diagnostics
    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterContext;
    use async_trait::async_trait;

    struct NullAdapter;

    #[async_trait]
    impl Adapter for NullAdapter {
        fn type_name(&self) -> &'static str {
            "null"
        }
        async fn run(&self, _ctx: AdapterContext) {}
    }

    #[test]
    fn test_lookup_is_explicit() {
        let mut registry = FactoryRegistry::new();
        registry.register("null", || Arc::new(NullAdapter));

        assert!(registry.create("null").is_ok());
        assert!(matches!(
            registry.create("ghost"),
            Err(RuntimeError::UnknownAdapterType(_))
        ));
    }
}
