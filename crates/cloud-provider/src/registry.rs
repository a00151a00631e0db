//! Providers reachable by name.
//!
//! The owning process registers providers explicitly during startup and
//! passes the registry to whatever needs to look them up.

use std::collections::BTreeMap;
use std::io::Read;

use tracing::{debug, info};

use crate::error::{ConfigError, RegistryError};
use crate::CloudProvider;

/// Builds a provider from an optional configuration reader.
pub type ProviderFactory = Box<
    dyn Fn(Option<&mut dyn Read>) -> Result<Box<dyn CloudProvider>, ConfigError> + Send + Sync,
>;

/// Maps provider names to their factories.
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`. Each name may be registered once.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) -> Result<(), RegistryError> {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        debug!(provider = %name, "Registered cloud provider");
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Construct the provider registered under `name`.
    pub fn get(
        &self,
        name: &str,
        config: Option<&mut dyn Read>,
    ) -> Result<Box<dyn CloudProvider>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        let provider = factory(config).map_err(|source| RegistryError::Config {
            name: name.to_string(),
            source,
        })?;
        info!(provider = %name, "Constructed cloud provider");
        Ok(provider)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Capability, InstanceMetadata};

    struct Inert;

    impl CloudProvider for Inert {
        fn provider_name(&self) -> &str {
            "inert"
        }

        fn has_cluster_id(&self) -> bool {
            true
        }

        fn supports(&self, _capability: Capability) -> bool {
            false
        }

        fn instance_metadata(&self) -> Option<&dyn InstanceMetadata> {
            None
        }
    }

    fn inert(_config: Option<&mut dyn Read>) -> Result<Box<dyn CloudProvider>, ConfigError> {
        Ok(Box::new(Inert))
    }

    fn disabled(_config: Option<&mut dyn Read>) -> Result<Box<dyn CloudProvider>, ConfigError> {
        Err(ConfigError::Disabled)
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        registry.register("inert", Box::new(inert)).unwrap();
        let provider = registry.get("inert", None).expect("provider should build");
        assert_eq!(provider.provider_name(), "inert");
        assert_eq!(registry.names(), vec!["inert"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = Registry::new();
        registry.register("inert", Box::new(inert)).unwrap();
        let err = registry
            .register("inert", Box::new(inert))
            .expect_err("second registration should fail");
        assert!(matches!(err, RegistryError::Duplicate(ref name) if name == "inert"));
    }

    #[test]
    fn test_unknown_name() {
        let registry = Registry::new();
        assert!(matches!(
            registry.get("aws", None),
            Err(RegistryError::Unknown(_))
        ));
    }

    #[test]
    fn test_factory_errors_carry_the_name() {
        let mut registry = Registry::new();
        registry
            .register("off", Box::new(disabled))
            .unwrap();
        let err = registry.get("off", None).err().expect("construction should fail");
        assert_eq!(
            err.to_string(),
            "could not construct cloud provider \"off\": all cloud-provider functionality disabled by config"
        );
    }
}
