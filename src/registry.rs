//! Resource type registry
//!
//! Maps a resource type tag to the provider factory for that kind. The
//! registry is populated once at startup and read-only afterwards; the
//! parser consults it to decide which type tags are legal, and the
//! engine obtains providers from it. Registering the same tag twice is
//! a programmer error.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::provider::{
    cache::{ImageCacheProvider, RegistryProvider},
    docker::{ContainerProvider, NetworkProvider, SidecarProvider},
    exec::ExecProvider,
    k8s::{ClusterProvider, HelmProvider},
    Provider, ProviderFactory,
};
use crate::resource;

#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, ProviderFactory>,
}

impl Registry {
    /// An empty registry. Callers register their own types; mainly
    /// useful for tests that substitute recording providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in resource type wired to its
    /// concrete provider.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();

        // Registration of a fixed tag set cannot collide.
        registry
            .register(resource::TYPE_NETWORK, || Box::new(NetworkProvider::new()))
            .unwrap();
        registry
            .register(resource::TYPE_CONTAINER, || {
                Box::new(ContainerProvider::new())
            })
            .unwrap();
        registry
            .register(resource::TYPE_SIDECAR, || Box::new(SidecarProvider::new()))
            .unwrap();
        registry
            .register(resource::TYPE_IMAGE_CACHE, || {
                Box::new(ImageCacheProvider::new())
            })
            .unwrap();
        registry
            .register(resource::TYPE_REGISTRY, || Box::new(RegistryProvider::new()))
            .unwrap();
        registry
            .register(resource::TYPE_K8S_CLUSTER, || {
                Box::new(ClusterProvider::new())
            })
            .unwrap();
        registry
            .register(resource::TYPE_HELM, || Box::new(HelmProvider::new()))
            .unwrap();
        registry
            .register(resource::TYPE_EXEC, || Box::new(ExecProvider::new()))
            .unwrap();

        registry
    }

    /// Register a provider factory for a type tag.
    pub fn register<F>(&mut self, type_tag: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Provider> + Send + Sync + 'static,
    {
        let type_tag = type_tag.into();
        if self.factories.contains_key(&type_tag) {
            bail!("resource type '{type_tag}' is already registered");
        }
        self.factories.insert(type_tag, Box::new(factory));
        Ok(())
    }

    /// Whether a type tag names a registered provider-backed resource.
    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Obtain a provider for the type tag. `None` means the type was
    /// never registered, which the engine reports as a per-resource
    /// failure.
    pub fn provider(&self, type_tag: &str) -> Option<Box<dyn Provider>> {
        self.factories.get(type_tag).map(|factory| factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NullProvider;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        registry
            .register("network", || Box::new(NullProvider))
            .unwrap();

        assert!(registry.is_registered("network"));
        assert!(registry.provider("network").is_some());
        assert!(registry.provider("container").is_none());
    }

    #[test]
    fn test_duplicate_registration_is_error() {
        let mut registry = Registry::new();
        registry
            .register("network", || Box::new(NullProvider))
            .unwrap();
        assert!(registry.register("network", || Box::new(NullProvider)).is_err());
    }

    #[test]
    fn test_builtin_types_cover_the_closed_set() {
        let registry = Registry::with_builtin_types();
        for tag in [
            "network",
            "container",
            "sidecar",
            "image_cache",
            "registry",
            "k8s_cluster",
            "helm",
            "exec",
        ] {
            assert!(registry.is_registered(tag), "missing builtin: {tag}");
        }

        // Pseudo-resources have no provider; the engine never asks.
        assert!(!registry.is_registered("module"));
        assert!(!registry.is_registered("variable"));
    }
}
