//! Provider interface and concrete providers
//!
//! A provider is the per-type lifecycle handler behind every resource.
//! The engine owns the resources; providers receive a mutable handle for
//! the duration of a call and communicate outputs solely by writing to
//! that resource's properties.

use anyhow::Result;

use crate::resource::Resource;

pub mod cache;
pub mod docker;
pub mod exec;
pub mod k8s;

/// Lifecycle operations every resource kind must implement.
///
/// Providers should be idempotent where the underlying runtime allows,
/// and `destroy` must tolerate partially-created or already-absent
/// targets. Any returned error is treated as a per-resource failure;
/// providers signal nothing across resources except through their own
/// resource's properties.
pub trait Provider {
    /// Bring the resource into existence; may populate output properties.
    fn create(&self, resource: &mut Resource) -> Result<()>;

    /// Remove the resource. Must tolerate an already-absent target.
    fn destroy(&self, resource: &mut Resource) -> Result<()>;

    /// Re-apply configuration to an existing target, e.g. when a new
    /// network attaches to the image cache.
    fn refresh(&self, resource: &mut Resource) -> Result<()>;

    /// Whether live state has diverged from the recorded properties.
    fn changed(&self, resource: &Resource) -> Result<bool>;
}

/// Factory producing a provider for a resource type.
pub type ProviderFactory = Box<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

/// A provider whose every operation succeeds and does nothing.
///
/// Used for pseudo-resources that have no runtime footprint.
pub struct NullProvider;

impl Provider for NullProvider {
    fn create(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn destroy(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn refresh(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn changed(&self, _resource: &Resource) -> Result<bool> {
        Ok(false)
    }
}
