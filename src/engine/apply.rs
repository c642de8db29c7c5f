//! Apply: drive the stack toward its declared state
//!
//! The walk hands the create callback one resource at a time in
//! dependency order; the callback fully completes that resource's
//! transition before the next one arrives, so config mutation needs no
//! locking. State is persisted after the image cache is first created
//! and again at the end of every apply, success or failure.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use super::Engine;
use crate::config::Config;
use crate::parser::{self, Variables};
use crate::registry::Registry;
use crate::resource::{
    ImageCacheSpec, Resource, Spec, Status, IMAGE_CACHE_ID, TYPE_IMAGE_CACHE, TYPE_MODULE,
    TYPE_NETWORK, TYPE_REGISTRY, TYPE_VARIABLE,
};

impl Engine {
    pub fn apply(&mut self, path: &Path) -> Result<&Config> {
        self.apply_with_variables(path, &Variables::new(), None)
    }

    /// Reconcile the stack at `path` against the persisted state.
    ///
    /// Individual provider failures mark their resource `failed` and do
    /// not stop the apply; the first such error is returned after state
    /// has been persisted. Only structural parse errors and an image
    /// cache that cannot be created abort early.
    pub fn apply_with_variables(
        &mut self,
        path: &Path,
        vars: &Variables,
        vars_file: Option<&Path>,
    ) -> Result<&Config> {
        log::info!("creating resources from {}", path.display());

        // Aborts before any side effect on structural errors.
        let diff = self.diff(path, vars, vars_file)?;

        self.config = self.store.load();

        // A changed declaration means destroy-and-recreate: taint the
        // recorded version so the callback picks the right branch.
        // Resources that changed *to* disabled are handled after the
        // walk instead.
        for changed in &diff.changed {
            if changed.meta.disabled {
                continue;
            }
            if let Some(existing) = self.config.find_resource_mut(changed.id()) {
                if existing.status() == Status::Created {
                    existing.set_status(Status::Tainted);
                }
            }
        }

        self.ensure_image_cache()?;

        let registry = &self.registry;
        let config = &mut self.config;
        let walked = parser::walk(registry, path, vars, vars_file, &mut |resource| {
            create_callback(registry, config, resource)
        });

        let report = match walked {
            Ok(report) => report,
            Err(errors) => {
                self.save_state();
                return Err(anyhow!(errors));
            }
        };

        let mut first_error: Option<anyhow::Error> = None;

        if let Some(err) = report.callback_error {
            first_error.get_or_insert(err);
        }
        if !report.errors.is_empty() {
            log::warn!("process errors during apply: {}", report.errors);
            if first_error.is_none() {
                first_error = Some(anyhow!(report.errors));
            }
        }

        // Disabled resources bypass the walk but still live in state;
        // modules and variables likewise.
        for resource in report.disabled {
            self.append_disabled(resource);
        }
        for resource in report.pseudo {
            self.append_pseudo(resource);
        }

        // Resources that were created earlier but are now disabled come
        // down before removals are processed.
        if let Err(err) = self.destroy_disabled() {
            first_error.get_or_insert(err);
        }

        if let Err(err) = self.process_removed(&diff.removed) {
            first_error.get_or_insert(err);
        }

        self.save_state();

        match first_error {
            Some(err) => Err(err),
            None => Ok(&self.config),
        }
    }

    /// Synthesize the image cache on first apply, or retry one that
    /// failed earlier. A creation failure is fatal to the apply, but
    /// the failed cache is persisted first so the next apply retries it.
    fn ensure_image_cache(&mut self) -> Result<()> {
        let provider = self.registry.provider(TYPE_IMAGE_CACHE).ok_or_else(|| {
            anyhow!("no provider registered for resource type '{TYPE_IMAGE_CACHE}'")
        })?;

        if let Some(cache) = self.config.find_resource_mut(IMAGE_CACHE_ID) {
            if !matches!(cache.status(), Status::Failed | Status::Tainted) {
                return Ok(());
            }

            // The cache is never walked, so its failed-then-recreate
            // cycle happens here.
            log::debug!("recreating image cache {IMAGE_CACHE_ID}");
            if let Err(err) = provider.destroy(cache) {
                log::warn!("destroy before recreate of image cache failed: {err:#}");
            }

            let result = provider.create(cache);
            match &result {
                Ok(()) => cache.set_status(Status::Created),
                Err(_) => cache.set_status(Status::Failed),
            }
            self.save_state();
            return result.context("unable to create image cache");
        }

        log::debug!("creating image cache {IMAGE_CACHE_ID}");

        let mut cache = Resource::new("default", Spec::ImageCache(ImageCacheSpec::default()));
        let result = provider.create(&mut cache);
        match &result {
            Ok(()) => cache.set_status(Status::Created),
            Err(_) => cache.set_status(Status::Failed),
        }

        self.config.append_resource(cache)?;
        self.save_state();

        result.context("unable to create image cache")
    }

    fn append_disabled(&mut self, resource: Resource) {
        // Already known: flip the disabled flag and track the declared
        // text; its status and outputs stay until destroy_disabled
        // decides.
        if let Some(existing) = self.config.find_resource_mut(resource.id()) {
            existing.meta.disabled = true;
            existing.meta.checksum = resource.meta.checksum.clone();
            return;
        }

        let mut resource = resource;
        if resource.status() == Status::Pending {
            // Never created, so disabled is its terminal status.
            resource.set_status(Status::Disabled);
        }
        if let Err(err) = self.config.append_resource(resource) {
            log::warn!("unable to record disabled resource: {err:#}");
        }
    }

    fn append_pseudo(&mut self, resource: Resource) {
        self.config.remove_resource(resource.id());
        if let Err(err) = self.config.append_resource(resource) {
            log::warn!("unable to record resource: {err:#}");
        }
    }

    /// Destroy resources that are disabled now but were created by an
    /// earlier apply. Failures are recorded and the sweep continues.
    fn destroy_disabled(&mut self) -> Result<()> {
        let ids: Vec<String> = self
            .config
            .resources
            .iter()
            .filter(|r| r.meta.disabled && r.status() == Status::Created)
            .map(|r| r.id().to_string())
            .collect();

        let registry = &self.registry;
        let config = &mut self.config;
        let mut first_error: Option<anyhow::Error> = None;

        for id in ids {
            let Some(resource) = config.find_resource_mut(&id) else {
                continue;
            };

            let Some(provider) = registry.provider(resource.type_tag()) else {
                resource.set_status(Status::Failed);
                first_error.get_or_insert(anyhow!(
                    "no provider registered for resource type '{}'",
                    resource.type_tag()
                ));
                continue;
            };

            log::debug!("destroying disabled resource {id}");
            match provider.destroy(resource) {
                Ok(()) => resource.set_status(Status::Disabled),
                Err(err) => {
                    resource.set_status(Status::Failed);
                    first_error
                        .get_or_insert(err.context(format!("unable to destroy {id}")));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Destroy resources present in state but gone from the stack. On
    /// success the resource leaves the config; on failure it stays,
    /// marked failed, for the next apply to retry.
    fn process_removed(&mut self, removed: &[Resource]) -> Result<()> {
        let registry = &self.registry;
        let config = &mut self.config;
        let mut first_error: Option<anyhow::Error> = None;

        for gone in removed {
            let id = gone.id();
            log::debug!("removing resource in state but not in stack: {id}");

            let Some(type_tag) = config.find_resource(id).map(|r| r.type_tag()) else {
                continue;
            };

            // Pseudo-resources have no runtime footprint to tear down.
            if type_tag == TYPE_MODULE || type_tag == TYPE_VARIABLE {
                config.remove_resource(id);
                continue;
            }

            let Some(provider) = registry.provider(type_tag) else {
                first_error.get_or_insert(anyhow!(
                    "no provider registered for resource type '{type_tag}'"
                ));
                continue;
            };

            let resource = config
                .find_resource_mut(id)
                .expect("resource disappeared mid-removal");
            match provider.destroy(resource) {
                Ok(()) => {
                    config.remove_resource(id);
                    // Keep the cache's dependency set equal to the
                    // networks that still exist.
                    if type_tag == TYPE_NETWORK {
                        if let Some(cache) = config.find_resource_mut(IMAGE_CACHE_ID) {
                            cache.meta.depends_on.retain(|dep| dep != id);
                        }
                    }
                }
                Err(err) => {
                    resource.set_status(Status::Failed);
                    first_error
                        .get_or_insert(err.context(format!("unable to destroy {id}")));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Per-resource state machine, invoked by the walk in dependency order.
fn create_callback(
    registry: &Registry,
    config: &mut Config,
    resource: &mut Resource,
) -> Result<()> {
    let Some(provider) = registry.provider(resource.type_tag()) else {
        resource.set_status(Status::Failed);
        return Err(anyhow!(
            "no provider registered for resource type '{}'",
            resource.type_tag()
        ));
    };

    // The recorded status takes precedence over the fresh parse; the
    // new instance replaces the recorded one.
    if let Some(previous) = config.remove_resource(resource.id()) {
        resource.set_status(previous.status());
    }

    let mut provider_error: Option<anyhow::Error> = None;

    match resource.status() {
        Status::Created => {
            if let Err(err) = provider.refresh(resource) {
                resource.set_status(Status::Failed);
                provider_error = Some(err);
            }
        }
        status => {
            // Tainted and failed targets are torn down first; a destroy
            // error here is recorded but recreation is always attempted.
            if matches!(status, Status::Tainted | Status::Failed) {
                if let Err(err) = provider.destroy(resource) {
                    log::warn!(
                        "destroy before recreate of {} failed: {err:#}",
                        resource.id()
                    );
                }
            }

            // Set before create so the status reflects the attempted
            // operation even if the provider panics mid-call.
            resource.set_status(Status::Created);
            if let Err(err) = provider.create(resource) {
                resource.set_status(Status::Failed);
                provider_error = Some(err);
            }
        }
    }

    config.append_resource(resource.clone())?;

    if resource.type_tag() == TYPE_NETWORK && resource.status() == Status::Created {
        attach_network_to_cache(registry, config, resource.id());
    }
    if resource.type_tag() == TYPE_REGISTRY && resource.status() == Status::Created {
        fold_registry_into_cache(registry, config, resource);
    }

    match provider_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// A network just reached `created`: record it on the image cache and
/// refresh the cache so it attaches. Not fatal if the cache is missing.
fn attach_network_to_cache(registry: &Registry, config: &mut Config, network_id: &str) {
    let Some(cache) = config.find_resource_mut(IMAGE_CACHE_ID) else {
        log::error!("image cache {IMAGE_CACHE_ID} not found while attaching {network_id}");
        return;
    };

    log::debug!("attaching image cache to {network_id}");
    cache.add_dependency(network_id);

    let Some(provider) = registry.provider(TYPE_IMAGE_CACHE) else {
        log::error!("no provider registered for resource type '{TYPE_IMAGE_CACHE}'");
        return;
    };
    if let Err(err) = provider.refresh(cache) {
        log::error!("unable to refresh image cache: {err:#}");
    }
}

/// A registry just reached `created`: fold it into the cache's registry
/// list (by hostname) and restart the cache to pick it up. Errors are
/// recorded in the log but never abort the apply.
fn fold_registry_into_cache(registry: &Registry, config: &mut Config, created: &Resource) {
    let Spec::Registry(new_registry) = &created.spec else {
        return;
    };

    let Some(cache) = config.find_resource_mut(IMAGE_CACHE_ID) else {
        log::error!("image cache {IMAGE_CACHE_ID} not found while adding registry");
        return;
    };
    let Spec::ImageCache(cache_spec) = &mut cache.spec else {
        log::error!("{IMAGE_CACHE_ID} does not have an image cache body");
        return;
    };

    let already_present = cache_spec
        .registries
        .iter()
        .any(|r| r.hostname == new_registry.hostname);
    if already_present {
        return;
    }

    log::debug!("adding registry {} to image cache", new_registry.hostname);
    cache_spec.registries.push(new_registry.clone());

    let Some(provider) = registry.provider(TYPE_IMAGE_CACHE) else {
        log::error!("no provider registered for resource type '{TYPE_IMAGE_CACHE}'");
        return;
    };
    if let Err(err) = provider.destroy(cache) {
        log::error!("unable to destroy image cache: {err:#}");
    }
    if let Err(err) = provider.create(cache) {
        log::error!("unable to create image cache: {err:#}");
    }
}
