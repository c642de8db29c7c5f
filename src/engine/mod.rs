//! Reconciliation engine
//!
//! The engine owns the full lifecycle: parse a stack, diff it against
//! the persisted state, drive providers through per-resource state
//! transitions in dependency order, and keep the state file recoverable
//! at every step. Destruction walks the same graph in reverse.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::Config;
use crate::parser::{self, dag::Graph, Variables};
use crate::registry::Registry;
use crate::resource::{Status, TYPE_MODULE, TYPE_VARIABLE};
use crate::state::StateStore;

mod apply;
mod diff;

pub use diff::Diff;

pub struct Engine {
    registry: Registry,
    store: StateStore,
    config: Config,
}

impl Engine {
    pub fn new(registry: Registry, store: StateStore) -> Self {
        Self {
            registry,
            store,
            config: Config::new(),
        }
    }

    /// The current in-memory config: the last parse, apply, or destroy
    /// result.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resource_count(&self) -> usize {
        self.config.resource_count()
    }

    pub fn resource_count_for_type(&self, type_tag: &str) -> usize {
        self.config.resource_count_for_type(type_tag)
    }

    /// Parse a stack without touching the runtime or the state file.
    /// Useful for validating a configuration before applying it.
    pub fn parse_config(&mut self, path: &Path) -> Result<&Config> {
        self.parse_config_with_variables(path, &Variables::new(), None)
    }

    pub fn parse_config_with_variables(
        &mut self,
        path: &Path,
        vars: &Variables,
        vars_file: Option<&Path>,
    ) -> Result<&Config> {
        log::debug!("parsing configuration at {}", path.display());

        match parser::parse(&self.registry, path, vars, vars_file) {
            Ok(parsed) => {
                if !parsed.warnings.is_empty() {
                    // References to not-yet-populated outputs are fine
                    // during validation.
                    log::debug!("parse warnings: {}", parsed.warnings);
                }
                self.config = parsed.config;
                Ok(&self.config)
            }
            Err(errors) => Err(anyhow!(errors)),
        }
    }

    /// Destroy everything recorded in state, dependents before their
    /// dependencies, then delete the state file. Missing state is a
    /// no-op success. If any destroy fails, state is preserved so the
    /// walk can be retried.
    pub fn destroy(&mut self) -> Result<()> {
        log::info!("destroying resources");

        self.config = self.store.load();
        if self.config.is_empty() {
            return self.store.remove();
        }

        let mut graph = Graph::new();
        for resource in &self.config.resources {
            graph.add_node(resource.id());
        }
        for resource in &self.config.resources {
            for dep in &resource.meta.depends_on {
                if graph.contains(dep) {
                    graph.add_dependency(resource.id(), dep.as_str());
                }
            }
        }

        let order = graph
            .destruction_order()
            .map_err(|id| anyhow!("dependency cycle in state involving {id}"))?;

        for id in order {
            let Some(resource) = self.config.find_resource(&id) else {
                continue;
            };

            // Disabled and pseudo-resources were never materialized.
            if resource.meta.disabled
                || resource.type_tag() == TYPE_MODULE
                || resource.type_tag() == TYPE_VARIABLE
            {
                self.config.remove_resource(&id);
                continue;
            }

            let type_tag = resource.type_tag();
            let Some(provider) = self.registry.provider(type_tag) else {
                if let Some(resource) = self.config.find_resource_mut(&id) {
                    resource.set_status(Status::Failed);
                }
                return Err(anyhow!(
                    "no provider registered for resource type '{type_tag}'"
                ));
            };

            let resource = self
                .config
                .find_resource_mut(&id)
                .expect("resource disappeared mid-walk");
            if let Err(err) = provider.destroy(resource) {
                resource.set_status(Status::Failed);
                return Err(err.context(format!("unable to destroy {id}")));
            }

            self.config.remove_resource(&id);
        }

        self.store.remove()
    }

    pub(crate) fn save_state(&self) {
        // A failed save must not mask the apply outcome.
        if let Err(err) = self.store.save(&self.config) {
            log::warn!("unable to save state: {err:#}");
        }
    }
}
