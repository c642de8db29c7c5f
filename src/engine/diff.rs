//! Diff between the persisted state and a freshly parsed stack

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use super::Engine;
use crate::parser::{self, Variables};
use crate::resource::{Resource, TYPE_IMAGE_CACHE, TYPE_MODULE, TYPE_VARIABLE};

/// Classification of every resource across past and next. The four
/// lists are disjoint and together cover the union of both configs,
/// except the image cache, which the engine synthesizes and which is
/// therefore never reported.
#[derive(Debug, Default)]
pub struct Diff {
    /// In the stack but not in state.
    pub new: Vec<Resource>,
    /// In both, but the declared text or live target changed.
    pub changed: Vec<Resource>,
    /// In state but no longer in the stack.
    pub removed: Vec<Resource>,
    /// In both and untouched.
    pub unchanged: Vec<Resource>,
}

impl Engine {
    /// Classify the stack at `path` against the persisted state.
    ///
    /// Performs no mutations and is safe to call repeatedly. Structural
    /// parse errors fail the diff; process-phase warnings are tolerated
    /// because providers have not populated outputs yet.
    pub fn diff(
        &mut self,
        path: &Path,
        vars: &Variables,
        vars_file: Option<&Path>,
    ) -> Result<Diff> {
        let past = self.store.load();

        let parsed = match parser::parse(&self.registry, path, vars, vars_file) {
            Ok(parsed) => parsed,
            Err(errors) => return Err(anyhow!(errors)),
        };
        if !parsed.warnings.is_empty() {
            log::debug!("ignoring process-phase warnings during diff: {}", parsed.warnings);
        }
        self.config = parsed.config;

        let mut diff = Diff::default();

        for resource in &self.config.resources {
            match past.find_resource(resource.id()) {
                None => diff.new.push(resource.clone()),
                Some(previous)
                    if previous.meta.checksum.parsed != resource.meta.checksum.parsed =>
                {
                    diff.changed.push(resource.clone())
                }
                Some(_) => diff.unchanged.push(resource.clone()),
            }
        }

        for resource in &past.resources {
            // The image cache is engine-owned and never "removed".
            if resource.type_tag() == TYPE_IMAGE_CACHE {
                continue;
            }
            if self.config.find_resource(resource.id()).is_none() {
                diff.removed.push(resource.clone());
            }
        }

        // An unchanged declaration can still have drifted on the host.
        // Pseudo-resources have no live target to probe.
        let mut drifted = Vec::new();
        for (index, resource) in diff.unchanged.iter().enumerate() {
            if resource.meta.disabled
                || resource.type_tag() == TYPE_MODULE
                || resource.type_tag() == TYPE_VARIABLE
            {
                continue;
            }

            let provider = self.registry.provider(resource.type_tag()).ok_or_else(|| {
                anyhow!(
                    "no provider registered for resource type '{}'",
                    resource.type_tag()
                )
            })?;

            let changed = provider.changed(resource).with_context(|| {
                format!("unable to determine if {} has changed", resource.id())
            })?;
            if changed {
                drifted.push(index);
            }
        }
        for index in drifted.into_iter().rev() {
            let resource = diff.unchanged.remove(index);
            diff.changed.push(resource);
        }

        Ok(diff)
    }
}
