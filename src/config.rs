//! Ordered resource set forming a stack
//!
//! A [`Config`] is the in-memory form of both a freshly parsed stack and
//! the persisted state: an ordered list of resources keyed by id, plus an
//! opaque blueprint slot carried through from older state files.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::Resource;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub blueprint: Option<Value>,

    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a resource by its id.
    pub fn find_resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    pub fn find_resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id() == id)
    }

    /// All resources of the given type tag, in declaration order.
    pub fn find_resources_by_type(&self, type_tag: &str) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.type_tag() == type_tag)
            .collect()
    }

    /// Append a resource, enforcing id uniqueness.
    pub fn append_resource(&mut self, resource: Resource) -> Result<()> {
        if self.find_resource(resource.id()).is_some() {
            bail!("duplicate resource id: {}", resource.id());
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Remove a resource by id, returning it if present.
    pub fn remove_resource(&mut self, id: &str) -> Option<Resource> {
        let index = self.resources.iter().position(|r| r.id() == id)?;
        Some(self.resources.remove(index))
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn resource_count_for_type(&self, type_tag: &str) -> usize {
        self.resources
            .iter()
            .filter(|r| r.type_tag() == type_tag)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
