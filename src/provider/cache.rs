//! Image cache and registry providers
//!
//! The cache runs a pull-through registry proxy container that joins
//! every network the engine records in the cache's `depends_on`, so
//! image pulls on those networks hit the local cache first. Declared
//! private registries are passed to the proxy via environment and
//! require a container restart to pick up (the engine drives that
//! destroy/create cycle).

use anyhow::{bail, Result};
use serde_json::Value;

use super::docker::{remove_container, runtime_name, runtime_name_for_id, DockerCli};
use super::Provider;
use crate::resource::{Resource, Spec};

const PROXY_IMAGE: &str = "berthdev/registry-proxy:0.2";
const CACHE_VOLUME: &str = "berth-image-cache";

pub struct ImageCacheProvider {
    docker: DockerCli,
}

impl ImageCacheProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }

    /// Join the cache container to every network in `depends_on` that it
    /// is not already attached to.
    fn connect_networks(&self, resource: &Resource, name: &str) -> Result<()> {
        let attached = match self.docker.inspect(name)? {
            Some(inspect) => connected_networks(&inspect),
            None => bail!("image cache container {name} is not running"),
        };

        for dep in &resource.meta.depends_on {
            let network = runtime_name_for_id(dep)?;
            if !attached.contains(&network) {
                log::debug!("attaching image cache to {network}");
                self.docker
                    .run_checked(["network", "connect", network.as_str(), name])?;
            }
        }
        Ok(())
    }
}

impl Provider for ImageCacheProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::ImageCache(spec) = resource.spec.clone() else {
            bail!("resource {} is not an image cache", resource.id());
        };

        let name = runtime_name(resource);
        remove_container(&self.docker, &name)?;

        let id = self
            .docker
            .run_checked(cache_run_args(&name, &spec))?
            .trim()
            .to_string();

        self.connect_networks(resource, &name)?;

        resource.set_property("container_id", id);
        resource.set_property("container_name", name);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource) -> Result<()> {
        remove_container(&self.docker, &runtime_name(resource))
    }

    fn refresh(&self, resource: &mut Resource) -> Result<()> {
        let name = runtime_name(resource);
        self.connect_networks(resource, &name)
    }

    fn changed(&self, resource: &Resource) -> Result<bool> {
        Ok(self.docker.inspect(&runtime_name(resource))?.is_none())
    }
}

/// Provider for a declared private registry.
///
/// Runs a local registry container; folding the registry into the image
/// cache's proxy list is the engine's job.
pub struct RegistryProvider {
    docker: DockerCli,
}

impl RegistryProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }
}

impl Provider for RegistryProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Registry(_) = &resource.spec else {
            bail!("resource {} is not a registry", resource.id());
        };

        let name = runtime_name(resource);
        if !self.docker.exists(&name)? {
            self.docker.run_checked([
                "run",
                "-d",
                "--name",
                name.as_str(),
                "registry:2",
            ])?;
        }

        resource.set_property("container_name", name);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource) -> Result<()> {
        remove_container(&self.docker, &runtime_name(resource))
    }

    fn refresh(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn changed(&self, resource: &Resource) -> Result<bool> {
        Ok(self.docker.inspect(&runtime_name(resource))?.is_none())
    }
}

fn connected_networks(inspect: &Value) -> Vec<String> {
    inspect["NetworkSettings"]["Networks"]
        .as_object()
        .map(|networks| networks.keys().cloned().collect())
        .unwrap_or_default()
}

fn cache_run_args(name: &str, spec: &crate::resource::ImageCacheSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "-v".to_string(),
        format!("{CACHE_VOLUME}:/cache"),
    ];

    if !spec.registries.is_empty() {
        let hostnames: Vec<&str> = spec
            .registries
            .iter()
            .map(|r| r.hostname.as_str())
            .collect();
        args.push("-e".to_string());
        args.push(format!("PROXY_REGISTRIES={}", hostnames.join(",")));

        for registry in &spec.registries {
            if let Some(auth) = &registry.auth {
                args.push("-e".to_string());
                args.push(format!(
                    "AUTH_{}={}:{}",
                    registry.hostname.replace('.', "_").to_uppercase(),
                    auth.username,
                    auth.password
                ));
            }
        }
    }

    args.push(PROXY_IMAGE.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ImageCacheSpec, RegistrySpec};

    #[test]
    fn test_cache_run_args_without_registries() {
        let args = cache_run_args("default.image_cache.berth", &ImageCacheSpec::default());
        assert_eq!(args.last().unwrap(), PROXY_IMAGE);
        assert!(!args.iter().any(|a| a.starts_with("PROXY_REGISTRIES")));
    }

    #[test]
    fn test_cache_run_args_with_registries() {
        let spec = ImageCacheSpec {
            registries: vec![
                RegistrySpec {
                    hostname: "r1.internal".to_string(),
                    auth: None,
                },
                RegistrySpec {
                    hostname: "r2.internal".to_string(),
                    auth: None,
                },
            ],
        };

        let args = cache_run_args("default.image_cache.berth", &spec);
        assert!(args.contains(&"PROXY_REGISTRIES=r1.internal,r2.internal".to_string()));
    }

    #[test]
    fn test_connected_networks() {
        let inspect = serde_json::json!({
            "NetworkSettings": {
                "Networks": { "bridge": {}, "main.network.berth": {} }
            }
        });

        let networks = connected_networks(&inspect);
        assert!(networks.contains(&"main.network.berth".to_string()));
        assert_eq!(networks.len(), 2);
    }
}
