//! Docker CLI backend and the network, container, and sidecar providers
//!
//! All runtime access goes through the `docker` binary so the engine has
//! no daemon socket handling of its own. Runtime object names derive
//! from the resource name and type (`<name>.<type>.berth`) so a stack
//! never collides with unrelated containers on the host.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::process::{Command, Output};

use super::Provider;
use crate::resource::{Resource, Spec};

/// Runtime object name for a resource.
pub fn runtime_name(resource: &Resource) -> String {
    format!("{}.{}.berth", resource.meta.name, resource.type_tag())
}

/// Runtime object name for a resource referenced by id,
/// e.g. `resource.container.db` -> `db.container.berth`.
pub fn runtime_name_for_id(id: &str) -> Result<String> {
    let mut parts = id.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("resource"), Some(type_tag), Some(name)) => {
            Ok(format!("{name}.{type_tag}.berth"))
        }
        _ => bail!("malformed resource id: {id}"),
    }
}

/// Thin wrapper over the `docker` binary.
pub(crate) struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            bin: std::env::var("BERTH_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
        }
    }

    pub fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Command::new(&self.bin)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute {}", self.bin))
    }

    /// Run a command, failing with captured stderr on a non-zero exit.
    pub fn run_checked<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = self.run(args)?;
        if !output.status.success() {
            bail!(
                "docker command failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Inspect a runtime object; `None` if it does not exist.
    pub fn inspect(&self, target: &str) -> Result<Option<Value>> {
        let output = self.run(["inspect", target])?;
        if !output.status.success() {
            return Ok(None);
        }

        let parsed: Value =
            serde_json::from_slice(&output.stdout).context("failed to parse docker inspect")?;
        Ok(parsed.as_array().and_then(|arr| arr.first()).cloned())
    }

    pub fn exists(&self, target: &str) -> Result<bool> {
        Ok(self.inspect(target)?.is_some())
    }
}

/// Bridge network provider.
pub struct NetworkProvider {
    docker: DockerCli,
}

impl NetworkProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }
}

impl Provider for NetworkProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Network(spec) = &resource.spec else {
            bail!("resource {} is not a network", resource.id());
        };

        let name = runtime_name(resource);
        if !self.docker.exists(&name)? {
            self.docker
                .run_checked(network_create_args(&name, &spec.subnet))?;
        }

        let subnet = spec.subnet.clone();
        resource.set_property("subnet", subnet);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource) -> Result<()> {
        let name = runtime_name(resource);
        if !self.docker.exists(&name)? {
            return Ok(());
        }
        self.docker.run_checked(["network", "rm", name.as_str()])?;
        Ok(())
    }

    fn refresh(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn changed(&self, resource: &Resource) -> Result<bool> {
        let Spec::Network(spec) = &resource.spec else {
            bail!("resource {} is not a network", resource.id());
        };

        let Some(inspect) = self.docker.inspect(&runtime_name(resource))? else {
            return Ok(true);
        };

        let live_subnet = inspect["IPAM"]["Config"][0]["Subnet"].as_str().unwrap_or("");
        Ok(live_subnet != spec.subnet)
    }
}

/// Container provider. Containers are recreated rather than mutated.
pub struct ContainerProvider {
    docker: DockerCli,
}

impl ContainerProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }
}

impl Provider for ContainerProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Container(spec) = resource.spec.clone() else {
            bail!("resource {} is not a container", resource.id());
        };

        let name = runtime_name(resource);
        remove_container(&self.docker, &name)?;

        let id = self
            .docker
            .run_checked(container_run_args(&name, &spec)?)?
            .trim()
            .to_string();

        // The first network rides on `docker run`; the rest connect after.
        for attachment in spec.networks.iter().skip(1) {
            let network = runtime_name_for_id(&attachment.id)?;
            self.docker
                .run_checked(["network", "connect", network.as_str(), name.as_str()])?;
        }

        resource.set_property("container_id", id);
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
        let Spec::Container(spec) = &resource.spec else {
            bail!("resource {} is not a container", resource.id());
        };

        let Some(inspect) = self.docker.inspect(&runtime_name(resource))? else {
            return Ok(true);
        };

        let live_image = inspect["Config"]["Image"].as_str().unwrap_or("");
        Ok(live_image != spec.image)
    }
}

/// Sidecar provider: a container sharing the target's network namespace.
pub struct SidecarProvider {
    docker: DockerCli,
}

impl SidecarProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }
}

impl Provider for SidecarProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Sidecar(spec) = resource.spec.clone() else {
            bail!("resource {} is not a sidecar", resource.id());
        };

        let name = runtime_name(resource);
        remove_container(&self.docker, &name)?;

        let id = self
            .docker
            .run_checked(sidecar_run_args(&name, &spec)?)?
            .trim()
            .to_string();

        resource.set_property("container_id", id);
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
        let Spec::Sidecar(spec) = &resource.spec else {
            bail!("resource {} is not a sidecar", resource.id());
        };

        let Some(inspect) = self.docker.inspect(&runtime_name(resource))? else {
            return Ok(true);
        };

        let live_image = inspect["Config"]["Image"].as_str().unwrap_or("");
        Ok(live_image != spec.image)
    }
}

/// Force-remove a container, tolerating its absence.
pub(crate) fn remove_container(docker: &DockerCli, name: &str) -> Result<()> {
    if !docker.exists(name)? {
        return Ok(());
    }
    docker.run_checked(["rm", "-f", name])?;
    Ok(())
}

fn network_create_args(name: &str, subnet: &str) -> Vec<String> {
    let mut args = vec![
        "network".to_string(),
        "create".to_string(),
        "--driver".to_string(),
        "bridge".to_string(),
    ];
    if !subnet.is_empty() {
        args.push("--subnet".to_string());
        args.push(subnet.to_string());
    }
    args.push(name.to_string());
    args
}

fn container_run_args(
    name: &str,
    spec: &crate::resource::ContainerSpec,
) -> Result<Vec<String>> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
    ];

    if spec.privileged {
        args.push("--privileged".to_string());
    }

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}/{}", port.host, port.local, port.protocol));
    }

    for volume in &spec.volumes {
        args.push("-v".to_string());
        let mut mapping = format!("{}:{}", volume.source, volume.destination);
        if volume.read_only {
            mapping.push_str(":ro");
        }
        args.push(mapping);
    }

    if let Some(attachment) = spec.networks.first() {
        args.push("--network".to_string());
        args.push(runtime_name_for_id(&attachment.id)?);
        for alias in &attachment.aliases {
            args.push("--network-alias".to_string());
            args.push(alias.clone());
        }
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    Ok(args)
}

fn sidecar_run_args(name: &str, spec: &crate::resource::SidecarSpec) -> Result<Vec<String>> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network".to_string(),
        format!("container:{}", runtime_name_for_id(&spec.target)?),
    ];

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(format!("{}:{}", volume.source, volume.destination));
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    Ok(args)
}
