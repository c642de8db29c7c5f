//! Kubernetes cluster and Helm release providers
//!
//! A cluster is a single k3s server container. The kubeconfig is copied
//! out of the container once the API server answers and rewritten to
//! point at the published host port; Helm releases shell out to the
//! `helm` binary against that kubeconfig.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use super::docker::{remove_container, runtime_name, runtime_name_for_id, DockerCli};
use super::Provider;
use crate::resource::{Resource, Spec};

const KUBECONFIG_WAIT: Duration = Duration::from_secs(60);

/// Host path where a cluster's kubeconfig is written.
pub fn kubeconfig_path(cluster_name: &str) -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home
        .join(".local")
        .join("state")
        .join("berth")
        .join("kube")
        .join(format!("{cluster_name}.yaml")))
}

pub struct ClusterProvider {
    docker: DockerCli,
}

impl ClusterProvider {
    pub fn new() -> Self {
        Self {
            docker: DockerCli::new(),
        }
    }

    /// Poll the container for a kubeconfig until the API server has
    /// written one or the wait window runs out.
    fn fetch_kubeconfig(&self, container: &str, api_port: &str) -> Result<String> {
        let started = Instant::now();
        loop {
            let output = self.docker.run([
                "exec",
                container,
                "cat",
                "/etc/rancher/k3s/k3s.yaml",
            ])?;

            if output.status.success() {
                let config = String::from_utf8_lossy(&output.stdout)
                    .replace("127.0.0.1:6443", &format!("127.0.0.1:{api_port}"));
                return Ok(config);
            }

            if started.elapsed() > KUBECONFIG_WAIT {
                bail!("timed out waiting for kubeconfig in {container}");
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}

impl Provider for ClusterProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::K8sCluster(spec) = resource.spec.clone() else {
            bail!("resource {} is not a k8s cluster", resource.id());
        };

        let name = runtime_name(resource);
        remove_container(&self.docker, &name)?;

        self.docker.run_checked(cluster_run_args(&name, &spec)?)?;

        // The API port is runtime-assigned; read it back.
        let inspect = self
            .docker
            .inspect(&name)?
            .context("cluster container vanished after start")?;
        let api_port = inspect["NetworkSettings"]["Ports"]["6443/tcp"][0]["HostPort"]
            .as_str()
            .unwrap_or("6443")
            .to_string();

        let kubeconfig = self.fetch_kubeconfig(&name, &api_port)?;
        let path = kubeconfig_path(&resource.meta.name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, kubeconfig)
            .with_context(|| format!("failed to write kubeconfig {}", path.display()))?;

        resource.set_property("container_name", name);
        resource.set_property("api_port", api_port);
        resource.set_property("kubeconfig", path.to_string_lossy().to_string());
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource) -> Result<()> {
        remove_container(&self.docker, &runtime_name(resource))?;

        if let Ok(path) = kubeconfig_path(&resource.meta.name) {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("could not remove kubeconfig {}: {}", path.display(), err);
                }
            }
        }
        Ok(())
    }

    fn refresh(&self, _resource: &mut Resource) -> Result<()> {
        Ok(())
    }

    fn changed(&self, resource: &Resource) -> Result<bool> {
        let Spec::K8sCluster(spec) = &resource.spec else {
            bail!("resource {} is not a k8s cluster", resource.id());
        };

        let Some(inspect) = self.docker.inspect(&runtime_name(resource))? else {
            return Ok(true);
        };

        let live_image = inspect["Config"]["Image"].as_str().unwrap_or("");
        Ok(live_image != spec.image)
    }
}

pub struct HelmProvider {
    helm_bin: String,
}

impl HelmProvider {
    pub fn new() -> Self {
        Self {
            helm_bin: std::env::var("BERTH_HELM_BIN").unwrap_or_else(|_| "helm".to_string()),
        }
    }

    fn run_helm(&self, args: &[String]) -> Result<String> {
        let output = Command::new(&self.helm_bin)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute {}", self.helm_bin))?;

        if !output.status.success() {
            bail!(
                "helm command failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Provider for HelmProvider {
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Helm(spec) = resource.spec.clone() else {
            bail!("resource {} is not a helm release", resource.id());
        };

        let args = helm_install_args(&resource.meta.name, &spec)?;
        self.run_helm(&args)?;

        let release = resource.meta.name.clone();
        resource.set_property("release", release);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource) -> Result<()> {
        let Spec::Helm(spec) = &resource.spec else {
            bail!("resource {} is not a helm release", resource.id());
        };

        let cluster_name = cluster_name_from_id(&spec.cluster)?;
        let kubeconfig = kubeconfig_path(&cluster_name)?;

        // The cluster may already be gone; nothing left to uninstall.
        if !kubeconfig.exists() {
            return Ok(());
        }

        let mut args = vec![
            "uninstall".to_string(),
            resource.meta.name.clone(),
            "--kubeconfig".to_string(),
            kubeconfig.to_string_lossy().to_string(),
        ];
        if let Some(namespace) = &spec.namespace {
            args.push("--namespace".to_string());
            args.push(namespace.clone());
        }

        match self.run_helm(&args) {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("not found") => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn refresh(&self, resource: &mut Resource) -> Result<()> {
        // upgrade --install is idempotent; re-running converges values.
        self.create(resource)
    }

    fn changed(&self, _resource: &Resource) -> Result<bool> {
        Ok(false)
    }
}

fn cluster_name_from_id(id: &str) -> Result<String> {
    let mut parts = id.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("resource"), Some("k8s_cluster"), Some(name)) => Ok(name.to_string()),
        _ => bail!("helm release references a non-cluster id: {id}"),
    }
}

fn cluster_run_args(
    name: &str,
    spec: &crate::resource::K8sClusterSpec,
) -> Result<Vec<String>> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--privileged".to_string(),
        "-p".to_string(),
        "0:6443".to_string(),
    ];

    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}/{}", port.host, port.local, port.protocol));
    }

    if let Some(attachment) = spec.networks.first() {
        args.push("--network".to_string());
        args.push(runtime_name_for_id(&attachment.id)?);
    }

    args.push(spec.image.clone());
    args.push("server".to_string());
    Ok(args)
}

fn helm_install_args(release: &str, spec: &crate::resource::HelmSpec) -> Result<Vec<String>> {
    let cluster_name = cluster_name_from_id(&spec.cluster)?;
    let kubeconfig = kubeconfig_path(&cluster_name)?;

    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.to_string(),
        spec.chart.clone(),
        "--kubeconfig".to_string(),
        kubeconfig.to_string_lossy().to_string(),
        "--wait".to_string(),
    ];

    if let Some(namespace) = &spec.namespace {
        args.push("--namespace".to_string());
        args.push(namespace.clone());
        args.push("--create-namespace".to_string());
    }

    for (key, value) in &spec.values {
        args.push("--set".to_string());
        args.push(format!("{key}={value}"));
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{HelmSpec, K8sClusterSpec};

    #[test]
    fn test_cluster_run_args_publish_api_port() {
        let args = cluster_run_args("dev.k8s_cluster.berth", &K8sClusterSpec::default()).unwrap();
        assert!(args.contains(&"0:6443".to_string()));
        assert_eq!(args.last().unwrap(), "server");
    }

    #[test]
    fn test_cluster_name_from_id() {
        assert_eq!(
            cluster_name_from_id("resource.k8s_cluster.dev").unwrap(),
            "dev"
        );
        assert!(cluster_name_from_id("resource.container.dev").is_err());
    }

    #[test]
    fn test_helm_install_args() {
        let spec = HelmSpec {
            cluster: "resource.k8s_cluster.dev".to_string(),
            chart: "bitnami/redis".to_string(),
            namespace: Some("cache".to_string()),
            values: [("replica.replicaCount".to_string(), "2".to_string())]
                .into_iter()
                .collect(),
        };

        let args = helm_install_args("redis", &spec).unwrap();
        assert_eq!(args[0], "upgrade");
        assert!(args.contains(&"--create-namespace".to_string()));
        assert!(args.contains(&"replica.replicaCount=2".to_string()));
    }
}
