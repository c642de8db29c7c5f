//! Kubernetes cluster and Helm release resources

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::container::{NetworkAttachment, Port};

/// A single-node Kubernetes cluster run as a container.
///
/// The provider records `container_name`, `api_port`, and `kubeconfig`
/// in the resource properties once the cluster is up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sClusterSpec {
    /// Node image; defaults to a pinned k3s release.
    #[serde(default = "default_cluster_image")]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,

    /// Extra ports published from the server node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
}

impl Default for K8sClusterSpec {
    fn default() -> Self {
        Self {
            image: default_cluster_image(),
            networks: Vec::new(),
            ports: Vec::new(),
        }
    }
}

fn default_cluster_image() -> String {
    "rancher/k3s:v1.29.4-k3s1".to_string()
}

/// A Helm release installed into a declared cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelmSpec {
    /// Resource id of the target cluster, e.g. `resource.k8s_cluster.dev`.
    #[serde(default)]
    pub cluster: String,

    /// Chart reference: repo/chart, local path, or OCI url.
    #[serde(default)]
    pub chart: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Values passed as `--set key=value`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}
