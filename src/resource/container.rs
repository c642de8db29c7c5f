//! Container and sidecar resources

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A container to run on the host runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference, e.g. `postgres:15`.
    #[serde(default)]
    pub image: String,

    /// Entrypoint override; empty means the image default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Networks to attach, referenced by resource id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
}

/// A sidecar shares the network namespace of a target container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarSpec {
    /// Resource id of the container to attach to.
    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// A port published from a container to the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Port {
    /// Port inside the container.
    pub local: u16,

    /// Port on the host.
    pub host: u16,

    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// A bind mount from the host into a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    pub source: String,
    pub destination: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// Attachment of a container to a declared network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Resource id of the network, e.g. `resource.network.main`.
    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    /// Address assigned by the runtime; populated by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_address: Option<String>,
}
