//! Resource model for declarative stacks
//!
//! Every unit of infrastructure berth manages is a [`Resource`]: shared
//! metadata (stable id, dependency edges, checksum, lifecycle status)
//! plus a typed body for the concrete kind. Resources serialize to the
//! flat JSON shape used by the state file, with unknown fields preserved
//! so newer state files survive older binaries.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub mod cache;
pub mod container;
pub mod exec;
pub mod k8s;
pub mod network;

pub use cache::{ImageCacheSpec, RegistryAuth, RegistrySpec};
pub use container::{ContainerSpec, NetworkAttachment, Port, SidecarSpec, Volume};
pub use exec::ExecSpec;
pub use k8s::{HelmSpec, K8sClusterSpec};
pub use network::NetworkSpec;

pub const TYPE_NETWORK: &str = "network";
pub const TYPE_CONTAINER: &str = "container";
pub const TYPE_SIDECAR: &str = "sidecar";
pub const TYPE_IMAGE_CACHE: &str = "image_cache";
pub const TYPE_REGISTRY: &str = "registry";
pub const TYPE_K8S_CLUSTER: &str = "k8s_cluster";
pub const TYPE_HELM: &str = "helm";
pub const TYPE_EXEC: &str = "exec";
pub const TYPE_MODULE: &str = "module";
pub const TYPE_VARIABLE: &str = "variable";

/// Reserved id of the singleton image cache synthesized by the engine.
pub const IMAGE_CACHE_ID: &str = "resource.image_cache.default";

/// Key under `properties` holding the lifecycle status.
pub const PROPERTY_STATUS: &str = "status";

/// Lifecycle status of a resource, persisted verbatim in
/// `properties.status`. A missing status reads as [`Status::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Created,
    Failed,
    Tainted,
    Disabled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Created => "created",
            Status::Failed => "failed",
            Status::Tainted => "tainted",
            Status::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "created" => Ok(Status::Created),
            "failed" => Ok(Status::Failed),
            "tainted" => Ok(Status::Tainted),
            "disabled" => Ok(Status::Disabled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Change-detection checksums for a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Stable hash of the resource's declared source text.
    #[serde(default)]
    pub parsed: String,
}

/// Metadata shared by every resource kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Globally unique id, `resource.<type>.<name>`.
    #[serde(rename = "resource_id")]
    pub id: String,

    /// Human name, unique within the type.
    #[serde(rename = "resource_name")]
    pub name: String,

    /// Disabled resources are kept in state but never created.
    #[serde(default)]
    pub disabled: bool,

    /// Ids of resources this one depends on; edges of the DAG.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub checksum: Checksum,

    /// Provider-populated outputs plus the lifecycle `status`.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Typed body of a resource, discriminated by the `resource_type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resource_type", rename_all = "snake_case")]
pub enum Spec {
    Network(NetworkSpec),
    Container(ContainerSpec),
    Sidecar(SidecarSpec),
    ImageCache(ImageCacheSpec),
    Registry(RegistrySpec),
    K8sCluster(K8sClusterSpec),
    Helm(HelmSpec),
    Exec(ExecSpec),
    Module(ModuleSpec),
    Variable(VariableSpec),
}

impl Spec {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Spec::Network(_) => TYPE_NETWORK,
            Spec::Container(_) => TYPE_CONTAINER,
            Spec::Sidecar(_) => TYPE_SIDECAR,
            Spec::ImageCache(_) => TYPE_IMAGE_CACHE,
            Spec::Registry(_) => TYPE_REGISTRY,
            Spec::K8sCluster(_) => TYPE_K8S_CLUSTER,
            Spec::Helm(_) => TYPE_HELM,
            Spec::Exec(_) => TYPE_EXEC,
            Spec::Module(_) => TYPE_MODULE,
            Spec::Variable(_) => TYPE_VARIABLE,
        }
    }
}

/// A module pulls another stack directory into this one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub source: String,
}

/// An input variable with an optional default, overridable per apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(default)]
    pub default: Option<Value>,
}

/// A declaratively defined unit of infrastructure.
#[derive(Debug, Clone)]
pub struct Resource {
    pub meta: Metadata,
    pub spec: Spec,
    /// Fields not modeled by this version; round-tripped verbatim.
    pub extra: Map<String, Value>,
}

impl Resource {
    /// Build a resource with the id derived from its type and name.
    pub fn new(name: impl Into<String>, spec: Spec) -> Self {
        let name = name.into();
        let id = format!("resource.{}.{}", spec.type_tag(), name);
        Resource {
            meta: Metadata {
                id,
                name,
                ..Metadata::default()
            },
            spec,
            extra: Map::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn type_tag(&self) -> &'static str {
        self.spec.type_tag()
    }

    /// Current lifecycle status; missing status reads as pending.
    pub fn status(&self) -> Status {
        self.meta
            .properties
            .get(PROPERTY_STATUS)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Status::Pending)
    }

    pub fn set_status(&mut self, status: Status) {
        self.meta.properties.insert(
            PROPERTY_STATUS.to_string(),
            Value::String(status.to_string()),
        );
    }

    /// Read a provider-populated output property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.meta.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.properties.insert(key.into(), value.into());
    }

    /// Add a dependency edge if not already present.
    pub fn add_dependency(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.meta.depends_on.contains(&id) {
            self.meta.depends_on.push(id);
        }
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;

        let mut map = as_object(&self.meta).map_err(S::Error::custom)?;
        let spec = as_object(&self.spec).map_err(S::Error::custom)?;
        map.extend(spec);
        for (key, value) in &self.extra {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::deserialize(deserializer)?;

        let meta: Metadata =
            serde_json::from_value(Value::Object(fields.clone())).map_err(D::Error::custom)?;
        let spec: Spec =
            serde_json::from_value(Value::Object(fields.clone())).map_err(D::Error::custom)?;

        // Keys neither the metadata nor the typed body claims are preserved.
        let mut extra = fields;
        for key in [
            "resource_id",
            "resource_name",
            "disabled",
            "depends_on",
            "checksum",
            "properties",
        ] {
            extra.remove(key);
        }
        for key in as_object(&spec).map_err(D::Error::custom)?.keys() {
            extra.remove(key);
        }

        Ok(Resource { meta, spec, extra })
    }
}

fn as_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, String> {
    match serde_json::to_value(value).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected an object, got {other}")),
    }
}
