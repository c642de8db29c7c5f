//! Image cache and registry resources

use serde::{Deserialize, Serialize};

/// The pull-through image cache.
///
/// A singleton synthesized by the engine on first apply with id
/// `resource.image_cache.default`; its `depends_on` set accumulates every
/// network that reaches `created` so the cache container joins them all
/// and is torn down last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageCacheSpec {
    /// Upstream registries the cache proxies, beyond the public default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistrySpec>,
}

/// A private upstream registry.
///
/// Declared registries are folded into the image cache's registry list;
/// the cache is restarted to pick them up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySpec {
    /// Registry hostname, e.g. `registry.example.internal`.
    #[serde(default)]
    pub hostname: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuth>,
}

/// Credentials for a private registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}
