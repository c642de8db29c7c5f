//! Bridge network resource

use serde::{Deserialize, Serialize};

/// A bridge network on the container runtime.
///
/// Every network a stack declares is also attached to the image cache so
/// containers on it resolve pulls through the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// CIDR of the network, e.g. `10.5.0.0/16`.
    #[serde(default)]
    pub subnet: String,
}
