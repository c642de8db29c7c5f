//! Exec job resource

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A one-shot script, run locally or inside a container image.
///
/// The provider records `pid` and `exit_code` in the resource properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Script body passed to `sh -c`.
    #[serde(default)]
    pub script: String,

    /// When set, the script runs inside a container of this image
    /// instead of on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Seconds before the job is considered hung.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for ExecSpec {
    fn default() -> Self {
        Self {
            script: String::new(),
            image: None,
            working_directory: None,
            env: BTreeMap::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    300
}
