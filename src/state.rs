//! Durable stack state
//!
//! The state file is a single JSON document holding the last-known
//! resource graph. Loading never fails the caller: a missing or corrupt
//! file yields an empty config so an apply can always start from
//! something. Saves go through a temp file in the same directory and an
//! atomic rename, so a crash mid-write leaves the previous state intact.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::Config;

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default state file path (~/.local/state/berth/state.json).
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home
            .join(".local")
            .join("state")
            .join("berth")
            .join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted config. Any I/O or decode problem is degraded
    /// to an empty config with a diagnostic.
    pub fn load(&self) -> Config {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                log::debug!("no state at {}: {}", self.path.display(), err);
                return Config::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!(
                    "state file {} is not valid, starting empty: {}",
                    self.path.display(),
                    err
                );
                Config::new()
            }
        }
    }

    /// Serialize and atomically replace the state file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("state path has no parent directory")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create state directory {}", dir.display()))?;

        let content = serde_json::to_string_pretty(config).context("failed to serialize state")?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(content.as_bytes())
            .context("failed to write state")?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace state file {}", self.path.display()))?;

        log::debug!("saved state to {}", self.path.display());
        Ok(())
    }

    /// Delete the state file. Missing file is not an error.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove state file {}", self.path.display())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{NetworkSpec, Resource, Spec, Status};

    fn store(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.json"))
    }

    #[test]
    fn test_load_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = store(&dir).load();
        assert!(config.is_empty());
    }

    #[test]
    fn test_load_corrupt_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut config = Config::new();
        let mut network = Resource::new("main", Spec::Network(NetworkSpec::default()));
        network.set_status(Status::Created);
        config.append_resource(network).unwrap();

        store.save(&config).unwrap();
        let loaded = store.load();

        assert_eq!(loaded.resource_count(), 1);
        let r = loaded.find_resource("resource.network.main").unwrap();
        assert_eq!(r.status(), Status::Created);
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut config = Config::new();
        config
            .append_resource(Resource::new("a", Spec::Network(NetworkSpec::default())))
            .unwrap();
        store.save(&config).unwrap();

        config.remove_resource("resource.network.a");
        store.save(&config).unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(&Config::new()).unwrap();

        store.remove().unwrap();
        assert!(!store.exists());
        store.remove().unwrap();
    }

    #[test]
    fn test_unknown_state_fields_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        fs::write(
            store.path(),
            r#"{
                "blueprint": { "title": "demo" },
                "resources": [{
                    "resource_id": "resource.network.main",
                    "resource_name": "main",
                    "resource_type": "network",
                    "vendor_hint": "keep-me"
                }]
            }"#,
        )
        .unwrap();

        let config = store.load();
        store.save(&config).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["blueprint"]["title"], "demo");
        assert_eq!(raw["resources"][0]["vendor_hint"], "keep-me");
    }
}
