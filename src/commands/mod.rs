//! CLI command implementations

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::engine::Engine;
use crate::parser::Variables;
use crate::registry::Registry;
use crate::state::StateStore;

pub mod down;
pub mod plan;
pub mod status;
pub mod up;
pub mod validate;

/// Engine wired with the built-in providers and the default state path.
pub(crate) fn build_engine() -> Result<Engine> {
    let registry = Registry::with_builtin_types();
    let store = StateStore::new(state_path()?);
    Ok(Engine::new(registry, store))
}

pub(crate) fn state_path() -> Result<PathBuf> {
    match std::env::var_os("BERTH_STATE_PATH") {
        Some(path) => Ok(PathBuf::from(path)),
        None => StateStore::default_path(),
    }
}

/// Parse repeated `--var key=value` flags.
pub(crate) fn parse_vars(pairs: &[String]) -> Result<Variables> {
    let mut vars = Variables::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --var '{pair}', expected KEY=VALUE");
        };
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

pub(crate) fn absolute(path: &std::path::Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("stack path {} does not exist", path.display()))
}
