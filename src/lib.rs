//! # berth
//!
//! A declarative orchestrator for local development stacks.
//!
//! Users describe a stack of resources (networks, containers, sidecars,
//! an image cache, registries, Kubernetes clusters, Helm releases, exec
//! jobs) in TOML stack files; the engine materializes that stack on the
//! host's container runtime and persists a durable state so subsequent
//! invocations reconcile toward the declared desired state.
//!
//! ## Core Concepts
//!
//! - **Resource**: a declaratively defined unit of infrastructure with a
//!   stable id and a lifecycle status ([`resource`])
//! - **Config**: the ordered set of resources forming a stack ([`config`])
//! - **Provider**: the per-type lifecycle handler implementing
//!   create/destroy/refresh/changed ([`provider`])
//! - **Engine**: parses stacks, diffs them against persisted state, and
//!   drives providers in dependency order ([`engine`])
//!
//! ## Example
//!
//! ```ignore
//! use berth::engine::Engine;
//! use berth::registry::Registry;
//! use berth::state::StateStore;
//!
//! let registry = Registry::with_builtin_types();
//! let store = StateStore::new(StateStore::default_path()?);
//! let mut engine = Engine::new(registry, store);
//!
//! engine.apply("./stack")?;
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod parser;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod state;
