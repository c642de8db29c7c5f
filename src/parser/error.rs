//! Parse error types
//!
//! Errors are split into two phases. *Structural* errors (bad TOML,
//! unknown types, duplicate ids, cycles) mean the stack cannot be
//! trusted and abort before any side effect. *Process-phase* errors
//! (references to outputs providers have not populated yet) are
//! expected during a preview and only fail an apply after state has
//! been persisted.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{path}: invalid TOML: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("{path}: unknown resource type '{type_tag}'")]
    UnknownType { path: PathBuf, type_tag: String },

    #[error("{path}: malformed table '{table}': {message}")]
    MalformedTable {
        path: PathBuf,
        table: String,
        message: String,
    },

    #[error("invalid resource name '{name}': {message}")]
    InvalidName { name: String, message: String },

    #[error("duplicate resource id {id}")]
    DuplicateResource { id: String },

    #[error("unknown variable '{name}' referenced by {id}")]
    UnknownVariable { name: String, id: String },

    #[error("{id}: depends_on references unknown resource {dependency}")]
    MissingDependency { id: String, dependency: String },

    #[error("dependency cycle involving {id}")]
    Cycle { id: String },

    #[error("module {id}: {message}")]
    Module { id: String, message: String },

    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("{id}: invalid resource body: {message}")]
    Body { id: String, message: String },

    /// Process-phase: the referenced output does not exist yet. The
    /// usual cause is a preview run before providers have populated
    /// properties.
    #[error("unresolved reference '{reference}' in {id}")]
    UnresolvedReference { id: String, reference: String },
}

impl ParseError {
    pub fn is_structural(&self) -> bool {
        !matches!(self, ParseError::UnresolvedReference { .. })
    }
}

/// Accumulated errors from a parse or walk.
#[derive(Debug, Default)]
pub struct ParseErrors {
    pub errors: Vec<ParseError>,
}

impl ParseErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ParseError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any contained error makes the parsed stack unusable.
    pub fn contains_structural(&self) -> bool {
        self.errors.iter().any(ParseError::is_structural)
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no parse errors");
        }
        let joined: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", joined.join("; "))
    }
}

impl std::error::Error for ParseErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        let structural = ParseError::DuplicateResource {
            id: "resource.network.a".to_string(),
        };
        assert!(structural.is_structural());

        let process = ParseError::UnresolvedReference {
            id: "resource.container.c".to_string(),
            reference: "${resource.container.db.properties.status}".to_string(),
        };
        assert!(!process.is_structural());
    }

    #[test]
    fn test_contains_structural() {
        let mut errors = ParseErrors::new();
        assert!(!errors.contains_structural());

        errors.push(ParseError::UnresolvedReference {
            id: "resource.container.c".to_string(),
            reference: "${resource.x.y.z}".to_string(),
        });
        assert!(!errors.contains_structural());

        errors.push(ParseError::Cycle {
            id: "resource.network.a".to_string(),
        });
        assert!(errors.contains_structural());
    }
}
