//! Dependency graph and topological ordering
//!
//! Creation walks dependencies first; destruction walks the exact
//! reverse. Ordering is stable: among ready nodes, declaration order
//! wins, so unrelated resources apply in the order the user wrote them.

use std::collections::{HashMap, HashSet};

/// A DAG over resource ids. Edges point from a resource to the ids it
/// depends on; edges to unknown nodes are ignored (the target is not
/// part of this walk).
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<String>,
    deps: HashMap<String, Vec<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.nodes.contains(&id) {
            self.deps.entry(id.clone()).or_default();
            self.nodes.push(id);
        }
    }

    /// Record that `id` depends on `dep`.
    pub fn add_dependency(&mut self, id: &str, dep: impl Into<String>) {
        let dep = dep.into();
        let entry = self.deps.entry(id.to_string()).or_default();
        if !entry.contains(&dep) {
            entry.push(dep);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n == id)
    }

    /// Ids in creation order (every dependency before its dependents).
    /// Returns the id of a node on a cycle if one exists.
    pub fn creation_order(&self) -> Result<Vec<String>, String> {
        let node_set: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        while order.len() < self.nodes.len() {
            let next = self.nodes.iter().find(|id| {
                !placed.contains(id.as_str())
                    && self.deps[id.as_str()].iter().all(|dep| {
                        // deps outside the graph do not gate this walk
                        !node_set.contains(dep.as_str()) || placed.contains(dep.as_str())
                    })
            });

            match next {
                Some(id) => {
                    placed.insert(id);
                    order.push(id.clone());
                }
                None => {
                    let stuck = self
                        .nodes
                        .iter()
                        .find(|id| !placed.contains(id.as_str()))
                        .cloned()
                        .unwrap_or_default();
                    return Err(stuck);
                }
            }
        }

        Ok(order)
    }

    /// Ids in destruction order: a resource goes down only after
    /// everything that depends on it has.
    pub fn destruction_order(&self) -> Result<Vec<String>, String> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Direct dependencies of a node within this graph.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> Graph {
        let mut g = Graph::new();
        for (id, _) in edges {
            g.add_node(*id);
        }
        for (id, deps) in edges {
            for dep in *deps {
                g.add_dependency(id, *dep);
            }
        }
        g
    }

    #[test]
    fn test_creation_order_puts_dependencies_first() {
        let g = graph(&[("c", &["a"]), ("a", &[]), ("b", &["a", "c"])]);
        let order = g.creation_order().unwrap();
        assert_eq!(order, ["a", "c", "b"]);
    }

    #[test]
    fn test_declaration_order_is_stable_for_unrelated_nodes() {
        let g = graph(&[("z", &[]), ("m", &[]), ("a", &[])]);
        assert_eq!(g.creation_order().unwrap(), ["z", "m", "a"]);
    }

    #[test]
    fn test_destruction_order_is_reverse() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert_eq!(g.destruction_order().unwrap(), ["c", "b", "a"]);
    }

    #[test]
    fn test_cycle_is_detected() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(g.creation_order().is_err());
    }

    #[test]
    fn test_unknown_dependencies_do_not_gate() {
        let g = graph(&[("a", &["resource.network.gone"])]);
        assert_eq!(g.creation_order().unwrap(), ["a"]);
    }
}
