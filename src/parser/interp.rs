//! `${...}` interpolation in stack files
//!
//! Two reference forms live inside string values:
//!
//! - `${var.<name>}`: an input variable; resolved at parse time, and an
//!   unknown name is a structural error.
//! - `${resource.<type>.<name>.<field...>}`: another resource's value,
//!   including provider-populated `properties.*`; resolved per resource
//!   just before its walk callback, and adds an implicit dependency
//!   edge.

use std::collections::BTreeMap;
use toml::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Variable(String),
    Resource { id: String, path: Vec<String> },
}

/// Parse every `${...}` token in a string. Tokens that are neither
/// variable nor resource references are left alone.
pub fn find_references(input: &str) -> Vec<(String, Reference)> {
    let mut found = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };

        let inner = &after[..end];
        let token = format!("${{{inner}}}");
        let segments: Vec<&str> = inner.split('.').collect();

        match segments.as_slice() {
            ["var", name] if !name.is_empty() => {
                found.push((token, Reference::Variable(name.to_string())));
            }
            ["resource", type_tag, name, path @ ..] if !path.is_empty() => {
                found.push((
                    token,
                    Reference::Resource {
                        id: format!("resource.{type_tag}.{name}"),
                        path: path.iter().map(|s| s.to_string()).collect(),
                    },
                ));
            }
            _ => {}
        }

        rest = &after[end + 1..];
    }

    found
}

/// Replace `${var.*}` tokens throughout a TOML tree. Unknown variable
/// names are collected into `missing`.
pub fn interpolate_variables(
    value: &mut Value,
    vars: &BTreeMap<String, String>,
    missing: &mut Vec<String>,
) {
    walk_strings(value, &mut |s| {
        let mut out = s.to_string();
        for (token, reference) in find_references(s) {
            if let Reference::Variable(name) = reference {
                match vars.get(&name) {
                    Some(replacement) => out = out.replace(&token, replacement),
                    None => {
                        if !missing.contains(&name) {
                            missing.push(name);
                        }
                    }
                }
            }
        }
        out
    });
}

/// Ids of all resources referenced by `${resource.*}` tokens in a tree.
pub fn collect_resource_refs(value: &Value, ids: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for (_, reference) in find_references(s) {
                if let Reference::Resource { id, .. } = reference {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_resource_refs(item, ids);
            }
        }
        Value::Table(table) => {
            for item in table.values() {
                collect_resource_refs(item, ids);
            }
        }
        _ => {}
    }
}

/// Replace `${resource.*}` tokens using `lookup`; tokens the lookup
/// cannot satisfy are collected into `unresolved` and left in place.
pub fn resolve_resource_refs<F>(value: &mut Value, lookup: &F, unresolved: &mut Vec<String>)
where
    F: Fn(&str, &[String]) -> Option<String>,
{
    walk_strings(value, &mut |s| {
        let mut out = s.to_string();
        for (token, reference) in find_references(s) {
            if let Reference::Resource { id, path } = reference {
                match lookup(&id, &path) {
                    Some(replacement) => out = out.replace(&token, &replacement),
                    None => {
                        if !unresolved.contains(&token) {
                            unresolved.push(token);
                        }
                    }
                }
            }
        }
        out
    });
}

/// Render a JSON scalar for substitution into a string value.
pub fn render_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn walk_strings(value: &mut Value, replace: &mut dyn FnMut(&str) -> String) {
    match value {
        Value::String(s) => {
            let replaced = replace(s);
            if replaced != *s {
                *s = replaced;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_strings(item, replace);
            }
        }
        Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                walk_strings(item, replace);
            }
        }
        _ => {}
    }
}
