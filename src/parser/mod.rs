//! Stack file parsing and the walk that drives reconciliation
//!
//! Stack files are TOML: every top-level table is `<type>.<name>` and
//! becomes a resource with id `resource.<type>.<name>`. [`parse`] turns
//! a file or directory into a [`Config`] without side effects; [`walk`]
//! additionally invokes a per-resource callback in dependency order,
//! which is how the engine applies providers. Disabled resources,
//! modules, and variables never reach the callback; they are reported
//! separately so the engine can record them in state.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::registry::Registry;
use crate::resource::{Resource, TYPE_MODULE, TYPE_VARIABLE};

pub mod dag;
pub mod error;
pub mod interp;

pub use error::{ParseError, ParseErrors};

use dag::Graph;

/// Variables supplied on the command line.
pub type Variables = HashMap<String, String>;

/// Result of a side-effect-free parse.
#[derive(Debug)]
pub struct Parsed {
    pub config: Config,
    /// Process-phase errors (unresolved references). Harmless during a
    /// preview; an apply surfaces them after persisting state.
    pub warnings: ParseErrors,
}

/// Result of a walk over the stack.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Disabled resources, never given to the callback.
    pub disabled: Vec<Resource>,
    /// Modules and variables, never given to the callback.
    pub pseudo: Vec<Resource>,
    /// Ids skipped because a dependency failed or was skipped.
    pub skipped: Vec<String>,
    /// Process-phase errors collected along the way.
    pub errors: ParseErrors,
    /// First error returned by the callback, if any.
    pub callback_error: Option<anyhow::Error>,
}

/// Parse a stack without side effects.
///
/// Structural problems (bad TOML, unknown types, duplicate ids, bad
/// dependency edges) are returned as `Err`; unresolved references are
/// reported in [`Parsed::warnings`].
pub fn parse(
    registry: &Registry,
    path: &Path,
    vars: &Variables,
    vars_file: Option<&Path>,
) -> Result<Parsed, ParseErrors> {
    let (raws, mut errors) = load(registry, path, vars, vars_file);
    if errors.contains_structural() {
        return Err(errors);
    }

    let mut config = Config::new();
    for raw in &raws {
        let mut raw = raw.clone();
        let mut unresolved = Vec::new();
        {
            let lookup = static_lookup(&raws);
            resolve_body(&mut raw, &lookup, &mut unresolved);
        }
        for token in unresolved {
            errors.push(ParseError::UnresolvedReference {
                id: raw.id.clone(),
                reference: token,
            });
        }

        if let Some(resource) = build_resource(&raw, &mut errors) {
            // Ids were already checked for uniqueness.
            let _ = config.append_resource(resource);
        }
    }

    if errors.contains_structural() {
        return Err(errors);
    }
    Ok(Parsed {
        config,
        warnings: errors,
    })
}

/// Parse a stack and invoke `callback` once per enabled, provider-backed
/// resource, dependencies first. The callback owns the resource's state
/// transition; an error from it fails that resource and skips its
/// dependents while the rest of the graph continues.
pub fn walk(
    registry: &Registry,
    path: &Path,
    vars: &Variables,
    vars_file: Option<&Path>,
    callback: &mut dyn FnMut(&mut Resource) -> Result<()>,
) -> Result<WalkReport, ParseErrors> {
    let (raws, mut errors) = load(registry, path, vars, vars_file);
    if errors.contains_structural() {
        return Err(errors);
    }

    let walkable: Vec<&RawResource> = raws.iter().filter(|r| r.is_walkable()).collect();

    let mut graph = Graph::new();
    for raw in &walkable {
        graph.add_node(raw.id.as_str());
    }
    for raw in &walkable {
        for dep in &raw.depends_on {
            if graph.contains(dep) {
                graph.add_dependency(&raw.id, dep.as_str());
            }
        }
    }

    let order = match graph.creation_order() {
        Ok(order) => order,
        Err(id) => {
            errors.push(ParseError::Cycle { id });
            return Err(errors);
        }
    };

    let raw_by_id: HashMap<&str, &RawResource> =
        walkable.iter().map(|r| (r.id.as_str(), *r)).collect();

    let mut report = WalkReport::default();
    let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();
    let mut blocked: HashSet<String> = HashSet::new();

    for id in &order {
        let raw = raw_by_id[id.as_str()];

        if raw.depends_on.iter().any(|dep| blocked.contains(dep)) {
            log::debug!("skipping {id}: a dependency failed");
            blocked.insert(id.clone());
            report.skipped.push(id.clone());
            continue;
        }

        let mut raw = raw.clone();
        let mut unresolved = Vec::new();
        {
            let statics = static_lookup(&raws);
            let lookup = |id: &str, path: &[String]| -> Option<String> {
                if let Some(output) = outputs.get(id) {
                    let mut value = output;
                    for segment in path {
                        value = value.get(segment)?;
                    }
                    return interp::render_scalar(value);
                }
                statics(id, path)
            };
            resolve_body(&mut raw, &lookup, &mut unresolved);
        }

        if !unresolved.is_empty() {
            for token in unresolved {
                errors.push(ParseError::UnresolvedReference {
                    id: raw.id.clone(),
                    reference: token,
                });
            }
            blocked.insert(id.clone());
            report.skipped.push(id.clone());
            continue;
        }

        let Some(mut resource) = build_resource(&raw, &mut errors) else {
            blocked.insert(id.clone());
            report.skipped.push(id.clone());
            continue;
        };

        if let Err(err) = callback(&mut resource) {
            blocked.insert(id.clone());
            if report.callback_error.is_none() {
                report.callback_error = Some(err);
            }
        }

        // Later resources may reference this one's populated outputs.
        if let Ok(value) = serde_json::to_value(&resource) {
            outputs.insert(id.clone(), value);
        }
    }

    for raw in &raws {
        if raw.disabled && !raw.is_pseudo() {
            let mut raw = raw.clone();
            // Disabled resources keep unresolved tokens verbatim.
            let mut ignored = Vec::new();
            {
                let statics = static_lookup(&raws);
                resolve_body(&mut raw, &statics, &mut ignored);
            }
            if let Some(resource) = build_resource(&raw, &mut errors) {
                report.disabled.push(resource);
            }
        } else if raw.is_pseudo() {
            if let Some(resource) = build_resource(&raw, &mut errors) {
                report.pseudo.push(resource);
            }
        }
    }

    report.errors = errors;
    Ok(report)
}

#[derive(Debug, Clone)]
struct RawResource {
    id: String,
    name: String,
    type_tag: String,
    disabled: bool,
    depends_on: Vec<String>,
    checksum: String,
    body: toml::value::Table,
    file: PathBuf,
}

impl RawResource {
    fn is_pseudo(&self) -> bool {
        self.type_tag == TYPE_MODULE || self.type_tag == TYPE_VARIABLE
    }

    fn is_walkable(&self) -> bool {
        !self.disabled && !self.is_pseudo()
    }
}

/// Read the stack at `path`, apply variable interpolation, and validate
/// everything that can be validated statically.
fn load(
    registry: &Registry,
    path: &Path,
    vars: &Variables,
    vars_file: Option<&Path>,
) -> (Vec<RawResource>, ParseErrors) {
    let mut errors = ParseErrors::new();
    let mut visited = HashSet::new();
    let mut raws = load_dir(registry, path, &mut errors, &mut visited);

    // Duplicate ids across the whole stack, modules included.
    let mut seen = HashSet::new();
    for raw in &raws {
        if !seen.insert(raw.id.clone()) {
            errors.push(ParseError::DuplicateResource { id: raw.id.clone() });
        }
    }

    let variables = collect_variables(&raws, vars, vars_file, &mut errors);
    for raw in &mut raws {
        if raw.type_tag == TYPE_VARIABLE {
            continue;
        }
        let mut missing = Vec::new();
        let mut value = toml::Value::Table(std::mem::take(&mut raw.body));
        interp::interpolate_variables(&mut value, &variables, &mut missing);
        raw.body = match value {
            toml::Value::Table(table) => table,
            _ => unreachable!("interpolation preserves the value shape"),
        };
        for name in missing {
            errors.push(ParseError::UnknownVariable {
                name,
                id: raw.id.clone(),
            });
        }
    }

    // References imply dependency edges.
    for raw in &mut raws {
        let mut referenced = Vec::new();
        interp::collect_resource_refs(&toml::Value::Table(raw.body.clone()), &mut referenced);
        for id in referenced {
            if id != raw.id && !raw.depends_on.contains(&id) {
                raw.depends_on.push(id);
            }
        }
    }

    let ids: HashSet<&str> = raws.iter().map(|r| r.id.as_str()).collect();
    for raw in &raws {
        for dep in &raw.depends_on {
            if !ids.contains(dep.as_str()) {
                errors.push(ParseError::MissingDependency {
                    id: raw.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    (raws, errors)
}

fn load_dir(
    registry: &Registry,
    path: &Path,
    errors: &mut ParseErrors,
    visited: &mut HashSet<PathBuf>,
) -> Vec<RawResource> {
    let mut raws = Vec::new();

    for file in stack_files(path, errors) {
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(err) => {
                errors.push(ParseError::Io {
                    path: file,
                    message: err.to_string(),
                });
                continue;
            }
        };

        let table: toml::value::Table = match toml::from_str(&content) {
            Ok(table) => table,
            Err(err) => {
                errors.push(ParseError::Syntax {
                    path: file,
                    message: err.to_string(),
                });
                continue;
            }
        };

        for (type_tag, group) in table {
            let known = registry.is_registered(&type_tag)
                || type_tag == TYPE_MODULE
                || type_tag == TYPE_VARIABLE;
            if !known {
                errors.push(ParseError::UnknownType {
                    path: file.clone(),
                    type_tag,
                });
                continue;
            }

            let Some(group) = group.as_table() else {
                errors.push(ParseError::MalformedTable {
                    path: file.clone(),
                    table: type_tag,
                    message: "expected a table of named resources".to_string(),
                });
                continue;
            };

            for (name, body) in group {
                let Some(body) = body.as_table() else {
                    errors.push(ParseError::MalformedTable {
                        path: file.clone(),
                        table: format!("{type_tag}.{name}"),
                        message: "expected a resource table".to_string(),
                    });
                    continue;
                };

                if let Err(message) = validate_name(name) {
                    errors.push(ParseError::InvalidName {
                        name: name.clone(),
                        message,
                    });
                    continue;
                }

                let raw = match raw_resource(&type_tag, name, body, &file, errors) {
                    Some(raw) => raw,
                    None => continue,
                };

                if raw.type_tag == TYPE_MODULE && !raw.disabled {
                    raws.extend(load_module(registry, &raw, errors, visited));
                }
                raws.push(raw);
            }
        }
    }

    raws
}

fn raw_resource(
    type_tag: &str,
    name: &str,
    body: &toml::value::Table,
    file: &Path,
    errors: &mut ParseErrors,
) -> Option<RawResource> {
    let id = format!("resource.{type_tag}.{name}");

    let disabled = body
        .get("disabled")
        .and_then(toml::Value::as_bool)
        .unwrap_or(false);

    let mut depends_on = Vec::new();
    if let Some(deps) = body.get("depends_on") {
        let Some(deps) = deps.as_array() else {
            errors.push(ParseError::MalformedTable {
                path: file.to_path_buf(),
                table: format!("{type_tag}.{name}"),
                message: "depends_on must be an array of resource ids".to_string(),
            });
            return None;
        };
        for dep in deps {
            match dep.as_str() {
                Some(dep) => depends_on.push(dep.to_string()),
                None => {
                    errors.push(ParseError::MalformedTable {
                        path: file.to_path_buf(),
                        table: format!("{type_tag}.{name}"),
                        message: "depends_on entries must be strings".to_string(),
                    });
                    return None;
                }
            }
        }
    }

    // The checksum covers the declared text, before interpolation, so a
    // variable override alone does not mark the resource changed.
    let declared = toml::to_string(body).unwrap_or_default();
    let checksum = blake3::hash(format!("{id}\n{declared}").as_bytes())
        .to_hex()
        .to_string();

    Some(RawResource {
        id,
        name: name.to_string(),
        type_tag: type_tag.to_string(),
        disabled,
        depends_on,
        checksum,
        body: body.clone(),
        file: file.to_path_buf(),
    })
}

fn load_module(
    registry: &Registry,
    module: &RawResource,
    errors: &mut ParseErrors,
    visited: &mut HashSet<PathBuf>,
) -> Vec<RawResource> {
    let Some(source) = module.body.get("source").and_then(toml::Value::as_str) else {
        errors.push(ParseError::Module {
            id: module.id.clone(),
            message: "missing source".to_string(),
        });
        return Vec::new();
    };

    let dir = module
        .file
        .parent()
        .map(|parent| parent.join(source))
        .unwrap_or_else(|| PathBuf::from(source));

    let canonical = match dir.canonicalize() {
        Ok(canonical) => canonical,
        Err(err) => {
            errors.push(ParseError::Module {
                id: module.id.clone(),
                message: format!("source {}: {err}", dir.display()),
            });
            return Vec::new();
        }
    };

    if !visited.insert(canonical.clone()) {
        errors.push(ParseError::Module {
            id: module.id.clone(),
            message: format!("module cycle through {}", canonical.display()),
        });
        return Vec::new();
    }

    load_dir(registry, &canonical, errors, visited)
}

fn stack_files(path: &Path, errors: &mut ParseErrors) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    if !path.is_dir() {
        errors.push(ParseError::Io {
            path: path.to_path_buf(),
            message: "no such file or directory".to_string(),
        });
        return Vec::new();
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            errors.push(ParseError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            });
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    files
}

fn collect_variables(
    raws: &[RawResource],
    vars: &Variables,
    vars_file: Option<&Path>,
    errors: &mut ParseErrors,
) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();

    // Lowest precedence: declared defaults.
    for raw in raws {
        if raw.type_tag != TYPE_VARIABLE {
            continue;
        }
        if let Some(default) = raw.body.get("default").and_then(toml_scalar_to_string) {
            variables.insert(raw.name.clone(), default);
        }
    }

    // Then the variables file, then explicit overrides.
    if let Some(path) = vars_file {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<toml::value::Table>(&content) {
                Ok(table) => {
                    for (key, value) in table {
                        match toml_scalar_to_string(&value) {
                            Some(value) => {
                                variables.insert(key, value);
                            }
                            None => errors.push(ParseError::MalformedTable {
                                path: path.to_path_buf(),
                                table: key,
                                message: "variable values must be scalars".to_string(),
                            }),
                        }
                    }
                }
                Err(err) => errors.push(ParseError::Syntax {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                }),
            },
            Err(err) => errors.push(ParseError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    for (key, value) in vars {
        variables.insert(key.clone(), value.clone());
    }

    variables
}

/// Resolve `${resource.*}` references in a raw body.
fn resolve_body<F>(raw: &mut RawResource, lookup: &F, unresolved: &mut Vec<String>)
where
    F: Fn(&str, &[String]) -> Option<String>,
{
    let mut value = toml::Value::Table(std::mem::take(&mut raw.body));
    interp::resolve_resource_refs(&mut value, lookup, unresolved);
    raw.body = match value {
        toml::Value::Table(table) => table,
        _ => unreachable!("resolution preserves the value shape"),
    };
}

/// Lookup over declared (pre-provider) values only.
fn static_lookup(raws: &[RawResource]) -> impl Fn(&str, &[String]) -> Option<String> + '_ {
    move |id: &str, path: &[String]| {
        let raw = raws.iter().find(|r| r.id == id)?;
        let mut value = raw.body.get(path.first()?.as_str())?;
        for segment in &path[1..] {
            value = value.get(segment.as_str())?;
        }
        toml_scalar_to_string(value)
    }
}

/// Materialize a typed [`Resource`] from a raw body.
fn build_resource(raw: &RawResource, errors: &mut ParseErrors) -> Option<Resource> {
    let mut fields = match serde_json::to_value(toml::Value::Table(raw.body.clone())) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            errors.push(ParseError::Body {
                id: raw.id.clone(),
                message: "resource body is not a table".to_string(),
            });
            return None;
        }
    };

    fields.insert("resource_id".to_string(), raw.id.clone().into());
    fields.insert("resource_name".to_string(), raw.name.clone().into());
    fields.insert("resource_type".to_string(), raw.type_tag.clone().into());
    fields.insert("disabled".to_string(), raw.disabled.into());
    fields.insert(
        "depends_on".to_string(),
        raw.depends_on.clone().into(),
    );
    fields.insert(
        "checksum".to_string(),
        serde_json::json!({ "parsed": raw.checksum.clone() }),
    );
    fields.remove("properties");

    match serde_json::from_value(serde_json::Value::Object(fields)) {
        Ok(resource) => Some(resource),
        Err(err) => {
            errors.push(ParseError::Body {
                id: raw.id.clone(),
                message: err.to_string(),
            });
            None
        }
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 64 {
        return Err("must be 1-64 characters".to_string());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err("must match [a-zA-Z0-9_-]".to_string());
    }
    Ok(())
}

fn toml_scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        _ => None,
    }
}
