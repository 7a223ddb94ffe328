//! KDL front end
//!
//! Reads a stack file into a [`Stack`]:
//!
//! ```kdl
//! stack "shop"
//! variables { domain "example.com" }
//! stage "dev" { variables { desired_count 1 } }
//! resource "vpc" kind="network" { max_azs 2 }
//! resource "db" kind="database" removal="retain" {
//!     vpc "${vpc.id}"
//!     depends_on "secret"
//! }
//! export "DatabaseEndpoint" "${db.endpoint_address}"
//! ```

use crate::template::{TemplateProcessor, Variables};
use kdl::{KdlDocument, KdlNode, KdlValue};
use regex::Regex;
use stackflow_core::{Reference, RemovalPolicy, Resource, Stack, StackError, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("KDL parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid stack file: {0}")]
    InvalidConfig(String),

    #[error("Unknown stage '{stage}' (declared: {declared})")]
    UnknownStage { stage: String, declared: String },

    #[error("Template error in {location}: {message}")]
    Template { location: String, message: String },

    #[error("Invalid reference '{expr}' in {location}: expected ${{resource.attribute}}")]
    InvalidReference { location: String, expr: String },

    #[error(transparent)]
    Stack(#[from] StackError),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Nodes collected in the first pass, before any template is rendered
#[derive(Debug, Default)]
struct Header {
    name: Option<String>,
    variables: Variables,
    stages: BTreeMap<String, Variables>,
}

/// Read and parse the stack file at `path`
pub fn load_stack(path: &Path, stage: Option<&str>) -> Result<Stack> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "Loading stack file");

    parse_stack(&content, &default_name(path), stage)
}

/// Stack name used when the file has no `stack` node: the project directory
fn default_name(path: &Path) -> String {
    path.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .map(|name| name.trim_start_matches('.').to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "stack".to_string())
}

/// Parse stack file contents, selecting `stage` when given
pub fn parse_stack(content: &str, default_name: &str, stage: Option<&str>) -> Result<Stack> {
    let doc: KdlDocument = content.parse()?;
    let header = parse_header(&doc)?;

    let base_name = header.name.unwrap_or_else(|| default_name.to_string());
    let mut processor = TemplateProcessor::new();
    processor.add_variables(header.variables);
    processor.add_variable("stack", serde_json::Value::String(base_name.clone()));

    let name = match stage {
        Some(stage) => {
            let variables = header.stages.get(stage).cloned().ok_or_else(|| {
                LoadError::UnknownStage {
                    stage: stage.to_string(),
                    declared: declared_stages(&header.stages),
                }
            })?;
            processor.add_variables(variables);
            processor.add_variable("stage", serde_json::Value::String(stage.to_string()));
            format!("{}-{}", base_name, stage)
        }
        None => base_name,
    };

    let mut stack = Stack::new(name);
    for node in doc.nodes() {
        match node.name().value() {
            "resource" => {
                let resource = parse_resource(node, &mut processor)?;
                stack.add(resource)?;
            }
            "export" => {
                let (name, value) = parse_export(node, &mut processor)?;
                stack.export(name, value)?;
            }
            "stack" | "variables" | "stage" => {}
            other => {
                tracing::warn!(node = other, "Ignoring unknown node in stack file");
            }
        }
    }

    tracing::debug!(
        stack = %stack.name(),
        resources = stack.len(),
        exports = stack.exports().len(),
        "Parsed stack file"
    );
    Ok(stack)
}

fn declared_stages(stages: &BTreeMap<String, Variables>) -> String {
    if stages.is_empty() {
        "none".to_string()
    } else {
        stages.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn parse_header(doc: &KdlDocument) -> Result<Header> {
    let mut header = Header::default();

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => {
                let name = first_string(node)
                    .ok_or_else(|| LoadError::InvalidConfig("stack requires a name".to_string()))?;
                header.name = Some(name.to_string());
            }
            "variables" => {
                header.variables.extend(parse_variables(node));
            }
            "stage" => {
                let name = first_string(node)
                    .ok_or_else(|| LoadError::InvalidConfig("stage requires a name".to_string()))?
                    .to_string();
                let mut variables = Variables::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() == "variables" {
                            variables.extend(parse_variables(child));
                        }
                    }
                }
                if header.stages.insert(name.clone(), variables).is_some() {
                    return Err(LoadError::InvalidConfig(format!(
                        "stage '{}' is declared twice",
                        name
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(header)
}

/// `variables { key value }` block
fn parse_variables(node: &KdlNode) -> HashMap<String, serde_json::Value> {
    let mut variables = HashMap::new();
    if let Some(children) = node.children() {
        for var in children.nodes() {
            let value = arguments(var)
                .first()
                .map(|v| kdl_value_to_json(v))
                .unwrap_or(serde_json::Value::Null);
            variables.insert(var.name().value().to_string(), value);
        }
    }
    variables
}

/// `resource "name" kind="kind" [removal="retain"] { ... }`
fn parse_resource(node: &KdlNode, processor: &mut TemplateProcessor) -> Result<Resource> {
    let name = first_string(node)
        .ok_or_else(|| LoadError::InvalidConfig("resource requires a name".to_string()))?
        .to_string();

    let kind = node
        .get("kind")
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            LoadError::InvalidConfig(format!("resource '{}' requires kind=\"...\"", name))
        })?;

    let mut resource = Resource::new(kind, name.as_str());

    if let Some(removal) = node.get("removal") {
        let removal = removal.as_string().unwrap_or_default();
        resource.removal = removal
            .parse::<RemovalPolicy>()
            .map_err(|e| LoadError::InvalidConfig(format!("resource '{}': {}", name, e)))?;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let attribute = child.name().value();
            if attribute == "depends_on" {
                for target in arguments(child) {
                    let target = target.as_string().ok_or_else(|| {
                        LoadError::InvalidConfig(format!(
                            "resource '{}': depends_on takes resource names",
                            name
                        ))
                    })?;
                    resource.depends_on.push(target.to_string());
                }
                continue;
            }

            let location = format!("resource {}.{}", name, attribute);
            let value = node_value(child, processor, &location)?;
            if resource.config.insert(attribute.to_string(), value).is_some() {
                return Err(LoadError::InvalidConfig(format!(
                    "resource '{}' sets '{}' twice",
                    name, attribute
                )));
            }
        }
    }

    Ok(resource)
}

/// `export "Name" value`
fn parse_export(node: &KdlNode, processor: &mut TemplateProcessor) -> Result<(String, Value)> {
    let args = arguments(node);
    let name = args
        .first()
        .and_then(|v| v.as_string())
        .ok_or_else(|| LoadError::InvalidConfig("export requires a name".to_string()))?
        .to_string();
    let value = args.get(1).ok_or_else(|| {
        LoadError::InvalidConfig(format!("export '{}' requires a value", name))
    })?;

    let location = format!("export {}", name);
    let value = scalar_value(value, processor, &location)?;
    Ok((name, value))
}

/// Value of an attribute node.
///
/// Children and properties become a map, several arguments a list, a single
/// argument a scalar.
fn node_value(node: &KdlNode, processor: &mut TemplateProcessor, location: &str) -> Result<Value> {
    let args = arguments(node);
    let has_properties = node.entries().iter().any(|e| e.name().is_some());

    if node.children().is_some() || has_properties {
        if !args.is_empty() {
            return Err(LoadError::InvalidConfig(format!(
                "{}: mixes arguments with a block",
                location
            )));
        }

        let mut map = BTreeMap::new();
        for entry in node.entries() {
            if let Some(key) = entry.name() {
                let location = format!("{}.{}", location, key.value());
                map.insert(
                    key.value().to_string(),
                    scalar_value(entry.value(), processor, &location)?,
                );
            }
        }
        if let Some(children) = node.children() {
            for child in children.nodes() {
                let key = child.name().value();
                let location = format!("{}.{}", location, key);
                map.insert(key.to_string(), node_value(child, processor, &location)?);
            }
        }
        return Ok(Value::Map(map));
    }

    match args.as_slice() {
        [] => Err(LoadError::InvalidConfig(format!("{}: missing value", location))),
        [single] => scalar_value(single, processor, location),
        many => many
            .iter()
            .map(|v| scalar_value(v, processor, location))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
    }
}

fn scalar_value(
    value: &KdlValue,
    processor: &mut TemplateProcessor,
    location: &str,
) -> Result<Value> {
    match value.as_string() {
        Some(s) => match processor.sole_variable(s) {
            Some(serde_json::Value::String(text)) => parse_interpolation(&text, location),
            Some(variable) => Ok(Value::Literal(variable)),
            None => {
                let rendered = processor.render_str(s, location)?;
                parse_interpolation(&rendered, location)
            }
        },
        None => Ok(Value::Literal(kdl_value_to_json(value))),
    }
}

/// `${expr}` placeholders; a missing closing brace leaves group 2 empty
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)(\})?").expect("placeholder pattern is valid"));

/// Split a string into literal text and `${resource.attribute}` references.
///
/// A string that is exactly one reference keeps the referenced value's type.
pub fn parse_interpolation(s: &str, location: &str) -> Result<Value> {
    let mut parts = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if caps.get(2).is_none() {
            return Err(LoadError::InvalidReference {
                location: location.to_string(),
                expr: s[whole.start()..].to_string(),
            });
        }

        let reference = Reference::parse(&caps[1]).ok_or_else(|| LoadError::InvalidReference {
            location: location.to_string(),
            expr: whole.as_str().to_string(),
        })?;

        if whole.start() > last {
            parts.push(Value::string(&s[last..whole.start()]));
        }
        parts.push(Value::Ref(reference));
        last = whole.end();
    }

    if parts.is_empty() {
        return Ok(Value::string(s));
    }
    if last < s.len() {
        parts.push(Value::string(&s[last..]));
    }

    Ok(match parts.len() {
        1 if matches!(parts[0], Value::Ref(_)) => parts.remove(0),
        _ => Value::Concat(parts),
    })
}

/// Positional arguments of a node, properties excluded
fn arguments(node: &KdlNode) -> Vec<&KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
        .collect()
}

fn first_string(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

fn kdl_value_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}
