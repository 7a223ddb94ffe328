//! Configuration values and references between resources

use crate::error::{Result, StackError};
use crate::outputs::OutputTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared configuration of a resource: attribute name to value
pub type Config = BTreeMap<String, Value>;

/// A pointer to an output attribute of another resource.
///
/// The value only exists once the referenced resource reaches `Created`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    pub attribute: String,
}

impl Reference {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse a `resource.attribute` expression (without the `${}` wrapper)
    pub fn parse(expr: &str) -> Option<Self> {
        let (resource, attribute) = expr.trim().split_once('.')?;
        if resource.is_empty() || attribute.is_empty() || attribute.contains('.') {
            return None;
        }
        Some(Self::new(resource, attribute))
    }

    /// Dereference against the outputs produced so far
    pub fn resolve<'a>(&self, outputs: &'a OutputTable) -> Result<&'a serde_json::Value> {
        outputs.lookup(self)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// A configuration value: either a literal or something that must be
/// resolved from other resources' outputs at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Literal(serde_json::Value),
    Ref(Reference),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// String interpolation, e.g. `"${bucket.arn}/*"`
    Concat(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::Literal(serde_json::Value::String(s.into()))
    }

    /// All references contained in this value, in order of appearance
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Value::Literal(_) => {}
            Value::Ref(r) => out.push(r),
            Value::List(items) | Value::Concat(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Value::Map(map) => {
                for item in map.values() {
                    item.collect_references(out);
                }
            }
        }
    }

    /// Whether any reference in this value points at `resource`
    pub fn mentions(&self, resource: &str) -> bool {
        self.references().iter().any(|r| r.resource == resource)
    }

    pub fn is_literal(&self) -> bool {
        self.references().is_empty()
    }

    /// Produce the concrete JSON value handed to the backend
    pub fn resolve(&self, outputs: &OutputTable) -> Result<serde_json::Value> {
        match self {
            Value::Literal(v) => Ok(v.clone()),
            Value::Ref(r) => r.resolve(outputs).cloned(),
            Value::List(items) => items
                .iter()
                .map(|item| item.resolve(outputs))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, item) in map {
                    object.insert(key.clone(), item.resolve(outputs)?);
                }
                Ok(serde_json::Value::Object(object))
            }
            Value::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match part.resolve(outputs)? {
                        serde_json::Value::String(s) => joined.push_str(&s),
                        other => joined.push_str(&other.to_string()),
                    }
                }
                Ok(serde_json::Value::String(joined))
            }
        }
    }
}

/// Resolve a whole configuration map into a JSON object
pub fn resolve_config(config: &Config, outputs: &OutputTable) -> Result<serde_json::Value> {
    let mut object = serde_json::Map::new();
    for (key, value) in config {
        object.insert(key.clone(), value.resolve(outputs)?);
    }
    Ok(serde_json::Value::Object(object))
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Literal(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Literal(serde_json::Value::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Literal(serde_json::Value::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Literal(serde_json::Value::Bool(b))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(v) => write!(f, "{}", v),
            Value::Ref(r) => write!(f, "{}", r),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                write!(f, "}}")
            }
            Value::Concat(parts) => {
                write!(f, "\"")?;
                for part in parts {
                    match part {
                        Value::Literal(serde_json::Value::String(s)) => write!(f, "{}", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

/// Error helper for a reference that points nowhere
pub(crate) fn unknown_reference(
    referrer: &str,
    reference: &Reference,
    reason: impl Into<String>,
) -> StackError {
    StackError::UnknownReference {
        referrer: referrer.to_string(),
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceStatus;
    use serde_json::json;

    #[test]
    fn test_reference_parse() {
        assert_eq!(Reference::parse("vpc.id"), Some(Reference::new("vpc", "id")));
        assert_eq!(
            Reference::parse(" db.endpoint_address "),
            Some(Reference::new("db", "endpoint_address"))
        );
        assert_eq!(Reference::parse("vpc"), None);
        assert_eq!(Reference::parse(".id"), None);
        assert_eq!(Reference::parse("a.b.c"), None);
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(Reference::new("bucket", "arn").to_string(), "${bucket.arn}");
    }

    #[test]
    fn test_collect_nested_references() {
        let value = Value::Map(BTreeMap::from([
            ("host".to_string(), Value::Ref(Reference::new("db", "endpoint_address"))),
            (
                "policy".to_string(),
                Value::List(vec![
                    Value::Ref(Reference::new("bucket", "arn")),
                    Value::Concat(vec![
                        Value::Ref(Reference::new("bucket", "arn")),
                        Value::string("/*"),
                    ]),
                ]),
            ),
        ]));

        let refs = value.references();
        assert_eq!(refs.len(), 3);
        assert!(value.mentions("db"));
        assert!(value.mentions("bucket"));
        assert!(!value.mentions("vpc"));
    }

    #[test]
    fn test_resolve_before_created_fails() {
        let mut outputs = OutputTable::new();
        outputs.set_status("db", ResourceStatus::Creating);

        let value = Value::Ref(Reference::new("db", "endpoint_address"));
        let err = value.resolve(&outputs).unwrap_err();
        assert!(matches!(err, StackError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_resolve_concat_and_map() {
        let mut outputs = OutputTable::new();
        outputs.record(
            "bucket",
            ResourceStatus::Created,
            BTreeMap::from([("arn".to_string(), json!("arn:sim:bucket:1"))]),
        );

        let value = Value::Map(BTreeMap::from([
            (
                "resources".to_string(),
                Value::List(vec![
                    Value::Ref(Reference::new("bucket", "arn")),
                    Value::Concat(vec![
                        Value::Ref(Reference::new("bucket", "arn")),
                        Value::string("/*"),
                    ]),
                ]),
            ),
            ("versioned".to_string(), Value::from(true)),
        ]));

        let resolved = value.resolve(&outputs).unwrap();
        assert_eq!(
            resolved,
            json!({
                "resources": ["arn:sim:bucket:1", "arn:sim:bucket:1/*"],
                "versioned": true
            })
        );
    }
}
