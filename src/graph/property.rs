//! Property bags.
//!
//! A declaration's properties form a tree whose leaves are either literal
//! JSON values or [`Deferred`] values. Realizing the bag waits for every
//! deferred leaf and produces plain JSON for the provider.

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::deferred::{Deferred, DeferredResult};
use super::id::ResourceId;

/// Placeholder shown for values not yet known.
pub const COMPUTED_PLACEHOLDER: &str = "<computed>";

/// Placeholder shown for secret values.
pub const SECRET_PLACEHOLDER: &str = "[secret]";

/// A single node of a property tree.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// A value known at declaration time.
    Literal(Value),
    /// A value produced by another resource.
    Deferred(Deferred<Value>),
    /// A list whose items may be deferred.
    List(Vec<PropertyValue>),
    /// An object whose fields may be deferred.
    Map(BTreeMap<String, PropertyValue>),
}

/// Error returned by [`Properties::set_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError(pub String);

impl PropertyValue {
    /// Builds a list node.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Collects the identities of every declaration this tree depends on.
    pub fn collect_sources(&self, out: &mut BTreeSet<ResourceId>) {
        match self {
            Self::Literal(_) => {}
            Self::Deferred(d) => out.extend(d.sources().iter().cloned()),
            Self::List(items) => items.iter().for_each(|i| i.collect_sources(out)),
            Self::Map(fields) => fields.values().for_each(|v| v.collect_sources(out)),
        }
    }

    /// Waits for every deferred leaf and returns plain JSON.
    pub fn realize(&self) -> BoxFuture<'_, DeferredResult<Value>> {
        async move {
            match self {
                Self::Literal(v) => Ok(v.clone()),
                Self::Deferred(d) => d.resolve().await,
                Self::List(items) => {
                    let values =
                        futures::future::try_join_all(items.iter().map(Self::realize)).await?;
                    Ok(Value::Array(values))
                }
                Self::Map(fields) => {
                    let mut out = Map::new();
                    for (key, value) in fields {
                        out.insert(key.clone(), value.realize().await?);
                    }
                    Ok(Value::Object(out))
                }
            }
        }
        .boxed()
    }

    /// Renders the tree for display without waiting: pending values become
    /// `<computed>` and secret values become `[secret]`.
    #[must_use]
    pub fn preview(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Deferred(d) if d.is_secret() => Value::String(SECRET_PLACEHOLDER.to_string()),
            Self::Deferred(d) => match d.peek() {
                Some(Ok(v)) => v,
                _ => Value::String(COMPUTED_PLACEHOLDER.to_string()),
            },
            Self::List(items) => Value::Array(items.iter().map(Self::preview).collect()),
            Self::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.preview()))
                    .collect(),
            ),
        }
    }

    /// Returns true if no deferred leaf is still pending.
    #[must_use]
    pub fn is_known(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Deferred(d) => matches!(d.peek(), Some(Ok(_))),
            Self::List(items) => items.iter().all(Self::is_known),
            Self::Map(fields) => fields.values().all(Self::is_known),
        }
    }

    /// Returns true if any leaf is secret.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Deferred(d) => d.is_secret(),
            Self::List(items) => items.iter().any(Self::is_secret),
            Self::Map(fields) => fields.values().any(Self::is_secret),
        }
    }

    /// Converts literal JSON into a tree, splitting objects and arrays so
    /// that their children can later be replaced.
    fn expand(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::Literal(v))).collect())
            }
            Value::Array(items) => Self::List(items.into_iter().map(Self::Literal).collect()),
            other => Self::Literal(other),
        }
    }

    fn set_path(&mut self, segments: &[&str], value: Self) -> Result<(), PathError> {
        let Some((head, rest)) = segments.split_first() else {
            *self = value;
            return Ok(());
        };

        if let Self::Literal(literal) = self {
            let literal = std::mem::take(literal);
            *self = Self::expand(literal);
        }

        match self {
            Self::Map(fields) => {
                let child = fields
                    .entry((*head).to_string())
                    .or_insert_with(|| Self::Literal(Value::Object(Map::new())));
                child.set_path(rest, value)
            }
            Self::List(items) => {
                let index: usize = head
                    .parse()
                    .map_err(|_| PathError(format!("'{head}' is not a list index")))?;
                let len = items.len();
                let child = items
                    .get_mut(index)
                    .ok_or_else(|| PathError(format!("index {index} out of bounds ({len})")))?;
                child.set_path(rest, value)
            }
            Self::Literal(_) => Err(PathError(format!("cannot descend into scalar at '{head}'"))),
            Self::Deferred(_) => Err(PathError(format!("cannot descend into deferred value at '{head}'"))),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<Deferred<Value>> for PropertyValue {
    fn from(value: Deferred<Value>) -> Self {
        Self::Deferred(value)
    }
}

impl From<Deferred<String>> for PropertyValue {
    fn from(value: Deferred<String>) -> Self {
        Self::Deferred(value.map(Value::String))
    }
}

impl From<Deferred<Vec<String>>> for PropertyValue {
    fn from(value: Deferred<Vec<String>>) -> Self {
        Self::Deferred(value.map(|items| Value::Array(items.into_iter().map(Value::String).collect())))
    }
}

impl From<Properties> for PropertyValue {
    fn from(value: Properties) -> Self {
        Self::Map(value.fields)
    }
}

/// The top-level property bag of a declaration.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    fields: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Creates an empty property bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a literal JSON object. Non-object values yield an empty bag.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self {
                fields: map
                    .into_iter()
                    .map(|(k, v)| (k, PropertyValue::Literal(v)))
                    .collect(),
            },
            _ => Self::new(),
        }
    }

    /// Sets a top-level property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Replaces the value at a dotted path, splitting literal objects and
    /// arrays along the way. Missing object keys are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the path indexes past the end of a list, uses a
    /// non-numeric list index, or descends into a scalar or deferred value.
    pub fn set_path(&mut self, path: &str, value: impl Into<PropertyValue>) -> Result<(), PathError> {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((head, rest)) = segments.split_first() else {
            return Err(PathError(String::from("empty path")));
        };
        if head.is_empty() {
            return Err(PathError(String::from("empty path")));
        }

        let child = self
            .fields
            .entry((*head).to_string())
            .or_insert_with(|| PropertyValue::Literal(Value::Object(Map::new())));
        child.set_path(rest, value.into())
    }

    /// Returns a top-level property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.fields.get(key)
    }

    /// Iterates over top-level properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.fields.iter()
    }

    /// Identities of every declaration referenced by a deferred leaf.
    #[must_use]
    pub fn sources(&self) -> BTreeSet<ResourceId> {
        let mut out = BTreeSet::new();
        for value in self.fields.values() {
            value.collect_sources(&mut out);
        }
        out
    }

    /// Waits for every deferred leaf and returns a JSON object.
    ///
    /// # Errors
    ///
    /// Returns the first deferred value that failed to resolve.
    pub async fn realize(&self) -> DeferredResult<Value> {
        let mut out = Map::new();
        for (key, value) in &self.fields {
            out.insert(key.clone(), value.realize().await?);
        }
        Ok(Value::Object(out))
    }

    /// Renders the bag for display without waiting.
    #[must_use]
    pub fn preview(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.preview()))
                .collect(),
        )
    }

    /// Returns true if every deferred leaf has already resolved.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.fields.values().all(PropertyValue::is_known)
    }

    /// Returns the number of top-level properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the bag has no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_realize_nested_deferred() {
        let mut props = Properties::from_json(json!({
            "spec": { "containers": [ { "name": "app" }, { "name": "proxy", "command": ["run", "x"] } ] }
        }));
        props
            .set_path("spec.containers.1.command.1", Deferred::ready(String::from("-instances=db")))
            .expect("path should apply");

        let realized = props.realize().await.expect("all values known");
        assert_eq!(
            realized["spec"]["containers"][1]["command"],
            json!(["run", "-instances=db"])
        );
        assert_eq!(realized["spec"]["containers"][0]["name"], json!("app"));
    }

    #[test]
    fn test_set_path_creates_missing_keys() {
        let mut props = Properties::new();
        props
            .set_path("metadata.labels.app", "web")
            .expect("path should apply");
        assert_eq!(props.preview(), json!({ "metadata": { "labels": { "app": "web" } } }));
    }

    #[test]
    fn test_set_path_errors() {
        let mut props = Properties::from_json(json!({ "list": [1], "scalar": 3 }));
        assert!(props.set_path("list.5", "x").is_err());
        assert!(props.set_path("list.name", "x").is_err());
        assert!(props.set_path("scalar.inner", "x").is_err());
        assert!(props.set_path("", "x").is_err());
    }

    #[test]
    fn test_preview_masks_secret_and_pending() {
        let id = ResourceId::new("t:i:A", "a");
        let pending = Deferred::<Value>::from_future(
            futures::future::pending().boxed(),
            BTreeSet::from([id.clone()]),
        );
        let props = Properties::new()
            .with("password", Deferred::secret(String::from("hunter2")))
            .with("endpoint", pending)
            .with("name", "db");

        assert_eq!(
            props.preview(),
            json!({ "password": "[secret]", "endpoint": "<computed>", "name": "db" })
        );
        assert_eq!(props.sources(), BTreeSet::from([id]));
        assert!(!props.is_known());
    }
}
