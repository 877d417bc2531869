//! Typed payload messages.
//!
//! A payload is a JSON object tagged with its message type in `@type`,
//! in the style of a protobuf `Any`. Objects nested anywhere inside may
//! carry their own `@type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BundleError, Result};
use crate::referenced::{ReferencedData, ReferencedDataHost};

/// Type URL prefix used when building payloads from a bare message name.
pub const DEFAULT_TYPE_URL_PREFIX: &str = "type.googleapis.com";

/// Message name of a type URL: everything after the last `/`.
pub fn type_name_from_url(type_url: &str) -> &str {
    type_url.rsplit('/').next().unwrap_or(type_url)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Build a payload of message `type_name` from a JSON object of fields.
    pub fn new(type_name: &str, fields: Value) -> Result<Self> {
        let Value::Object(mut map) = fields else {
            return Err(BundleError::SerializationError(format!(
                "payload fields for {} must be a JSON object",
                type_name
            )));
        };
        map.insert(
            "@type".to_string(),
            Value::String(format!("{}/{}", DEFAULT_TYPE_URL_PREFIX, type_name)),
        );
        Ok(Self(Value::Object(map)))
    }

    /// Wrap an existing `@type`-tagged JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        let payload = Self(value);
        if payload.type_url().is_none() {
            return Err(BundleError::SerializationError(
                "payload must be a JSON object with a string '@type'".to_string(),
            ));
        }
        Ok(payload)
    }

    pub fn type_url(&self) -> Option<&str> {
        self.0.get("@type").and_then(Value::as_str)
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_url().map(type_name_from_url)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Every message name declared by `@type` in this payload, excluding
    /// referenced-data nodes.
    pub fn message_type_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_type_names(&self.0, &mut names);
        names.sort();
        names.dedup();
        names
    }
}

fn collect_type_names(value: &Value, names: &mut Vec<String>) {
    if ReferencedData::is_node(value) {
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::String(url)) = map.get("@type") {
                names.push(type_name_from_url(url).to_string());
            }
            for child in map.values() {
                collect_type_names(child, names);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_type_names(child, names);
            }
        }
        _ => {}
    }
}

impl ReferencedDataHost for Payload {
    fn visit_referenced_data(
        &self,
        visitor: &mut dyn FnMut(&ReferencedData) -> Result<()>,
    ) -> Result<()> {
        self.0.visit_referenced_data(visitor)
    }

    fn visit_referenced_data_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut ReferencedData) -> Result<()>,
    ) -> Result<()> {
        self.0.visit_referenced_data_mut(visitor)
    }
}
