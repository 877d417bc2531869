//! Type registry built from a bundle's descriptor set.
//!
//! The registry answers two questions: does a message name resolve, and
//! does a message (transitively, through message-typed fields) contain a
//! field of a given type. It is immutable once built and safe to share
//! across threads.

use std::collections::{BTreeMap, BTreeSet};

use assetbundle_core::error::{BundleError, Result};
use assetbundle_core::payload::type_name_from_url;
use assetbundle_core::referenced::REFERENCED_DATA_TYPE;
use prost::Message;
use prost_types::field_descriptor_proto::Type as FieldType;
use prost_types::{DescriptorProto, FileDescriptorSet};

/// Message type that declares a dependency resolved at install time.
pub const RESOLVED_DEPENDENCY_TYPE: &str = "assetbundle.v1.ResolvedDependency";

/// Types every registry resolves, descriptor set or not.
pub const BUILTIN_TYPES: &[&str] = &[
    "google.protobuf.Empty",
    "google.protobuf.Any",
    "google.protobuf.Struct",
    "google.protobuf.Value",
    "google.protobuf.ListValue",
    "google.protobuf.Duration",
    "google.protobuf.Timestamp",
    REFERENCED_DATA_TYPE,
    RESOLVED_DEPENDENCY_TYPE,
];

/// A message-typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageField {
    pub name: String,
    /// Fully-qualified message name, without a leading dot.
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageType {
    pub full_name: String,
    /// Only message-typed fields are kept; scalars and enums cannot hold
    /// nested messages.
    pub fields: Vec<MessageField>,
    pub builtin: bool,
}

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    messages: BTreeMap<String, MessageType>,
}

impl TypeRegistry {
    /// A registry holding only the built-in types.
    pub fn builtin() -> Self {
        let mut registry = Self {
            messages: BTreeMap::new(),
        };
        registry.add_builtins();
        registry
    }

    /// Decode a binary `FileDescriptorSet`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)?;
        Ok(Self::from_descriptor_set(&set))
    }

    pub fn from_descriptor_set(set: &FileDescriptorSet) -> Self {
        let mut messages = BTreeMap::new();
        for file in &set.file {
            for message in &file.message_type {
                add_message(&mut messages, file.package(), message);
            }
        }
        let mut registry = Self { messages };
        registry.add_builtins();

        tracing::debug!(
            files = set.file.len(),
            messages = registry.messages.len(),
            "Built type registry"
        );
        registry
    }

    fn add_builtins(&mut self) {
        for name in BUILTIN_TYPES {
            self.messages
                .entry(name.to_string())
                .or_insert_with(|| MessageType {
                    full_name: name.to_string(),
                    fields: Vec::new(),
                    builtin: true,
                });
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether `name` (a full name or a type URL) resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.messages.contains_key(type_name_from_url(name))
    }

    /// Resolve a full message name or type URL.
    pub fn resolve(&self, name: &str) -> Result<&MessageType> {
        let full_name = type_name_from_url(name);
        self.messages
            .get(full_name)
            .ok_or_else(|| BundleError::UnresolvedType {
                type_name: full_name.to_string(),
            })
    }

    /// Whether `root` or any message reachable from it has a field of
    /// message type `target`.
    pub fn contains_field_of_type(&self, root: &str, target: &str) -> Result<bool> {
        let mut pending = vec![self.resolve(root)?];
        let mut visited = BTreeSet::new();
        visited.insert(pending[0].full_name.as_str());

        while let Some(message) = pending.pop() {
            for field in &message.fields {
                if field.type_name == target {
                    return Ok(true);
                }
                let nested = self.resolve(&field.type_name)?;
                if visited.insert(nested.full_name.as_str()) {
                    pending.push(nested);
                }
            }
        }
        Ok(false)
    }
}

fn add_message(messages: &mut BTreeMap<String, MessageType>, scope: &str, message: &DescriptorProto) {
    let full_name = if scope.is_empty() {
        message.name().to_string()
    } else {
        format!("{}.{}", scope, message.name())
    };

    let fields = message
        .field
        .iter()
        .filter(|f| matches!(f.r#type(), FieldType::Message | FieldType::Group))
        .map(|f| MessageField {
            name: f.name().to_string(),
            type_name: f.type_name().trim_start_matches('.').to_string(),
        })
        .collect();

    for nested in &message.nested_type {
        add_message(messages, &full_name, nested);
    }

    messages.insert(
        full_name.clone(),
        MessageType {
            full_name,
            fields,
            builtin: false,
        },
    );
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn registry() -> TypeRegistry {
        let mut outer = message(
            "Params",
            vec![
                message_field("arm", "ai.example.Arm"),
                message_field("opts", "ai.example.Params.Options"),
                scalar_field("label"),
            ],
        );
        outer.nested_type.push(message("Options", vec![scalar_field("speed")]));
        let arm = message(
            "Arm",
            vec![message_field("gripper", RESOLVED_DEPENDENCY_TYPE)],
        );
        let plain = message("Plain", vec![scalar_field("x")]);
        let cyclic = message("Node", vec![message_field("next", "ai.example.Node")]);
        TypeRegistry::from_bytes(&descriptor_set("ai.example", vec![outer, arm, plain, cyclic]))
            .unwrap()
    }

    #[test]
    fn test_resolve_top_level_and_nested() {
        let registry = registry();
        assert!(registry.resolve("ai.example.Params").is_ok());
        assert!(registry.resolve("ai.example.Params.Options").is_ok());
        assert!(registry
            .resolve("type.googleapis.com/ai.example.Arm")
            .is_ok());
    }

    #[test]
    fn test_unresolved_type_is_integrity_error() {
        let err = registry().resolve("ai.example.Missing").unwrap_err();
        assert!(matches!(err, BundleError::UnresolvedType { ref type_name } if type_name == "ai.example.Missing"));
        assert_eq!(err.kind(), assetbundle_core::ErrorKind::Integrity);
    }

    #[test]
    fn test_builtins_always_resolve() {
        let registry = TypeRegistry::builtin();
        for name in BUILTIN_TYPES {
            assert!(registry.contains(name), "{}", name);
        }
        assert!(!registry.contains("ai.example.Params"));
    }

    #[test]
    fn test_contains_field_of_type_is_recursive() {
        let registry = registry();
        assert!(registry
            .contains_field_of_type("ai.example.Params", RESOLVED_DEPENDENCY_TYPE)
            .unwrap());
        assert!(registry
            .contains_field_of_type("ai.example.Arm", RESOLVED_DEPENDENCY_TYPE)
            .unwrap());
        assert!(!registry
            .contains_field_of_type("ai.example.Plain", RESOLVED_DEPENDENCY_TYPE)
            .unwrap());
    }

    #[test]
    fn test_contains_field_of_type_terminates_on_cycles() {
        assert!(!registry()
            .contains_field_of_type("ai.example.Node", RESOLVED_DEPENDENCY_TYPE)
            .unwrap());
    }

    #[test]
    fn test_invalid_bytes_fail_to_decode() {
        let err = TypeRegistry::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, BundleError::SerializationError(_)));
    }

    #[test]
    fn test_registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypeRegistry>();
    }
}
