//! Typed attribute schema per item type.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{AttrValue, Attributes, ItemType};

/// Value kind an attribute must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttrKind {
    Bool,
    Int,
    Float,
    Text,
}

impl AttrKind {
    /// Check if a value is acceptable for this kind. Integers widen to floats.
    pub fn accepts(&self, value: &AttrValue) -> bool {
        matches!(
            (self, value),
            (AttrKind::Bool, AttrValue::Bool(_))
                | (AttrKind::Int, AttrValue::Int(_))
                | (AttrKind::Float, AttrValue::Float(_) | AttrValue::Int(_))
                | (AttrKind::Text, AttrValue::Text(_))
        )
    }
}

/// One registered attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttrKind,
    /// Whether queries are expected to filter on it.
    #[serde(default)]
    pub indexed: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed: false,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// Attribute layout of one item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub name: ItemType,
    pub attributes: Vec<AttributeDef>,
}

impl TypeSchema {
    pub fn new(name: impl Into<ItemType>, attributes: Vec<AttributeDef>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Errors raised when parser output does not fit its registered type.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Unknown item type: {kind}")]
    UnknownType { kind: ItemType },

    #[error("Attribute '{name}' is not registered for type {kind}")]
    UnknownAttribute { kind: ItemType, name: String },

    #[error("Attribute '{name}' of type {kind} must be {expected}")]
    TypeMismatch {
        kind: ItemType,
        name: String,
        expected: AttrKind,
    },
}

/// Registry of item types and their attributes.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: IndexMap<ItemType, TypeSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in directory, file and media types.
    pub fn with_defaults() -> Self {
        use AttrKind::*;

        let mut registry = Self::new();
        registry.register(TypeSchema::new(
            ItemType::Dir,
            vec![AttributeDef::new("title", Text)],
        ));
        registry.register(TypeSchema::new(
            ItemType::File,
            vec![AttributeDef::new("size", Int)],
        ));
        registry.register(TypeSchema::new(
            "image",
            vec![
                AttributeDef::new("size", Int),
                AttributeDef::new("width", Int),
                AttributeDef::new("height", Int),
                AttributeDef::new("comment", Text),
                AttributeDef::new("timestamp", Int).indexed(),
            ],
        ));
        registry.register(TypeSchema::new(
            "video",
            vec![
                AttributeDef::new("size", Int),
                AttributeDef::new("title", Text).indexed(),
                AttributeDef::new("length", Float),
                AttributeDef::new("width", Int),
                AttributeDef::new("height", Int),
                AttributeDef::new("codec", Text),
            ],
        ));
        registry.register(TypeSchema::new(
            "audio",
            vec![
                AttributeDef::new("size", Int),
                AttributeDef::new("title", Text).indexed(),
                AttributeDef::new("artist", Text).indexed(),
                AttributeDef::new("album", Text).indexed(),
                AttributeDef::new("trackno", Int),
                AttributeDef::new("length", Float),
            ],
        ));
        registry.register(TypeSchema::new(
            "track_cdda",
            vec![
                AttributeDef::new("title", Text),
                AttributeDef::new("artist", Text),
                AttributeDef::new("trackno", Int).indexed(),
                AttributeDef::new("length", Float),
            ],
        ));
        registry
    }

    /// Register or replace a type.
    pub fn register(&mut self, schema: TypeSchema) {
        self.types.insert(schema.name.clone(), schema);
    }

    /// Look up a registered type.
    pub fn get(&self, kind: &ItemType) -> Option<&TypeSchema> {
        self.types.get(kind)
    }

    /// Validate parser output against the registered type.
    pub fn validate(&self, kind: &ItemType, attributes: &Attributes) -> Result<(), SchemaError> {
        let schema = self
            .types
            .get(kind)
            .ok_or_else(|| SchemaError::UnknownType { kind: kind.clone() })?;

        for (name, value) in attributes {
            let def = schema
                .attribute(name)
                .ok_or_else(|| SchemaError::UnknownAttribute {
                    kind: kind.clone(),
                    name: name.clone(),
                })?;
            if !def.kind.accepts(value) {
                return Err(SchemaError::TypeMismatch {
                    kind: kind.clone(),
                    name: name.clone(),
                    expected: def.kind,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_validate_accepts_registered_attributes() {
        let registry = SchemaRegistry::with_defaults();
        let image = attrs(&[("width", 640i64.into()), ("comment", "beach".into())]);
        assert!(registry.validate(&ItemType::from("image"), &image).is_ok());
    }

    #[test]
    fn test_int_widens_to_float() {
        let registry = SchemaRegistry::with_defaults();
        let video = attrs(&[("length", 90i64.into())]);
        assert!(registry.validate(&ItemType::from("video"), &video).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_and_mismatched() {
        let registry = SchemaRegistry::with_defaults();

        let err = registry
            .validate(&ItemType::from("image"), &attrs(&[("bogus", 1i64.into())]))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownAttribute { .. }));

        let err = registry
            .validate(&ItemType::from("image"), &attrs(&[("width", "wide".into())]))
            .unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));

        let err = registry
            .validate(&ItemType::from("hologram"), &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
    }
}
