//! Resource types and the registry of their argument shapes
//!
//! A resource type names a content category (Exhibit, Route, ...). Its shape
//! lists the argument fields with their defaults and declares which fields
//! hold references to other entities. Reference extraction and diffing are
//! driven entirely by that declaration.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Args, EntityId};

const DEFAULT_STATUS: &str = "Draft";

/// Name of a registered content category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn exhibit() -> Self {
        Self::new("Exhibit")
    }

    pub fn exhibit_page() -> Self {
        Self::new("ExhibitPage")
    }

    pub fn route() -> Self {
        Self::new("Route")
    }

    pub fn media() -> Self {
        Self::new("Media")
    }

    pub fn tag() -> Self {
        Self::new("Tag")
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How many ids a reference field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// A single id or null
    One,
    /// An array of ids (null means empty)
    Many,
}

/// Declares that a field references entities of another type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpec {
    pub target: ResourceType,
    pub cardinality: Cardinality,
}

/// One argument field of a resource shape
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub default: Value,
    pub reference: Option<ReferenceSpec>,
}

/// Argument shape of a resource type
#[derive(Debug, Clone)]
pub struct ResourceShape {
    resource_type: ResourceType,
    fields: Vec<FieldSpec>,
}

impl ResourceShape {
    /// Start building a shape for the given type
    pub fn builder(resource_type: ResourceType) -> ResourceShapeBuilder {
        ResourceShapeBuilder {
            shape: ResourceShape {
                resource_type,
                fields: Vec::new(),
            },
        }
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Argument snapshot holding every field's default value
    pub fn defaults(&self) -> Args {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect()
    }

    /// Iterate over the fields that reference other entities
    pub fn reference_fields(&self) -> impl Iterator<Item = (&str, &ReferenceSpec)> {
        self.fields
            .iter()
            .filter_map(|f| f.reference.as_ref().map(|r| (f.name.as_str(), r)))
    }

    /// Entities referenced by `value` if it were stored in `field`
    ///
    /// Returns an empty set for non-reference fields and for values that
    /// carry no ids (null, empty arrays).
    pub fn references_in(&self, field: &str, value: &Value) -> BTreeSet<EntityId> {
        let Some(spec) = self.field(field).and_then(|f| f.reference.as_ref()) else {
            return BTreeSet::new();
        };

        let ids: Vec<u64> = match value {
            Value::Number(n) => n.as_u64().into_iter().collect(),
            Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
            _ => Vec::new(),
        };

        ids.into_iter()
            .map(|id| EntityId::new(spec.target.clone(), id))
            .collect()
    }

    /// References grouped by the field that declares them
    pub fn field_references(&self, args: &Args) -> BTreeMap<String, BTreeSet<EntityId>> {
        self.reference_fields()
            .map(|(name, _)| {
                let refs = args
                    .get(name)
                    .map(|v| self.references_in(name, v))
                    .unwrap_or_default();
                (name.to_string(), refs)
            })
            .collect()
    }

    /// Every entity referenced by an argument snapshot
    pub fn all_references(&self, args: &Args) -> BTreeSet<EntityId> {
        self.field_references(args).into_values().flatten().collect()
    }
}

/// Builder for [`ResourceShape`]
pub struct ResourceShapeBuilder {
    shape: ResourceShape,
}

impl ResourceShapeBuilder {
    /// Plain value field
    pub fn field(mut self, name: &str, default: Value) -> Self {
        self.shape.fields.push(FieldSpec {
            name: name.to_string(),
            default,
            reference: None,
        });
        self
    }

    /// Field holding a single optional reference
    pub fn reference_one(mut self, name: &str, target: ResourceType) -> Self {
        self.shape.fields.push(FieldSpec {
            name: name.to_string(),
            default: Value::Null,
            reference: Some(ReferenceSpec {
                target,
                cardinality: Cardinality::One,
            }),
        });
        self
    }

    /// Field holding a list of references
    pub fn reference_many(mut self, name: &str, target: ResourceType) -> Self {
        self.shape.fields.push(FieldSpec {
            name: name.to_string(),
            default: json!([]),
            reference: Some(ReferenceSpec {
                target,
                cardinality: Cardinality::Many,
            }),
        });
        self
    }

    pub fn build(self) -> ResourceShape {
        self.shape
    }
}

/// Edges to add and remove when an entity's references change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceDiff {
    pub added: BTreeSet<EntityId>,
    pub removed: BTreeSet<EntityId>,
}

impl ReferenceDiff {
    pub fn between(old: &BTreeSet<EntityId>, new: &BTreeSet<EntityId>) -> Self {
        Self {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Registry of resource types known to the engine
///
/// Built once at startup and shared by `Arc` with every component that has
/// to resolve a type name to its shape.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    shapes: HashMap<ResourceType, ResourceShape>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a shape
    pub fn register(&mut self, shape: ResourceShape) -> &mut Self {
        self.shapes.insert(shape.resource_type().clone(), shape);
        self
    }

    pub fn get(&self, resource_type: &ResourceType) -> Option<&ResourceShape> {
        self.shapes.get(resource_type)
    }

    /// Look up a type by its name
    pub fn resolve(&self, name: &str) -> Option<&ResourceType> {
        self.shapes.keys().find(|t| t.name() == name)
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.shapes.contains_key(resource_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &ResourceType> {
        self.shapes.keys()
    }

    /// Registry with the content types of the HiP data store
    pub fn standard() -> Self {
        let mut registry = Self::new();

        registry
            .register(
                ResourceShape::builder(ResourceType::exhibit())
                    .field("name", json!(""))
                    .field("description", json!(""))
                    .reference_one("image", ResourceType::media())
                    .field("latitude", json!(0.0))
                    .field("longitude", json!(0.0))
                    .field("accessRadius", json!(0.0))
                    .reference_many("tags", ResourceType::tag())
                    .reference_many("pages", ResourceType::exhibit_page())
                    .field("status", json!(DEFAULT_STATUS))
                    .build(),
            )
            .register(
                ResourceShape::builder(ResourceType::exhibit_page())
                    .field("type", json!("AppetizerPage"))
                    .field("title", json!(""))
                    .field("text", json!(""))
                    .field("description", json!(""))
                    .field("fontFamily", Value::Null)
                    .reference_one("image", ResourceType::media())
                    .reference_one("audio", ResourceType::media())
                    .reference_many("images", ResourceType::media())
                    .reference_many("additionalInformationPages", ResourceType::exhibit_page())
                    .field("status", json!(DEFAULT_STATUS))
                    .build(),
            )
            .register(
                ResourceShape::builder(ResourceType::route())
                    .field("title", json!(""))
                    .field("description", json!(""))
                    .field("duration", json!(0))
                    .field("distance", json!(0.0))
                    .reference_one("image", ResourceType::media())
                    .reference_one("audio", ResourceType::media())
                    .reference_many("exhibits", ResourceType::exhibit())
                    .reference_many("tags", ResourceType::tag())
                    .field("status", json!(DEFAULT_STATUS))
                    .build(),
            )
            .register(
                ResourceShape::builder(ResourceType::media())
                    .field("title", json!(""))
                    .field("description", json!(""))
                    .field("type", json!("Image"))
                    .field("status", json!(DEFAULT_STATUS))
                    .build(),
            )
            .register(
                ResourceShape::builder(ResourceType::tag())
                    .field("title", json!(""))
                    .field("description", json!(""))
                    .reference_one("image", ResourceType::media())
                    .field("status", json!(DEFAULT_STATUS))
                    .build(),
            );

        registry
    }
}
