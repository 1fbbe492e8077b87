//! Language-neutral type model inferred from tool schemas.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Primitives ──────────────────────────────────────────────────────────────

/// Scalar JSON-Schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl PrimitiveKind {
    /// Parse a JSON-Schema `type` keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    /// The JSON-Schema keyword for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Objects ─────────────────────────────────────────────────────────────────

/// One declared property of an object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectField {
    pub name: String,
    pub node: TypeNode,
}

/// Object type with fields in source declaration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectType {
    pub fields: Vec<ObjectField>,
    pub required: BTreeSet<String>,
    /// `additionalProperties: false` in the source schema.
    #[serde(default)]
    pub closed: bool,
}

impl ObjectType {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&TypeNode> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.node)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

// ─── TypeNode ────────────────────────────────────────────────────────────────

/// Inferred type of one schema fragment.
///
/// Trees are acyclic by construction (every child is owned).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeNode {
    Primitive { primitive: PrimitiveKind },
    /// A field that may be absent from its parent object.
    Optional { inner: Box<TypeNode> },
    Array { element: Box<TypeNode> },
    Object(ObjectType),
    /// Literal values, in declaration order.
    Enum { values: Vec<serde_json::Value> },
    /// Alternatives, in declaration order.
    Union { variants: Vec<TypeNode> },
}

impl TypeNode {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        TypeNode::Primitive { primitive: kind }
    }

    pub fn optional(inner: TypeNode) -> Self {
        TypeNode::Optional {
            inner: Box::new(inner),
        }
    }

    pub fn array(element: TypeNode) -> Self {
        TypeNode::Array {
            element: Box::new(element),
        }
    }

    /// Strip one `Optional` layer, if present.
    pub fn unwrap_optional(&self) -> &TypeNode {
        match self {
            TypeNode::Optional { inner } => inner,
            other => other,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeNode::Optional { .. })
    }

    /// Object view of this node (looking through `Optional`).
    pub fn as_object(&self) -> Option<&ObjectType> {
        match self.unwrap_optional() {
            TypeNode::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Depth of the deepest path through this tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + match self {
            TypeNode::Primitive { .. } | TypeNode::Enum { .. } => 0,
            TypeNode::Optional { inner } => inner.depth(),
            TypeNode::Array { element } => element.depth(),
            TypeNode::Object(obj) => obj.fields.iter().map(|f| f.node.depth()).max().unwrap_or(0),
            TypeNode::Union { variants } => variants.iter().map(TypeNode::depth).max().unwrap_or(0),
        }
    }

    /// Rename every object field (recursively) through `rename`.
    pub fn map_field_names<F>(&self, rename: &F) -> TypeNode
    where
        F: Fn(&str) -> String,
    {
        match self {
            TypeNode::Primitive { .. } | TypeNode::Enum { .. } => self.clone(),
            TypeNode::Optional { inner } => TypeNode::optional(inner.map_field_names(rename)),
            TypeNode::Array { element } => TypeNode::array(element.map_field_names(rename)),
            TypeNode::Object(obj) => TypeNode::Object(ObjectType {
                fields: obj
                    .fields
                    .iter()
                    .map(|f| ObjectField {
                        name: rename(&f.name),
                        node: f.node.map_field_names(rename),
                    })
                    .collect(),
                required: obj.required.iter().map(|r| rename(r)).collect(),
                closed: obj.closed,
            }),
            TypeNode::Union { variants } => TypeNode::Union {
                variants: variants.iter().map(|v| v.map_field_names(rename)).collect(),
            },
        }
    }
}

impl fmt::Display for TypeNode {
    /// Compact type signature, e.g. `{title: string, tags?: [string]}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeNode::Primitive { primitive } => write!(f, "{primitive}"),
            TypeNode::Optional { inner } => write!(f, "{inner}?"),
            TypeNode::Array { element } => write!(f, "[{element}]"),
            TypeNode::Object(obj) => {
                f.write_str("{")?;
                for (i, field) in obj.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let marker = if obj.is_required(&field.name) { "" } else { "?" };
                    write!(f, "{}{marker}: {}", field.name, field.node.unwrap_optional())?;
                }
                f.write_str("}")
            }
            TypeNode::Enum { values } => {
                let literals: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "enum({})", literals.join(" | "))
            }
            TypeNode::Union { variants } => {
                let parts: Vec<String> = variants.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(" | "))
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
