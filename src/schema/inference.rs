//! Schema inference: JSON-Schema fragments to [`TypeNode`] trees.
//!
//! Inference is pure and deterministic. Shapes that cannot be modelled
//! exactly are rejected with `UnsupportedSchema` instead of being widened to
//! a catch-all type.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::types::{ObjectField, ObjectType, PrimitiveKind, TypeNode};
use crate::errors::ClientError;

/// Keywords that mark alternative sub-schemas.
const UNION_KEYWORDS: &[&str] = &["anyOf", "oneOf"];

/// Keywords we refuse outright because the result would not be tree-shaped
/// or would need schema algebra.
const REJECTED_KEYWORDS: &[(&str, &str)] = &[
    ("$ref", "schema references are not supported"),
    ("allOf", "allOf composition is not supported"),
    ("not", "negated schemas are not supported"),
    ("prefixItems", "tuple arrays are not supported"),
];

// ─── Entry Points ────────────────────────────────────────────────────────────

/// Infer the type of an arbitrary schema fragment.
pub fn infer_schema(tool: &str, schema: &Value) -> Result<TypeNode, ClientError> {
    Inferrer { tool }.node(schema, "")
}

/// Infer a tool's parameter object.
///
/// A missing (`null`) input schema means the tool takes no parameters. Any
/// other root must be an object type.
pub fn infer_parameters(tool: &str, input_schema: &Value) -> Result<TypeNode, ClientError> {
    if input_schema.is_null() {
        return Ok(TypeNode::Object(ObjectType::default()));
    }
    let node = infer_schema(tool, input_schema)?;
    match node {
        TypeNode::Object(_) => Ok(node),
        other => Err(ClientError::UnsupportedSchema {
            tool: tool.to_string(),
            path: "$".into(),
            reason: format!("tool parameters must be an object, found {other}"),
        }),
    }
}

/// Infer a tool's return type. Absent output schemas yield `None`.
pub fn infer_returns(tool: &str, output_schema: &Value) -> Result<Option<TypeNode>, ClientError> {
    if output_schema.is_null() {
        return Ok(None);
    }
    infer_schema(tool, output_schema).map(Some)
}

// ─── Inferrer ────────────────────────────────────────────────────────────────

struct Inferrer<'a> {
    tool: &'a str,
}

impl Inferrer<'_> {
    fn unsupported(&self, path: &str, reason: impl Into<String>) -> ClientError {
        ClientError::UnsupportedSchema {
            tool: self.tool.to_string(),
            path: display_path(path),
            reason: reason.into(),
        }
    }

    fn node(&self, schema: &Value, path: &str) -> Result<TypeNode, ClientError> {
        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(_) => {
                return Err(self.unsupported(path, "boolean schemas carry no type information"))
            }
            other => {
                return Err(self.unsupported(path, format!("expected a schema object, found {other}")))
            }
        };

        for (keyword, reason) in REJECTED_KEYWORDS {
            if obj.contains_key(*keyword) {
                return Err(self.unsupported(path, *reason));
            }
        }

        if let Some(value) = obj.get("const") {
            return Ok(TypeNode::Enum {
                values: vec![value.clone()],
            });
        }

        if let Some(values) = obj.get("enum") {
            return self.enumeration(values, path);
        }

        for keyword in UNION_KEYWORDS {
            if let Some(alternatives) = obj.get(*keyword) {
                return self.union(keyword, alternatives, path);
            }
        }

        match obj.get("type") {
            Some(Value::String(keyword)) => self.typed(keyword, obj, path),
            Some(Value::Array(keywords)) => self.multi_typed(keywords, obj, path),
            Some(other) => Err(self.unsupported(path, format!("invalid 'type' keyword: {other}"))),
            // `properties`/`items` without `type` are unambiguous.
            None if obj.contains_key("properties") => self.object(obj, path),
            None if obj.contains_key("items") => self.array(obj, path),
            None => Err(self.unsupported(
                path,
                "no 'type', 'enum', 'const', 'anyOf' or 'oneOf' to infer from",
            )),
        }
    }

    fn typed(&self, keyword: &str, obj: &Map<String, Value>, path: &str) -> Result<TypeNode, ClientError> {
        match keyword {
            "object" => self.object(obj, path),
            "array" => self.array(obj, path),
            other => PrimitiveKind::from_keyword(other)
                .map(TypeNode::primitive)
                .ok_or_else(|| self.unsupported(path, format!("unknown type '{other}'"))),
        }
    }

    /// `"type": ["string", "null"]` → union in declaration order.
    fn multi_typed(&self, keywords: &[Value], obj: &Map<String, Value>, path: &str) -> Result<TypeNode, ClientError> {
        if keywords.is_empty() {
            return Err(self.unsupported(path, "empty 'type' list"));
        }
        let mut variants = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let keyword = keyword
                .as_str()
                .ok_or_else(|| self.unsupported(path, format!("non-string type keyword: {keyword}")))?;
            variants.push(self.typed(keyword, obj, path)?);
        }
        if variants.len() == 1 {
            return Ok(variants.remove(0));
        }
        Ok(TypeNode::Union { variants })
    }

    fn enumeration(&self, values: &Value, path: &str) -> Result<TypeNode, ClientError> {
        let values = values
            .as_array()
            .ok_or_else(|| self.unsupported(path, "'enum' must be an array"))?;
        if values.is_empty() {
            return Err(self.unsupported(path, "'enum' has no values"));
        }
        let mut literals: Vec<Value> = Vec::with_capacity(values.len());
        for value in values {
            if !literals.contains(value) {
                literals.push(value.clone());
            }
        }
        Ok(TypeNode::Enum { values: literals })
    }

    fn union(&self, keyword: &str, alternatives: &Value, path: &str) -> Result<TypeNode, ClientError> {
        let alternatives = alternatives
            .as_array()
            .ok_or_else(|| self.unsupported(path, format!("'{keyword}' must be an array")))?;
        if alternatives.is_empty() {
            return Err(self.unsupported(path, format!("'{keyword}' has no alternatives")));
        }
        let variants = alternatives
            .iter()
            .enumerate()
            .map(|(i, alt)| self.node(alt, &format!("{path}<{keyword}:{i}>")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TypeNode::Union { variants })
    }

    fn array(&self, obj: &Map<String, Value>, path: &str) -> Result<TypeNode, ClientError> {
        match obj.get("items") {
            Some(items @ Value::Object(_)) => {
                Ok(TypeNode::array(self.node(items, &format!("{path}[]"))?))
            }
            Some(Value::Array(_)) => Err(self.unsupported(path, "tuple arrays are not supported")),
            Some(other) => Err(self.unsupported(path, format!("invalid 'items': {other}"))),
            None => Err(self.unsupported(path, "array without an 'items' schema")),
        }
    }

    fn object(&self, obj: &Map<String, Value>, path: &str) -> Result<TypeNode, ClientError> {
        let properties = match obj.get("properties") {
            None => None,
            Some(Value::Object(props)) => Some(props),
            Some(other) => {
                return Err(self.unsupported(path, format!("'properties' must be an object, found {other}")))
            }
        };

        let required = self.required_names(obj, path)?;

        let mut fields = Vec::new();
        if let Some(props) = properties {
            for (name, sub) in props {
                let node = self.node(sub, &join_path(path, name))?;
                let node = if required.contains(name) {
                    node
                } else {
                    TypeNode::optional(node)
                };
                fields.push(ObjectField {
                    name: name.clone(),
                    node,
                });
            }
        }

        if let Some(undeclared) = required
            .iter()
            .find(|name| !fields.iter().any(|f| &f.name == *name))
        {
            return Err(self.unsupported(
                &join_path(path, undeclared),
                "listed in 'required' but not declared in 'properties'",
            ));
        }

        let closed = matches!(obj.get("additionalProperties"), Some(Value::Bool(false)));

        Ok(TypeNode::Object(ObjectType {
            fields,
            required,
            closed,
        }))
    }

    fn required_names(&self, obj: &Map<String, Value>, path: &str) -> Result<BTreeSet<String>, ClientError> {
        let Some(required) = obj.get("required") else {
            return Ok(BTreeSet::new());
        };
        let list = required
            .as_array()
            .ok_or_else(|| self.unsupported(path, "'required' must be an array"))?;
        list.iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.unsupported(path, format!("non-string entry in 'required': {v}")))
            })
            .collect()
    }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

/// Join a parent path and a field name with a dot.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Render a path for error messages; the root is `$`.
pub(crate) fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
