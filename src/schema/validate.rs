//! Value validation against inferred types.
//!
//! Failures name the offending field path: dotted segments for object
//! fields and `[i]` for array indices, e.g. `relations[2].url`.

use serde_json::Value;

use super::inference::{display_path, join_path};
use super::types::{PrimitiveKind, TypeNode};
use crate::errors::ClientError;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: String,
    pub reason: String,
}

impl Mismatch {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: display_path(path),
            reason: reason.into(),
        }
    }

    /// Attach the tool name and turn this into a `SchemaValidation` error.
    pub fn into_error(self, tool: &str) -> ClientError {
        ClientError::SchemaValidation {
            tool: tool.to_string(),
            path: self.path,
            reason: self.reason,
        }
    }
}

/// Validate a tool-call argument object against the tool's parameter type.
///
/// `null` arguments are treated as an empty object.
pub fn validate_arguments(tool: &str, params: &TypeNode, args: &Value) -> Result<(), ClientError> {
    let empty = Value::Object(Default::default());
    let args = if args.is_null() { &empty } else { args };
    check(params, args, "").map_err(|m| m.into_error(tool))
}

/// Whether `value` conforms to `node`.
pub fn conforms(node: &TypeNode, value: &Value) -> bool {
    check(node, value, "").is_ok()
}

/// Check `value` against `node`, returning the first mismatch.
pub fn check(node: &TypeNode, value: &Value, path: &str) -> Result<(), Mismatch> {
    match node {
        TypeNode::Primitive { primitive } => check_primitive(*primitive, value, path),
        // Absence is handled by the parent object; a present value must match.
        TypeNode::Optional { inner } => check(inner, value, path),
        TypeNode::Array { element } => {
            let items = value
                .as_array()
                .ok_or_else(|| Mismatch::new(path, format!("expected array, found {}", describe(value))))?;
            for (i, item) in items.iter().enumerate() {
                check(element, item, &format!("{path}[{i}]"))?;
            }
            Ok(())
        }
        TypeNode::Object(obj) => {
            let map = value
                .as_object()
                .ok_or_else(|| Mismatch::new(path, format!("expected object, found {}", describe(value))))?;
            for field in &obj.fields {
                let field_path = join_path(path, &field.name);
                match map.get(&field.name) {
                    Some(v) => check(&field.node, v, &field_path)?,
                    None if obj.is_required(&field.name) => {
                        return Err(Mismatch::new(&field_path, "missing required field"));
                    }
                    None => {}
                }
            }
            if obj.closed {
                if let Some(unknown) = map.keys().find(|k| obj.field(k).is_none()) {
                    return Err(Mismatch::new(&join_path(path, unknown), "unexpected field"));
                }
            }
            Ok(())
        }
        TypeNode::Enum { values } => {
            if values.contains(value) {
                Ok(())
            } else {
                let allowed: Vec<String> = values.iter().map(Value::to_string).collect();
                Err(Mismatch::new(
                    path,
                    format!("{value} is not one of [{}]", allowed.join(", ")),
                ))
            }
        }
        TypeNode::Union { variants } => {
            if variants.iter().any(|v| check(v, value, path).is_ok()) {
                Ok(())
            } else {
                Err(Mismatch::new(path, format!("{} does not match {node}", describe(value))))
            }
        }
    }
}

fn check_primitive(kind: PrimitiveKind, value: &Value, path: &str) -> Result<(), Mismatch> {
    let ok = match kind {
        PrimitiveKind::String => value.is_string(),
        PrimitiveKind::Integer => is_integer(value),
        PrimitiveKind::Number => value.is_number(),
        PrimitiveKind::Boolean => value.is_boolean(),
        PrimitiveKind::Null => value.is_null(),
    };
    if ok {
        Ok(())
    } else {
        Err(Mismatch::new(path, format!("expected {kind}, found {}", describe(value))))
    }
}

/// Integers may arrive as `3` or `3.0`.
fn is_integer(value: &Value) -> bool {
    if value.is_i64() || value.is_u64() {
        return true;
    }
    value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}

/// Short JSON type name of a value, for messages.
pub(crate) fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
