//! Callable wrapper contracts derived from tool descriptors.
//!
//! Parameter order depends on the calling convention:
//! - `Keyword`: schema declaration order, untouched.
//! - `Positional`: required parameters first, then optional ones, each group
//!   in declaration order, so optional trailing arguments can be omitted.
//!
//! Both orders are pure functions of the descriptor, so regenerating from an
//! unchanged schema yields an identical wrapper.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::artifact;
use crate::errors::ClientError;
use crate::mcp_client::types::ToolDescriptor;
use crate::schema::validate::{self, conforms};
use crate::schema::{ObjectField, ObjectType, TypeNode};

/// How a target language binds arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    #[default]
    Keyword,
    Positional,
}

/// One wrapper parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrapperParam {
    /// Field name as the server declares it.
    pub name: String,
    /// Host-language identifier.
    pub ident: String,
    /// Parameter type, without the `Optional` marker.
    pub node: TypeNode,
    pub required: bool,
    pub default: Option<Value>,
    /// Schema-declared example (`examples[0]` or `example`).
    pub example: Option<Value>,
}

/// Generated callable surface for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedWrapper {
    pub tool: String,
    pub function_name: String,
    pub description: String,
    pub convention: CallingConvention,
    pub params: Vec<WrapperParam>,
    pub returns: Option<TypeNode>,
    /// The parameter object rejects unknown fields.
    pub closed: bool,
    /// Fingerprint of the descriptor this wrapper was generated from.
    pub source_fingerprint: String,
}

/// Generate and validate a wrapper. Artifacts that fail structural
/// validation are never returned.
pub fn generate_wrapper(
    descriptor: &ToolDescriptor,
    convention: CallingConvention,
) -> Result<GeneratedWrapper, ClientError> {
    let obj = descriptor
        .params
        .as_object()
        .ok_or_else(|| ClientError::UnsupportedSchema {
            tool: descriptor.name.clone(),
            path: "$".into(),
            reason: "tool parameters are not an object".into(),
        })?;

    let mut used_idents = HashSet::new();
    let mut params: Vec<WrapperParam> = obj
        .fields
        .iter()
        .map(|field| {
            let raw = descriptor.property_schema(&field.name);
            WrapperParam {
                name: field.name.clone(),
                ident: unique_ident(to_identifier(&field.name), &mut used_idents),
                node: field.node.unwrap_optional().clone(),
                required: obj.is_required(&field.name),
                default: raw.and_then(|s| s.get("default")).cloned(),
                example: raw.and_then(declared_example),
            }
        })
        .collect();

    if convention == CallingConvention::Positional {
        // Stable sort keeps declaration order inside each group.
        params.sort_by_key(|p| !p.required);
    }

    let wrapper = GeneratedWrapper {
        tool: descriptor.name.clone(),
        function_name: to_identifier(&descriptor.name),
        description: descriptor.description.clone(),
        convention,
        params,
        returns: descriptor.returns.clone(),
        closed: obj.closed,
        source_fingerprint: descriptor.fingerprint.clone(),
    };

    artifact::validate_wrapper(&wrapper)?;
    tracing::debug!(
        tool = %wrapper.tool,
        params = wrapper.params.len(),
        convention = ?convention,
        "generated wrapper"
    );
    Ok(wrapper)
}

fn declared_example(schema: &Value) -> Option<Value> {
    schema
        .get("examples")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .or_else(|| schema.get("example"))
        .cloned()
}

impl GeneratedWrapper {
    /// The parameter object type this wrapper enforces.
    pub fn parameter_type(&self) -> TypeNode {
        TypeNode::Object(ObjectType {
            fields: self
                .params
                .iter()
                .map(|p| ObjectField {
                    name: p.name.clone(),
                    node: if p.required {
                        p.node.clone()
                    } else {
                        TypeNode::optional(p.node.clone())
                    },
                })
                .collect(),
            required: self
                .params
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.clone())
                .collect(),
            closed: self.closed,
        })
    }

    /// Look up a parameter by declared name.
    pub fn param(&self, name: &str) -> Option<&WrapperParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate named arguments and fill defaults for absent optionals.
    pub fn bind(&self, args: &Value) -> Result<Value, ClientError> {
        validate::validate_arguments(&self.tool, &self.parameter_type(), args)?;

        let mut bound = match args {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for param in &self.params {
            if bound.contains_key(&param.name) {
                continue;
            }
            if let Some(default) = &param.default {
                if conforms(&param.node, default) {
                    bound.insert(param.name.clone(), default.clone());
                }
            }
        }
        Ok(Value::Object(bound))
    }

    /// Bind arguments given in wrapper parameter order. `null` in an optional
    /// slot means "omitted".
    pub fn bind_positional(&self, values: &[Value]) -> Result<Value, ClientError> {
        if values.len() > self.params.len() {
            return Err(ClientError::SchemaValidation {
                tool: self.tool.clone(),
                path: "$".into(),
                reason: format!(
                    "expected at most {} arguments, got {}",
                    self.params.len(),
                    values.len()
                ),
            });
        }
        let mut named = Map::new();
        for (param, value) in self.params.iter().zip(values) {
            if value.is_null() && !param.required {
                continue;
            }
            named.insert(param.name.clone(), value.clone());
        }
        self.bind(&Value::Object(named))
    }

    /// Whether the descriptor changed since this wrapper was generated.
    pub fn is_stale(&self, descriptor: &ToolDescriptor) -> bool {
        self.tool != descriptor.name || self.source_fingerprint != descriptor.fingerprint
    }

    /// One-line signature for logs and docs, e.g.
    /// `create_item(title: string, system_assigned_to?: string)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{marker}: {}", p.ident, p.node)
            })
            .collect();
        let returns = self
            .returns
            .as_ref()
            .map(|r| format!(" -> {r}"))
            .unwrap_or_default();
        format!("{}({}){returns}", self.function_name, params.join(", "))
    }
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Convert a field or tool name to a snake_case identifier.
///
/// `System.AssignedTo` → `system_assigned_to`, `9lives` → `_9lives`.
/// Runs of capitals stay together: `getHTTPResponse` → `get_httpresponse`.
/// Only ASCII letters and digits survive, so a wholly non-ASCII name such
/// as `名前` yields `""` and the wrapper fails artifact validation.
pub fn to_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut after_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if after_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            after_lower = false;
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch);
            after_lower = true;
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            after_lower = false;
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

fn unique_ident(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
