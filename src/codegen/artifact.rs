//! Structural checks on generated artifacts before they are published.
//!
//! Every check runs to completion and all violations are reported together,
//! so one regeneration run surfaces every problem.

use std::collections::HashSet;

use super::test_params::{CoverageClass, TestParameterSet};
use super::wrapper::GeneratedWrapper;
use crate::errors::ClientError;
use crate::mcp_client::types::ToolDescriptor;
use crate::schema::inference::{display_path, join_path};
use crate::schema::TypeNode;

/// Deepest type tree accepted.
pub const MAX_TYPE_DEPTH: usize = 64;

// ─── Violations ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, violation: impl Into<String>) {
        self.0.push(violation.into());
    }

    fn finish(self, artifact: String) -> Result<(), ClientError> {
        if self.0.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            artifact = %artifact,
            violations = self.0.len(),
            "artifact failed validation"
        );
        Err(ClientError::ArtifactInvalid {
            artifact,
            violations: self.0,
        })
    }
}

// ─── Artifacts ───────────────────────────────────────────────────────────────

/// Validate a generated wrapper.
pub fn validate_wrapper(wrapper: &GeneratedWrapper) -> Result<(), ClientError> {
    let mut v = Violations::default();

    if wrapper.tool.trim().is_empty() {
        v.push("tool name is empty");
    }
    if !is_identifier(&wrapper.function_name) {
        v.push(format!("function name '{}' is not a valid identifier", wrapper.function_name));
    }

    let mut names = HashSet::new();
    let mut idents = HashSet::new();
    for param in &wrapper.params {
        if param.name.is_empty() {
            v.push("parameter with empty name");
        }
        if !names.insert(param.name.as_str()) {
            v.push(format!("duplicate parameter '{}'", param.name));
        }
        if !is_identifier(&param.ident) {
            v.push(format!(
                "parameter '{}' has invalid identifier '{}'",
                param.name, param.ident
            ));
        } else if !idents.insert(param.ident.as_str()) {
            v.push(format!("duplicate identifier '{}'", param.ident));
        }
        if param.node.is_optional() {
            v.push(format!("parameter '{}' type carries an optional marker", param.name));
        }
        check_type(&param.node, &param.name, &mut v);
    }

    if let Some(returns) = &wrapper.returns {
        check_type(returns, "<returns>", &mut v);
    }

    v.finish(format!("wrapper:{}", wrapper.tool))
}

/// Validate a test-parameter set against the wrapper it was built for.
pub fn validate_test_parameters(
    wrapper: &GeneratedWrapper,
    set: &TestParameterSet,
) -> Result<(), ClientError> {
    let mut v = Violations::default();

    if set.tool != wrapper.tool {
        v.push(format!(
            "set is for tool '{}' but wrapper is for '{}'",
            set.tool, wrapper.tool
        ));
    }

    let mut labels = HashSet::new();
    for case in &set.cases {
        if !labels.insert(case.label.as_str()) {
            v.push(format!("duplicate case label '{}'", case.label));
        }
        if !case.arguments.is_object() {
            v.push(format!("case '{}' arguments are not an object", case.label));
            continue;
        }

        let outcome = wrapper.bind(&case.arguments);
        match (case.expect_valid, outcome) {
            (true, Err(e)) => v.push(format!("case '{}' should be valid but fails: {e}", case.label)),
            (false, Ok(_)) => v.push(format!("negative case '{}' is accepted", case.label)),
            (false, Err(e)) => {
                if let CoverageClass::InvalidType { field } = &case.class {
                    let hits_field = e
                        .field_path()
                        .is_some_and(|p| p == field || p.starts_with(&format!("{field}.")) || p.starts_with(&format!("{field}[")));
                    if !hits_field {
                        v.push(format!(
                            "negative case '{}' fails outside field '{field}': {e}",
                            case.label
                        ));
                    }
                }
            }
            (true, Ok(_)) => {}
        }

        match &case.class {
            CoverageClass::OmitOptional { field } => match wrapper.param(field) {
                None => v.push(format!("case '{}' names unknown field '{field}'", case.label)),
                Some(p) if p.required => {
                    v.push(format!("case '{}' omits required field '{field}'", case.label))
                }
                Some(_) => {}
            },
            CoverageClass::InvalidType { field } if wrapper.param(field).is_none() => {
                v.push(format!("case '{}' names unknown field '{field}'", case.label));
            }
            _ => {}
        }
    }

    v.finish(format!("test-parameters:{}", set.tool))
}

/// Validate a discovered-schema snapshot (the tool list of one session).
pub fn validate_snapshot(tools: &[ToolDescriptor]) -> Result<(), ClientError> {
    let mut v = Violations::default();
    let mut names = HashSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            v.push("tool with empty name");
        }
        if !names.insert(tool.name.as_str()) {
            v.push(format!("duplicate tool '{}'", tool.name));
        }
        if tool.params.as_object().is_none() {
            v.push(format!("tool '{}' parameters are not an object", tool.name));
        }
        check_type(&tool.params, &tool.name, &mut v);
        if let Some(returns) = &tool.returns {
            check_type(returns, &format!("{}<returns>", tool.name), &mut v);
        }
    }
    v.finish("snapshot".to_string())
}

// ─── Type Trees ──────────────────────────────────────────────────────────────

fn check_type(node: &TypeNode, path: &str, v: &mut Violations) {
    if node.depth() > MAX_TYPE_DEPTH {
        v.push(format!(
            "type at '{}' is deeper than {MAX_TYPE_DEPTH} levels",
            display_path(path)
        ));
        return;
    }
    walk(node, path, v);
}

fn walk(node: &TypeNode, path: &str, v: &mut Violations) {
    match node {
        TypeNode::Primitive { .. } => {}
        TypeNode::Optional { inner } => {
            if inner.is_optional() {
                v.push(format!("nested optional at '{}'", display_path(path)));
            }
            walk(inner, path, v);
        }
        TypeNode::Array { element } => {
            if element.is_optional() {
                v.push(format!("optional array element at '{}'", display_path(path)));
            }
            walk(element, &format!("{path}[]"), v);
        }
        TypeNode::Object(obj) => {
            let mut seen = HashSet::new();
            for field in &obj.fields {
                let field_path = join_path(path, &field.name);
                if field.name.is_empty() {
                    v.push(format!("empty field name in object at '{}'", display_path(path)));
                }
                if !seen.insert(field.name.as_str()) {
                    v.push(format!("duplicate field '{}'", display_path(&field_path)));
                }
                let required = obj.is_required(&field.name);
                if required == field.node.is_optional() {
                    v.push(format!(
                        "field '{}' optional marker disagrees with required set",
                        display_path(&field_path)
                    ));
                }
                walk(field.node.unwrap_optional(), &field_path, v);
            }
            for name in &obj.required {
                if obj.field(name).is_none() {
                    v.push(format!(
                        "required field '{}' is not declared",
                        display_path(&join_path(path, name))
                    ));
                }
            }
        }
        TypeNode::Enum { values } => {
            if values.is_empty() {
                v.push(format!("empty enum at '{}'", display_path(path)));
            }
        }
        TypeNode::Union { variants } => {
            if variants.is_empty() {
                v.push(format!("empty union at '{}'", display_path(path)));
            }
            for (i, variant) in variants.iter().enumerate() {
                if variant.is_optional() {
                    v.push(format!("optional union member at '{}'", display_path(path)));
                }
                walk(variant, &format!("{path}<{i}>"), v);
            }
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, excluding a lone `_`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─── Tests ───────────────────────────────────────────────────────────────────
