//! Representative test parameters for generated wrappers.
//!
//! Four coverage classes per tool:
//! - `RequiredOnly`: the minimum valid call.
//! - `AllFields`: every parameter present.
//! - `OmitOptional`: all fields minus one optional parameter, for each.
//! - `InvalidType`: all fields with one parameter given a value of the
//!   wrong type, for each (negative cases).

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::artifact;
use super::wrapper::{generate_wrapper, CallingConvention, GeneratedWrapper, WrapperParam};
use crate::errors::ClientError;
use crate::mcp_client::types::ToolDescriptor;
use crate::schema::validate::conforms;
use crate::schema::{PrimitiveKind, TypeNode};

/// Which coverage class a case belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum CoverageClass {
    RequiredOnly,
    AllFields,
    OmitOptional { field: String },
    InvalidType { field: String },
}

/// One concrete argument assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCase {
    pub label: String,
    pub class: CoverageClass,
    pub arguments: Value,
    /// `false` for negative cases the wrapper must reject.
    pub expect_valid: bool,
}

/// Ordered test cases for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestParameterSet {
    pub tool: String,
    pub cases: Vec<TestCase>,
}

impl TestParameterSet {
    /// Synthesize cases for a wrapper and check them against it.
    pub fn for_wrapper(wrapper: &GeneratedWrapper) -> Result<Self, ClientError> {
        let set = synthesize(wrapper);
        artifact::validate_test_parameters(wrapper, &set)?;
        Ok(set)
    }

    /// Synthesize cases straight from a descriptor.
    pub fn for_descriptor(descriptor: &ToolDescriptor) -> Result<Self, ClientError> {
        let wrapper = generate_wrapper(descriptor, CallingConvention::Keyword)?;
        Self::for_wrapper(&wrapper)
    }

    pub fn valid_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter().filter(|c| c.expect_valid)
    }

    pub fn invalid_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter().filter(|c| !c.expect_valid)
    }
}

fn synthesize(wrapper: &GeneratedWrapper) -> TestParameterSet {
    let values: Vec<(&WrapperParam, Value)> = wrapper
        .params
        .iter()
        .map(|p| (p, param_value(p)))
        .collect();

    let build = |skip: Option<&str>, replace: Option<(&str, &Value)>, required_only: bool| {
        let mut args = Map::new();
        for (param, value) in &values {
            if required_only && !param.required {
                continue;
            }
            if skip == Some(param.name.as_str()) {
                continue;
            }
            let value = match replace {
                Some((name, bad)) if name == param.name => bad.clone(),
                _ => value.clone(),
            };
            args.insert(param.name.clone(), value);
        }
        Value::Object(args)
    };

    let mut cases = vec![
        TestCase {
            label: "required_only".into(),
            class: CoverageClass::RequiredOnly,
            arguments: build(None, None, true),
            expect_valid: true,
        },
        TestCase {
            label: "all_fields".into(),
            class: CoverageClass::AllFields,
            arguments: build(None, None, false),
            expect_valid: true,
        },
    ];

    for param in wrapper.params.iter().filter(|p| !p.required) {
        cases.push(TestCase {
            label: format!("omit_{}", param.ident),
            class: CoverageClass::OmitOptional {
                field: param.name.clone(),
            },
            arguments: build(Some(param.name.as_str()), None, false),
            expect_valid: true,
        });
    }

    for param in &wrapper.params {
        let Some(bad) = invalid_value(&param.node) else {
            tracing::debug!(
                tool = %wrapper.tool,
                field = %param.name,
                "no ill-typed value exists for field, skipping negative case"
            );
            continue;
        };
        cases.push(TestCase {
            label: format!("invalid_{}", param.ident),
            class: CoverageClass::InvalidType {
                field: param.name.clone(),
            },
            arguments: build(None, Some((param.name.as_str(), &bad)), false),
            expect_valid: false,
        });
    }

    TestParameterSet {
        tool: wrapper.tool.clone(),
        cases,
    }
}

/// Declared example, then default, then a synthesized sample. Declared
/// values that do not conform to the type are ignored.
fn param_value(param: &WrapperParam) -> Value {
    [&param.example, &param.default]
        .into_iter()
        .flatten()
        .find(|v| conforms(&param.node, v))
        .cloned()
        .unwrap_or_else(|| sample_value(&param.node))
}

/// A representative value of type `node`.
pub fn sample_value(node: &TypeNode) -> Value {
    match node {
        TypeNode::Primitive { primitive } => match primitive {
            PrimitiveKind::String => json!("example"),
            PrimitiveKind::Integer => json!(1),
            PrimitiveKind::Number => json!(1.5),
            PrimitiveKind::Boolean => json!(true),
            PrimitiveKind::Null => Value::Null,
        },
        TypeNode::Optional { inner } => sample_value(inner),
        TypeNode::Array { element } => json!([sample_value(element)]),
        TypeNode::Object(obj) => {
            let mut map = Map::new();
            for field in &obj.fields {
                map.insert(field.name.clone(), sample_value(field.node.unwrap_optional()));
            }
            Value::Object(map)
        }
        TypeNode::Enum { values } => values.first().cloned().unwrap_or(Value::Null),
        TypeNode::Union { variants } => variants.first().map(sample_value).unwrap_or(Value::Null),
    }
}

/// A value that does not conform to `node`, if one exists.
pub fn invalid_value(node: &TypeNode) -> Option<Value> {
    let preferred = match node.unwrap_optional() {
        TypeNode::Primitive { primitive } => match primitive {
            PrimitiveKind::String => Some(json!(42)),
            PrimitiveKind::Integer => Some(json!("not-an-integer")),
            PrimitiveKind::Number => Some(json!("not-a-number")),
            PrimitiveKind::Boolean => Some(json!("not-a-boolean")),
            PrimitiveKind::Null => Some(json!("not-null")),
        },
        TypeNode::Enum { .. } => Some(json!("__not_in_enum__")),
        TypeNode::Array { .. } => Some(json!("not-an-array")),
        TypeNode::Object(_) => Some(json!("not-an-object")),
        TypeNode::Union { .. } | TypeNode::Optional { .. } => None,
    };
    let fallbacks = [
        Value::Null,
        json!(true),
        json!(42),
        json!(0.5),
        json!("__invalid__"),
        json!([]),
        json!({}),
    ];
    preferred
        .into_iter()
        .chain(fallbacks)
        .find(|candidate| !conforms(node, candidate))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
