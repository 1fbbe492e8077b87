//! Schema model: inference from JSON Schema, argument validation, and
//! field-name normalization.

pub mod inference;
pub mod normalize;
pub mod types;
pub mod validate;

pub use inference::{infer_parameters, infer_returns, infer_schema};
pub use normalize::{default_rules, NormalizationRule, NormalizationTable};
pub use types::{ObjectField, ObjectType, PrimitiveKind, TypeNode};
pub use validate::validate_arguments;
