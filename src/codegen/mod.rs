//! Wrapper and test-parameter generation from discovered tool descriptors.
//!
//! Everything produced here passes through [`artifact`] before it is handed
//! out; a structurally invalid artifact is an error, never a return value.

pub mod artifact;
pub mod test_params;
pub mod wrapper;

pub use artifact::{validate_snapshot, validate_test_parameters, validate_wrapper};
pub use test_params::{CoverageClass, TestCase, TestParameterSet};
pub use wrapper::{generate_wrapper, CallingConvention, GeneratedWrapper, WrapperParam};
