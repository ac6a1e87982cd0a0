//! Compiled action representation and step-sequence validation.

pub mod types;
pub mod validate;

pub use types::*;
pub use validate::{ValidationError, validate_steps};
