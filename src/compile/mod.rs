//! Compilation: expanded actions → core/wrapper function pairs.

pub mod checks;
pub mod context;
pub mod expression;
pub mod identifier;
pub mod identity;
pub mod orchestrator;
pub mod response;
pub mod sql;
pub mod steps;

pub use expression::{CompiledExpr, ExprScope, compile_expression};
pub use orchestrator::{Orchestrator, infer_kind};
pub use steps::{Fragment, compile_step, compile_steps};
