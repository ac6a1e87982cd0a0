pub mod codegen;
pub mod compile;
pub mod config;
pub mod error;
pub mod expand;
pub mod ir;
pub mod parse;
pub mod run;
pub mod schema;
pub mod wasm;
