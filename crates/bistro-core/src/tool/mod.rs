//! Tool registry and execution.
//!
//! - `registry`: the `Tool` trait, `BoxTool` and the name-keyed `ToolRegistry`
//! - `schema`: argument validation and normalization
//! - `executor`: validated invocation with one retry

pub mod executor;
pub mod registry;
pub mod schema;
