// isl-runtime - Execution engine for ISL JSON-to-JSON transformations
// Copyright (c) 2025 isl-runtime contributors
// Licensed under the MIT License

//! # isl-runtime
//!
//! Executes compiled ISL transformation programs: trees of commands that read
//! variables and build JSON output.
//!
//! ## Architecture
//!
//! - `value` - JSON value model shared across threads
//! - `ast` - Command tree, source positions, path and arithmetic forms
//! - `condition` - Operator semantics for comparisons
//! - `context` - Variable scopes, host extension registries, call contexts
//! - `evaluator` - Command dispatch and value building
//! - `functions` - Calls, statement calls, annotations, modifiers
//! - `builtins` - Modifier library and pagination statements (`Registry::with_builtins`)
//! - `compiler` - Module builder: linking and tree optimizations
//! - `transformer` - Runs a named function of a compiled module
//! - `config` - Engine limits
//! - `datetime` - Instant parsing and formatting
//! - `signature` - Parameter binding and return types
//! - `utils` - Value coercions
//!
//! ## Example
//!
//! ```
//! use isl_runtime::{execute, Command, ExecutionContext, Value};
//!
//! let program = Command::object(vec![
//!     Command::assign("name", Command::variable("$input")),
//! ]);
//! let mut ctx = ExecutionContext::default().with_variable("$input", "ISL");
//! let out = execute(&program, &mut ctx).unwrap();
//! assert_eq!(out.get("name"), Some(&Value::from("ISL")));
//! ```

pub mod ast;
mod builtins;
pub mod compiler;
pub mod condition;
pub mod config;
pub mod context;
mod control;
pub mod datetime;
pub mod evaluator;
pub mod functions;
mod parallel;
pub mod result;
pub mod signature;
pub mod transformer;
pub mod utils;
pub mod value;

pub use ast::{ArithOp, Command, CommandKind, ConditionExpr, PathSegment, Position, SwitchCase};
pub use compiler::{CompileError, ModuleBuilder};
pub use condition::Operator;
pub use config::EngineConfig;
pub use context::{
    AnnotationCall, ExecutionContext, FunctionCall, OperationContext, Registry, FALLBACK_EXTENSION,
};
pub use evaluator::{Evaluator, TransformError};
pub use functions::{FunctionDecl, Module};
pub use result::CommandResult;
pub use signature::{Parameter, Signature};
pub use transformer::Transformer;
pub use value::Value;

/// Execute a command tree with a default [`Evaluator`].
pub fn execute(command: &Command, ctx: &mut ExecutionContext) -> Result<Value, TransformError> {
    Evaluator::new().evaluate(command, ctx)
}
