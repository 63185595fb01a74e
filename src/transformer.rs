// Transformer: run a named function of a compiled module
// Installs the module and the $isl info global before the body runs

use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::Position;
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::evaluator::{Evaluator, TransformError};
use crate::functions::Module;
use crate::value::Value;

/// Function run by [`Transformer::run_default`].
pub const DEFAULT_FUNCTION: &str = "run";

const ISL_INFO: &str = "$isl";

#[derive(Debug, Clone)]
pub struct Transformer {
    module: Arc<Module>,
    evaluator: Evaluator,
}

impl Transformer {
    pub fn new(module: Module) -> Self {
        Transformer {
            module: Arc::new(module),
            evaluator: Evaluator::new(),
        }
    }

    pub fn with_config(module: Module, config: EngineConfig) -> Self {
        Transformer {
            module: Arc::new(module),
            evaluator: Evaluator::with_config(config),
        }
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Run `function_name` in `ctx`.
    ///
    /// The body sees the caller's variables directly; parameters are only bound for
    /// calls made from ISL code. An absent result comes back as `Null`.
    #[tracing::instrument(level = "debug", skip(self, ctx), fields(module = self.module.name()))]
    pub fn run(&self, function_name: &str, ctx: &mut ExecutionContext) -> Result<Value, TransformError> {
        let Some(id) = self.module.function_id(function_name) else {
            return Err(TransformError::new(
                format!("Unknown Function @.{}.{}", self.module.name(), function_name),
                Position::new(self.module.name(), 0, 0),
            ));
        };
        let Some(decl) = self.module.function(id) else {
            return Err(TransformError::Invalid(format!(
                "Function #{} is not part of module '{}'",
                id.0,
                self.module.name()
            )));
        };

        if ctx.operation.get_variable(ISL_INFO).is_none() {
            ctx.operation.set_global(ISL_INFO, self.info());
        }
        ctx.operation.use_module(Arc::clone(&self.module));

        let value = self.evaluator.run_block(&decl.body, ctx)?;
        Ok(decl.signature.apply_return_type(value))
    }

    pub fn run_default(&self, ctx: &mut ExecutionContext) -> Result<Value, TransformError> {
        self.run(DEFAULT_FUNCTION, ctx)
    }

    /// The `$isl` object: engine version and parallel worker limit.
    pub fn info(&self) -> Value {
        let mut info = IndexMap::new();
        info.insert("version".to_string(), Value::from(env!("CARGO_PKG_VERSION")));
        info.insert(
            "maxParallelWorkers".to_string(),
            Value::from(self.evaluator.config().max_parallel_workers),
        );
        Value::object(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Command;
    use crate::compiler::ModuleBuilder;
    use crate::functions::FunctionDecl;
    use crate::signature::Signature;

    fn module(body: Command) -> Module {
        let mut builder = ModuleBuilder::new("sample");
        builder
            .add_function(FunctionDecl::new("run", Signature::default(), body))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_run_sees_caller_variables() {
        let transformer = Transformer::new(module(Command::variable("$input")));
        let mut ctx = ExecutionContext::default().with_variable("$input", "hello");
        assert_eq!(transformer.run_default(&mut ctx).unwrap(), Value::from("hello"));
    }

    #[test]
    fn test_isl_info_is_installed_read_only() {
        let transformer = Transformer::with_config(
            module(Command::path(
                "$isl",
                vec![crate::ast::PathSegment::Property("maxParallelWorkers".into())],
            )),
            EngineConfig::default().with_max_parallel_workers(7),
        );
        let mut ctx = ExecutionContext::default();
        assert_eq!(transformer.run("RUN", &mut ctx).unwrap(), Value::from(7i64));
        let isl = ctx.operation.get_transform_variable("$isl").unwrap();
        assert!(isl.read_only);
        assert_eq!(
            isl.value.get("version"),
            Some(&Value::from(env!("CARGO_PKG_VERSION")))
        );
    }

    #[test]
    fn test_unknown_function() {
        let transformer = Transformer::new(module(Command::noop()));
        let err = transformer
            .run("missing", &mut ExecutionContext::default())
            .unwrap_err();
        assert_eq!(err.message(), "Unknown Function @.sample.missing");
    }

    #[test]
    fn test_absent_result_is_null() {
        let transformer = Transformer::new(module(Command::variable("$nothing")));
        assert_eq!(
            transformer.run_default(&mut ExecutionContext::default()).unwrap(),
            Value::Null
        );
    }
}
