// User functions, host calls, annotations and modifiers
// Every call boundary wraps failures with its name and position

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::ast::{Command, ConditionExpr, FunctionId, Position};
use crate::context::{self, AnnotationCall, Callable, ExecutionContext, FunctionCall, FALLBACK_EXTENSION};
use crate::evaluator::{Evaluator, Flow, TransformError};
use crate::result::CommandResult;
use crate::signature::Signature;
use crate::value::Value;

/// A compiled function of a module.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub signature: Signature,
    pub body: Command,
    pub position: Position,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, signature: Signature, body: Command) -> Self {
        FunctionDecl {
            name: name.into(),
            signature,
            body,
            position: Position::default(),
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }
}

/// A linked function table. Call sites refer to entries by [`FunctionId`].
#[derive(Debug, Default)]
pub struct Module {
    name: String,
    functions: Vec<FunctionDecl>,
    index: HashMap<String, FunctionId>,
}

impl Module {
    pub(crate) fn from_parts(name: String, functions: Vec<FunctionDecl>) -> Self {
        let index = functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.to_lowercase(), FunctionId(i)))
            .collect();
        Module {
            name,
            functions,
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions(&self) -> &[FunctionDecl] {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionDecl> {
        self.functions.get(id.0)
    }

    /// Find a function by its declared name.
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.index.get(&name.to_lowercase()).copied()
    }

    /// Find the target of a call written as `this.<fn>` or `<module>.<fn>`.
    pub fn resolve(&self, call_name: &str) -> Option<FunctionId> {
        let lower = call_name.to_lowercase();
        let module_prefix = format!("{}.", self.name.to_lowercase());
        let local = lower
            .strip_prefix("this.")
            .or_else(|| {
                if self.name.is_empty() {
                    None
                } else {
                    lower.strip_prefix(module_prefix.as_str())
                }
            })?;
        self.index.get(local).copied()
    }

    /// Expose a function to host code as a plain callable.
    pub fn callable(self: &Arc<Self>, id: FunctionId) -> Callable {
        let module = Arc::clone(self);
        context::callable(move |call| {
            let params = std::mem::take(&mut call.parameters);
            let value = call.evaluator().invoke_function(
                &module,
                id,
                params,
                call.context,
                &call.command.position,
            )?;
            Ok(value)
        })
    }
}

// ── Failure wrapping ─────────────────────────────────────────────────────────

/// Re-wrap a failure raised behind a call boundary.
///
/// Transformation failures keep their original cause and get the call site
/// prepended to the message; anything else becomes the cause of a new failure.
pub(crate) fn wrap_failure(label: &str, position: &Position, error: anyhow::Error) -> TransformError {
    match error.downcast::<TransformError>() {
        Ok(TransformError::Failed { message, source, .. }) => TransformError::Failed {
            message: format!("Could not Execute '{}' at {}.\n{}", label, position, message),
            position: position.clone(),
            source,
        },
        Ok(invalid @ TransformError::Invalid(_)) => invalid,
        Err(other) => TransformError::Failed {
            message: format!("Could not Execute '{}'. Error='{}' at {}.", label, other, position),
            position: position.clone(),
            source: Some(other.into()),
        },
    }
}

fn unknown_function(name: &str, position: &Position) -> Flow {
    TransformError::new(
        format!("Could not Execute '@.{}'. Error='Unknown Function: {}'", name, name),
        position.clone(),
    )
    .into()
}

impl Evaluator {
    /// Run function `id` of `module` in a fresh function scope.
    pub fn invoke_function(
        &self,
        module: &Arc<Module>,
        id: FunctionId,
        args: Vec<Value>,
        caller: &ExecutionContext,
        position: &Position,
    ) -> Result<Value, TransformError> {
        let decl = module.function(id).ok_or_else(|| {
            TransformError::Invalid(format!(
                "Function #{} is not part of module '{}'",
                id.0,
                module.name()
            ))
        })?;
        if caller.depth() >= self.config().max_call_depth {
            return Err(TransformError::new(
                format!(
                    "Maximum call depth of {} exceeded calling '{}' at {}.",
                    self.config().max_call_depth,
                    decl.name,
                    position
                ),
                position.clone(),
            ));
        }
        trace!(function = %decl.name, depth = caller.depth(), "invoke");

        let mut scope = caller.function_child(Some(Arc::clone(module)));
        decl.signature.bind(args, &mut scope);
        let value = self.run_block(&decl.body, &mut scope)?;
        Ok(decl.signature.apply_return_type(value))
    }

    pub(crate) fn eval_args(&self, args: &[Command], ctx: &mut ExecutionContext) -> Result<Vec<Value>, Flow> {
        args.iter()
            .map(|a| Ok(self.value_of(a, ctx)?.unwrap_or(Value::Null)))
            .collect()
    }

    pub(crate) fn exec_call(
        &self,
        command: &Command,
        name: &str,
        args: &[Command],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let function = ctx
            .operation
            .get_extension(name)
            .or_else(|| ctx.operation.get_extension(FALLBACK_EXTENSION));
        let params = self.eval_args(args, ctx)?;
        let Some(function) = function else {
            return Err(unknown_function(name, &command.position));
        };
        let mut call = FunctionCall::new(name, command, ctx, params, self, None);
        let value = function(&mut call)
            .map_err(|e| wrap_failure(&format!("@.{}", name), &command.position, e))?;
        Ok(CommandResult::value(value))
    }

    pub(crate) fn exec_hardwired_call(
        &self,
        command: &Command,
        name: &str,
        id: FunctionId,
        args: &[Command],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let module = ctx.operation.module().cloned().ok_or_else(|| {
            TransformError::Invalid(format!(
                "Linked call '{}' at {} ran outside of its module",
                name, command.position
            ))
        })?;
        let params = self.eval_args(args, ctx)?;
        let value = self
            .invoke_function(&module, id, params, ctx, &command.position)
            .map_err(|e| wrap_failure(&format!("@.{}", name), &command.position, e.into()))?;
        Ok(CommandResult::value(value))
    }

    pub(crate) fn exec_statement_call(
        &self,
        command: &Command,
        name: &str,
        args: &[Command],
        body: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let function = ctx.operation.get_statement_extension(name);
        let params = self.eval_args(args, ctx)?;
        let Some(function) = function else {
            return Err(unknown_function(name, &command.position));
        };
        let mut call = FunctionCall::new(name, command, ctx, params, self, Some(body));
        let value = function(&mut call)
            .map_err(|e| wrap_failure(&format!("@.{}", name), &command.position, e))?;
        Ok(CommandResult::value(value))
    }

    pub(crate) fn exec_annotation(
        &self,
        command: &Command,
        name: &str,
        function_name: &str,
        args: &[Command],
        next: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let handler = ctx.operation.get_annotation(name);
        let params = self.eval_args(args, ctx)?;
        let Some(handler) = handler else {
            warn!(annotation = %name, position = %command.position, "unknown annotation");
            return Ok(CommandResult::value(format!("Unknown Annotation: {}", name)));
        };
        let mut call = AnnotationCall::new(name, function_name, command, ctx, params, next, self);
        let value = handler(&mut call)
            .map_err(|e| wrap_failure(&format!("@{}", name), &command.position, e))?;
        Ok(CommandResult::value(value))
    }

    // ── Modifiers ──

    pub(crate) fn exec_modifier(
        &self,
        command: &Command,
        name: &str,
        value: &Command,
        args: &[Command],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let piped = self.value_of(value, ctx)?;
        let (key, selector) = match name.split_once('.') {
            Some((head, rest)) => (format!("modifier.{}.*", head), Some(rest)),
            None => (format!("modifier.{}", name), None),
        };
        let Some(modifier) = ctx.operation.get_extension(&key) else {
            return Ok(CommandResult::value(format!("Unknown Modifier: {}", name)));
        };

        let mut params = Vec::with_capacity(args.len() + 2);
        params.push(piped.unwrap_or(Value::Null));
        if let Some(selector) = selector {
            params.push(Value::from(selector));
        }
        params.extend(self.eval_args(args, ctx)?);

        let mut call = FunctionCall::new(name, command, ctx, params, self, None);
        let result = modifier(&mut call)
            .map_err(|e| wrap_failure(&format!("@.{}", name), &command.position, e))?;
        Ok(CommandResult::value(result))
    }

    /// `| filter( condition )`: keep the elements the condition accepts.
    pub(crate) fn exec_filter(
        &self,
        command: &Command,
        value: &Command,
        condition: &ConditionExpr,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let Some(source) = self.value_of(value, ctx)? else {
            return Ok(CommandResult::none());
        };
        let Some(elements) = source.iter_elements() else {
            return Ok(CommandResult::none());
        };

        let saved = (ctx.operation.own_binding("$"), ctx.operation.own_binding("$fit"));
        let mut kept = Vec::new();
        let outcome = (|| {
            for element in elements {
                bind(ctx, "$", element.clone(), &command.position)?;
                bind(ctx, "$fit", element.clone(), &command.position)?;
                if self.eval_condition(condition, ctx)? {
                    kept.push(element);
                }
            }
            Ok::<_, Flow>(())
        })();
        ctx.operation.restore_binding("$", saved.0);
        ctx.operation.restore_binding("$fit", saved.1);
        outcome?;
        Ok(CommandResult::value(Value::array(kept)))
    }

    /// `| map( expression )`: transform each element, bound to `$`.
    pub(crate) fn exec_map(
        &self,
        command: &Command,
        value: &Command,
        mapper: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let Some(source) = self.value_of(value, ctx)? else {
            return Ok(CommandResult::none());
        };
        let Some(elements) = source.iter_elements() else {
            return Ok(CommandResult::none());
        };

        let saved = ctx.operation.own_binding("$");
        let mut mapped = Vec::new();
        let outcome = (|| {
            for element in elements {
                bind(ctx, "$", element, &command.position)?;
                mapped.push(self.value_of(mapper, ctx)?.unwrap_or(Value::Null));
            }
            Ok::<_, Flow>(())
        })();
        ctx.operation.restore_binding("$", saved);
        outcome?;
        Ok(CommandResult::value(Value::array(mapped)))
    }

    /// `| reduce( expression )`: fold with `$acc` (starting at `""`) and `$it`.
    pub(crate) fn exec_reduce(
        &self,
        command: &Command,
        value: &Command,
        reducer: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let source = self.value_of(value, ctx)?;
        let saved = (ctx.operation.own_binding("$acc"), ctx.operation.own_binding("$it"));

        let mut acc = Some(Value::from(""));
        let outcome = (|| {
            if let Some(elements) = source.as_ref().and_then(Value::iter_elements) {
                for element in elements {
                    bind(ctx, "$it", element, &command.position)?;
                    bind(ctx, "$acc", acc.take().unwrap_or(Value::Null), &command.position)?;
                    acc = self.value_of(reducer, ctx)?;
                }
            }
            Ok::<_, Flow>(())
        })();
        ctx.operation.restore_binding("$acc", saved.0);
        ctx.operation.restore_binding("$it", saved.1);
        outcome?;
        Ok(CommandResult::from_option(acc))
    }

    pub(crate) fn exec_return(&self, value: &Command, ctx: &mut ExecutionContext) -> Result<CommandResult, Flow> {
        let value = self.value_of(value, ctx)?;
        Err(Flow::Return(value))
    }
}

/// Set a transient binding, turning a read-only refusal into a positioned failure.
pub(crate) fn bind(ctx: &mut ExecutionContext, name: &str, value: Value, position: &Position) -> Result<(), Flow> {
    ctx.operation
        .set_variable(name, value)
        .map_err(|e| TransformError::with_source(format!("{} at {}", e, position), position.clone(), e).into())
}
