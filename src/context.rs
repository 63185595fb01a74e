// Execution context: variable scopes, host registries, call contexts
// Child contexts share their parent through Arc pointers and never mutate it

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::ast::Command;
use crate::evaluator::{Evaluator, TransformError};
use crate::functions::Module;
use crate::value::Value;

/// A host function: receives the call context and returns a value or fails.
pub type Callable = Arc<dyn Fn(&mut FunctionCall<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// A host annotation handler.
pub type AnnotationCallable =
    Arc<dyn Fn(&mut AnnotationCall<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// Box a closure as a [`Callable`].
pub fn callable<F>(f: F) -> Callable
where
    F: Fn(&mut FunctionCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry key of the handler used when no extension matches a call.
pub const FALLBACK_EXTENSION: &str = "*";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("Could not set readonly variable={0}.")]
    ReadOnly(String),
}

// ── Variables ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub read_only: bool,
    /// Globals are carried into every function scope.
    pub global: bool,
}

impl Variable {
    pub fn new(value: Value) -> Self {
        Variable {
            value,
            read_only: false,
            global: false,
        }
    }
}

/// One level of the scope chain. The map is copied on write, so freezing a scope
/// for a parallel child is a pointer copy.
#[derive(Debug, Clone, Default)]
struct Scope {
    variables: Arc<HashMap<String, Variable>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn lookup(&self, key: &str) -> Option<&Variable> {
        match self.variables.get(key) {
            Some(v) => Some(v),
            None => self.parent.as_deref().and_then(|p| p.lookup(key)),
        }
    }

    fn collect_globals(&self, into: &mut HashMap<String, Variable>) {
        if let Some(parent) = &self.parent {
            parent.collect_globals(into);
        }
        for (k, v) in self.variables.iter().filter(|(_, v)| v.global) {
            into.insert(k.clone(), v.clone());
        }
    }
}

#[inline]
fn variable_key(name: &str) -> String {
    name.to_lowercase()
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Host-registered extensions, statement extensions and annotations.
/// Names are matched case-insensitively.
#[derive(Clone, Default)]
pub struct Registry {
    extensions: HashMap<String, Callable>,
    statement_extensions: HashMap<String, Callable>,
    annotations: HashMap<String, AnnotationCallable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in modifier library and the
    /// `Pagination.*` statement extensions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register(&mut registry);
        registry
    }

    pub fn register_extension<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut FunctionCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.extensions.insert(name.to_lowercase(), callable(f));
    }

    /// Extensions reachable through the `name(args) { block }` call form.
    pub fn register_statement_extension<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut FunctionCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.statement_extensions.insert(name.to_lowercase(), callable(f));
    }

    pub fn register_annotation<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut AnnotationCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.annotations.insert(name.to_lowercase(), Arc::new(f));
    }

    /// Handler invoked for calls that match nothing else.
    pub fn register_fallback<F>(&mut self, f: F)
    where
        F: Fn(&mut FunctionCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.extensions
            .insert(FALLBACK_EXTENSION.to_string(), Arc::new(f));
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field(
                "statement_extensions",
                &self.statement_extensions.keys().collect::<Vec<_>>(),
            )
            .field("annotations", &self.annotations.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Operation context ────────────────────────────────────────────────────────

/// Variables, registries and the active module of one transformation run.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    scope: Scope,
    registry: Arc<Registry>,
    module: Option<Arc<Module>>,
}

impl OperationContext {
    pub fn new(registry: Registry) -> Self {
        OperationContext {
            scope: Scope::default(),
            registry: Arc::new(registry),
            module: None,
        }
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        Arc::make_mut(&mut self.registry)
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.scope.lookup(&variable_key(name)).map(|v| &v.value)
    }

    pub fn get_transform_variable(&self, name: &str) -> Option<&Variable> {
        self.scope.lookup(&variable_key(name))
    }

    /// Write a variable into the current scope, shadowing any outer binding.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<(), ContextError> {
        let key = variable_key(name);
        if self.scope.lookup(&key).is_some_and(|v| v.read_only) {
            return Err(ContextError::ReadOnly(name.to_string()));
        }
        Arc::make_mut(&mut self.scope.variables).insert(key, Variable::new(value));
        Ok(())
    }

    /// Install a read-only variable visible in every function scope.
    pub fn set_global(&mut self, name: &str, value: Value) {
        Arc::make_mut(&mut self.scope.variables).insert(
            variable_key(name),
            Variable {
                value,
                read_only: true,
                global: true,
            },
        );
    }

    /// The binding this scope itself holds for `name`, ignoring parents.
    pub fn own_binding(&self, name: &str) -> Option<Variable> {
        self.scope.variables.get(&variable_key(name)).cloned()
    }

    /// Put back a binding taken with [`own_binding`](Self::own_binding).
    pub fn restore_binding(&mut self, name: &str, previous: Option<Variable>) {
        let vars = Arc::make_mut(&mut self.scope.variables);
        match previous {
            Some(v) => {
                vars.insert(variable_key(name), v);
            }
            None => {
                vars.remove(&variable_key(name));
            }
        }
    }

    pub fn module(&self) -> Option<&Arc<Module>> {
        self.module.as_ref()
    }

    pub fn use_module(&mut self, module: Arc<Module>) {
        self.module = Some(module);
    }

    /// Resolve a call target: functions of the active module first, then host
    /// extensions. The fallback handler is registered under [`FALLBACK_EXTENSION`].
    pub fn get_extension(&self, name: &str) -> Option<Callable> {
        if let Some(module) = &self.module {
            if let Some(id) = module.resolve(name) {
                return Some(module.callable(id));
            }
        }
        self.registry.extensions.get(&name.to_lowercase()).cloned()
    }

    pub fn get_statement_extension(&self, name: &str) -> Option<Callable> {
        self.registry
            .statement_extensions
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn get_annotation(&self, name: &str) -> Option<AnnotationCallable> {
        self.registry.annotations.get(&name.to_lowercase()).cloned()
    }

    /// Fresh scope for a function invocation. Registries are shared, globals are
    /// copied, everything else starts unbound.
    pub fn function_child(&self, module: Option<Arc<Module>>) -> OperationContext {
        let mut globals = HashMap::new();
        self.scope.collect_globals(&mut globals);
        OperationContext {
            scope: Scope {
                variables: Arc::new(globals),
                parent: None,
            },
            registry: Arc::clone(&self.registry),
            module: module.or_else(|| self.module.clone()),
        }
    }

    /// Isolated scope for one parallel iteration: reads fall through to a frozen
    /// snapshot of this scope, writes stay in the child.
    pub fn parallel_child(&self) -> OperationContext {
        OperationContext {
            scope: Scope {
                variables: Arc::new(HashMap::new()),
                parent: Some(Arc::new(self.scope.clone())),
            },
            registry: Arc::clone(&self.registry),
            module: self.module.clone(),
        }
    }
}

// ── Execution context ────────────────────────────────────────────────────────

/// Everything a command sees while it runs.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub operation: OperationContext,
    local: Option<Arc<dyn Any + Send + Sync>>,
    depth: usize,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("operation", &self.operation)
            .field("has_local", &self.local.is_some())
            .field("depth", &self.depth)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(registry: Registry) -> Self {
        ExecutionContext {
            operation: OperationContext::new(registry),
            local: None,
            depth: 0,
        }
    }

    /// Seed a variable. Seeding replaces any earlier binding, read-only or not.
    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.operation.scope.variables)
            .insert(variable_key(name), Variable::new(value.into()));
        self
    }

    /// Attach host data that every child context and callback can read.
    pub fn with_local<T: Any + Send + Sync>(mut self, local: T) -> Self {
        self.local = Some(Arc::new(local));
        self
    }

    pub fn local<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.local.as_deref().and_then(|l| l.downcast_ref::<T>())
    }

    /// Number of user-function frames above this context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn function_child(&self, module: Option<Arc<Module>>) -> ExecutionContext {
        ExecutionContext {
            operation: self.operation.function_child(module),
            local: self.local.clone(),
            depth: self.depth + 1,
        }
    }

    pub fn parallel_child(&self) -> ExecutionContext {
        ExecutionContext {
            operation: self.operation.parallel_child(),
            local: self.local.clone(),
            depth: self.depth,
        }
    }
}

// ── Call contexts ────────────────────────────────────────────────────────────

/// What a host extension receives when it is called.
pub struct FunctionCall<'a> {
    pub name: &'a str,
    pub command: &'a Command,
    pub context: &'a mut ExecutionContext,
    pub parameters: Vec<Value>,
    evaluator: &'a Evaluator,
    block: Option<&'a Command>,
}

impl<'a> FunctionCall<'a> {
    pub(crate) fn new(
        name: &'a str,
        command: &'a Command,
        context: &'a mut ExecutionContext,
        parameters: Vec<Value>,
        evaluator: &'a Evaluator,
        block: Option<&'a Command>,
    ) -> Self {
        FunctionCall {
            name,
            command,
            context,
            parameters,
            evaluator,
            block,
        }
    }

    /// Positional argument `index`; absent when the caller passed fewer.
    pub fn parameter(&self, index: usize) -> Option<&Value> {
        self.parameters.get(index)
    }

    pub fn evaluator(&self) -> &'a Evaluator {
        self.evaluator
    }

    pub fn has_block(&self) -> bool {
        self.block.is_some()
    }

    /// Run the statement block supplied at the call site against the caller's
    /// context. A `return` inside the block becomes the block's value.
    pub fn run_block(&mut self) -> Result<Value, TransformError> {
        match self.block {
            Some(block) => self.evaluator.run_block(block, self.context),
            None => Ok(Value::Null),
        }
    }
}

/// What a host annotation handler receives.
pub struct AnnotationCall<'a> {
    pub name: &'a str,
    /// The function the annotation decorates.
    pub function_name: &'a str,
    pub command: &'a Command,
    pub context: &'a mut ExecutionContext,
    pub parameters: Vec<Value>,
    pub next: &'a Command,
    evaluator: &'a Evaluator,
}

impl<'a> AnnotationCall<'a> {
    pub(crate) fn new(
        name: &'a str,
        function_name: &'a str,
        command: &'a Command,
        context: &'a mut ExecutionContext,
        parameters: Vec<Value>,
        next: &'a Command,
        evaluator: &'a Evaluator,
    ) -> Self {
        AnnotationCall {
            name,
            function_name,
            command,
            context,
            parameters,
            next,
            evaluator,
        }
    }

    pub fn parameter(&self, index: usize) -> Option<&Value> {
        self.parameters.get(index)
    }

    /// Run the wrapped command.
    pub fn run_next(&mut self) -> Result<Value, TransformError> {
        self.evaluator.run_block(self.next, self.context)
    }
}
