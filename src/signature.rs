// Function signatures: parameter names, optional type tags, declared return type
// Binding is positional and lenient about argument counts

use crate::context::ExecutionContext;
use crate::value::Value;

/// Function parameter definition
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Variable name the argument is bound to, including the `$` sigil.
    pub name: String,
    /// Declared type; informational only.
    pub type_name: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            type_name: None,
        }
    }

    pub fn typed(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            type_name: Some(type_name.into()),
        }
    }
}

/// Function signature
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    pub params: Vec<Parameter>,
    pub return_type: Option<String>,
}

impl Signature {
    pub fn new(params: Vec<Parameter>) -> Self {
        Signature {
            params,
            return_type: None,
        }
    }

    /// Signature with plain untyped parameters.
    pub fn of(names: &[&str]) -> Self {
        Signature::new(names.iter().map(|n| Parameter::new(*n)).collect())
    }

    pub fn returning(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = Some(type_name.into());
        self
    }

    /// Bind the first `min(args, params)` arguments by name into a fresh function
    /// scope. Extra arguments are dropped; missing ones stay unbound.
    pub fn bind(&self, args: Vec<Value>, context: &mut ExecutionContext) {
        for (param, arg) in self.params.iter().zip(args) {
            // a function scope only holds globals, which parameters may shadow
            let key = param.name.as_str();
            if context.operation.set_variable(key, arg.clone()).is_err() {
                let previous = context.operation.own_binding(key);
                context.operation.restore_binding(
                    key,
                    previous.map(|mut v| {
                        v.value = arg;
                        v.read_only = false;
                        v.global = false;
                        v
                    }),
                );
            }
        }
    }

    /// Tag an object return value with the declared return type.
    pub fn apply_return_type(&self, value: Value) -> Value {
        match (&self.return_type, &value) {
            (Some(type_name), Value::Object(_)) => value.with_type(type_name),
            _ => value,
        }
    }
}
