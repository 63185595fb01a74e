// Command evaluator
// Walks a compiled command tree and folds every node's CommandResult into its parent

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::ast::{
    ArithOp, Arithmetic, Command, CommandKind, Operand, PathSegment, Position, SelectorPath,
    Selection,
};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::functions::bind;
use crate::result::CommandResult;
use crate::utils;
use crate::value::{ObjectMap, Value};

/// Fractional digits kept by division.
const DIVISION_SCALE: u32 = 4;

/// Remaining stack below which a node evaluates on a freshly allocated segment.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Evaluation errors
#[derive(Error, Debug)]
pub enum TransformError {
    /// A positioned transformation failure. `message` already names the position.
    #[error("{message}")]
    Failed {
        message: String,
        position: Position,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The command tree is not executable as built.
    #[error("Invalid command tree: {0}")]
    Invalid(String),
}

impl TransformError {
    pub fn new(message: impl Into<String>, position: Position) -> Self {
        TransformError::Failed {
            message: message.into(),
            position,
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        position: Position,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TransformError::Failed {
            message: message.into(),
            position,
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TransformError::Failed { message, .. } => message,
            TransformError::Invalid(message) => message,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            TransformError::Failed { position, .. } => Some(position),
            TransformError::Invalid(_) => None,
        }
    }
}

/// Non-local exits threaded through the `Err` side of every node.
#[derive(Debug)]
pub(crate) enum Flow {
    Error(TransformError),
    /// A `return` unwinding to the nearest function or block boundary.
    Return(Option<Value>),
}

impl From<TransformError> for Flow {
    fn from(e: TransformError) -> Self {
        Flow::Error(e)
    }
}

/// Executes command trees. Holds only configuration, so one evaluator can serve
/// any number of concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: EngineConfig,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Evaluator {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `command` and return its value.
    ///
    /// A top-level `return` ends the run with its value; absence comes back as `Null`.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = command.kind.kind_name()))]
    pub fn evaluate(
        &self,
        command: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, TransformError> {
        self.run_block(command, ctx)
    }

    /// Run a command as a function body or inline block: `return` stops here.
    pub(crate) fn run_block(
        &self,
        command: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, TransformError> {
        match self.exec(command, ctx) {
            Ok(result) => Ok(result.into_value()),
            Err(Flow::Return(value)) => Ok(value.unwrap_or(Value::Null)),
            Err(Flow::Error(e)) => Err(e),
        }
    }

    #[inline]
    pub(crate) fn value_of(
        &self,
        command: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<Value>, Flow> {
        Ok(self.exec(command, ctx)?.value)
    }

    /// Every node goes through here, so deep recursion in a script grows the
    /// stack instead of overflowing whatever thread the host called from.
    pub(crate) fn exec(
        &self,
        command: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.exec_node(command, ctx))
    }

    fn exec_node(
        &self,
        command: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        match &command.kind {
            CommandKind::Noop => Ok(CommandResult::none()),
            CommandKind::Literal(value) => Ok(CommandResult::value(value.clone())),

            CommandKind::Variable { name, path } => {
                let root = ctx.operation.get_variable(name);
                let value = match path {
                    None => root.cloned(),
                    Some(path) => root.and_then(|r| select_path(r, path)),
                };
                Ok(CommandResult::from_option(value))
            }
            CommandKind::Select { name, selection } => {
                let root = ctx.operation.get_variable(name).cloned();
                let value = self.select(command, root, selection.as_ref(), ctx)?;
                Ok(CommandResult::from_option(value))
            }
            CommandKind::Property {
                source,
                name,
                selection,
            } => {
                let parent = self.value_of(source, ctx)?;
                let child = parent.as_ref().and_then(|p| p.get(name)).cloned();
                let value = self.select(command, child, selection.as_ref(), ctx)?;
                Ok(CommandResult::from_option(value))
            }

            CommandKind::Interpolate(parts) => self.exec_interpolate(parts, ctx),
            CommandKind::Object {
                type_name,
                children,
            } => self.exec_object(type_name.as_deref(), children, ctx),
            CommandKind::Array(items) => self.exec_array(items, ctx),
            CommandKind::Statements(items) => self.exec_statements(items, ctx),
            CommandKind::Spread(inner) => self.exec_spread(inner, ctx),
            CommandKind::Arithmetic(arith) => self.exec_arithmetic(command, arith, ctx),

            CommandKind::AssignVariable {
                name,
                path,
                type_name,
                value,
            } => self.exec_assign_variable(command, name, path, type_name.as_deref(), value, ctx),
            CommandKind::AssignProperty {
                name,
                type_name,
                value,
            } => {
                let result = self.exec(value, ctx)?;
                let value = match (type_name, result.value) {
                    (Some(t), Some(v @ Value::Object(_))) => Some(v.with_type(t)),
                    (_, v) => v,
                };
                Ok(CommandResult {
                    value,
                    property_name: Some(name.clone()),
                    append: result.append,
                    valid_result: result.valid_result,
                })
            }
            CommandKind::AssignDynamicProperty { name, value } => {
                let key = self.value_of(name, ctx)?;
                let result = self.exec(value, ctx)?;
                Ok(CommandResult {
                    value: result.value,
                    property_name: utils::try_string(key.as_ref()).map(|k| k.into_owned()),
                    append: result.append,
                    valid_result: result.valid_result,
                })
            }

            CommandKind::Condition(condition) => {
                Ok(CommandResult::value(self.eval_condition(condition, ctx)?))
            }
            CommandKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.exec_if(condition, then_branch, else_branch.as_deref(), ctx),
            CommandKind::Switch { subject, cases } => self.exec_switch(subject, cases, ctx),
            CommandKind::Coalesce { left, right } => self.exec_coalesce(left, right, ctx),
            CommandKind::While {
                condition,
                options,
                body,
            } => self.exec_while(command, condition, options.as_deref(), body, ctx),
            CommandKind::ForEach {
                iterator,
                source,
                body,
            } => self.exec_foreach(command, iterator, source, body, ctx),
            CommandKind::ParallelForEach {
                iterator,
                options,
                source,
                body,
            } => self.exec_parallel_foreach(command, iterator, options.as_deref(), source, body, ctx),

            CommandKind::Call { name, args } => self.exec_call(command, name, args, ctx),
            CommandKind::HardwiredCall {
                name,
                function,
                args,
            } => self.exec_hardwired_call(command, name, *function, args, ctx),
            CommandKind::StatementCall { name, args, body } => {
                self.exec_statement_call(command, name, args, body, ctx)
            }
            CommandKind::Return(value) => self.exec_return(value, ctx),
            CommandKind::Annotation {
                name,
                function,
                args,
                next,
            } => self.exec_annotation(command, name, function, args, next, ctx),

            CommandKind::Modifier { name, value, args } => {
                self.exec_modifier(command, name, value, args, ctx)
            }
            CommandKind::Filter { value, condition } => {
                self.exec_filter(command, value, condition, ctx)
            }
            CommandKind::Map { value, mapper } => self.exec_map(command, value, mapper, ctx),
            CommandKind::Reduce { value, reducer } => {
                self.exec_reduce(command, value, reducer, ctx)
            }
        }
    }

    // ── Selectors ──

    /// Apply an optional `[index]` / `[ condition ]` to a resolved value.
    fn select(
        &self,
        command: &Command,
        value: Option<Value>,
        selection: Option<&Selection>,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<Value>, Flow> {
        let Some(value) = value else {
            return Ok(None);
        };
        match selection {
            None => Ok(Some(value)),
            Some(Selection::Index(index)) => Ok(index_of(&value, *index)),
            Some(Selection::Filter(condition)) => {
                let Some(elements) = value.iter_elements() else {
                    return Ok(None);
                };
                let saved = ctx.operation.own_binding("$");
                let mut kept = Vec::new();
                let outcome = (|| {
                    for element in elements {
                        bind(ctx, "$", element.clone(), &command.position)?;
                        if self.eval_condition(condition, ctx)? {
                            kept.push(element);
                        }
                    }
                    Ok::<_, Flow>(())
                })();
                ctx.operation.restore_binding("$", saved);
                outcome?;
                Ok(Some(Value::array(kept)))
            }
        }
    }

    // ── Builders ──

    fn exec_interpolate(
        &self,
        parts: &[Command],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let mut out = String::new();
        for part in parts {
            let value = self.value_of(part, ctx)?;
            if let Some(text) = utils::try_string(value.as_ref()) {
                out.push_str(&text);
            }
        }
        Ok(CommandResult::value(out))
    }

    fn exec_object(
        &self,
        type_name: Option<&str>,
        children: &[Command],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let mut object = ObjectMap::with_capacity(children.len());
        if let Some(type_name) = type_name {
            object.set_type_name(type_name);
        }

        for child in children {
            let result = self.exec(child, ctx)?;
            match result.property_name {
                Some(name) if !name.is_empty() => {
                    if result.append == Some(false) || result.valid_result == Some(false) {
                        continue;
                    }
                    let value = result.value.unwrap_or(Value::Null);
                    // `a.b.c: x` followed by `a.b.d: y` must extend `a`, not replace it
                    let value = match object.get(&name) {
                        Some(existing) if !existing.is_scalar() => existing.merge(&value),
                        _ => value,
                    };
                    object.insert(name, value);
                }
                _ if result.append == Some(true) => {
                    if let Some(Value::Object(fields)) = result.value {
                        for (key, value) in fields.iter() {
                            object.insert(key.clone(), value.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(CommandResult::value(Value::object_map(object)))
    }

    fn exec_array(&self, items: &[Command], ctx: &mut ExecutionContext) -> Result<CommandResult, Flow> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let result = self.exec(item, ctx)?;
            let append = result.is_appended();
            match result.value {
                Some(Value::Array(spliced)) if append => out.extend(spliced.iter().cloned()),
                value => out.push(value.unwrap_or(Value::Null)),
            }
        }
        Ok(CommandResult::value(Value::array(out)))
    }

    /// Block value: the last result that carries a value and no property name.
    fn exec_statements(
        &self,
        items: &[Command],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let mut last = None;
        for item in items {
            let result = self.exec(item, ctx)?;
            let unnamed = result.property_name.as_deref().map_or(true, str::is_empty);
            if unnamed && result.value.is_some() {
                last = Some(result);
            }
        }
        Ok(last.unwrap_or(CommandResult {
            valid_result: Some(false),
            ..CommandResult::none()
        }))
    }

    fn exec_spread(&self, inner: &Command, ctx: &mut ExecutionContext) -> Result<CommandResult, Flow> {
        match self.value_of(inner, ctx)? {
            Some(v @ (Value::Object(_) | Value::Array(_))) => Ok(CommandResult::appended(v.deep_copy())),
            Some(Value::Iterable(it)) => Ok(CommandResult::appended(Value::array(it.to_vec()))),
            _ => Ok(CommandResult::none()),
        }
    }

    // ── Arithmetic ──

    fn exec_arithmetic(
        &self,
        command: &Command,
        arith: &Arithmetic,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let result = match arith {
            Arithmetic::Constant(value) => *value,
            Arithmetic::Direct { op, left, right } => {
                let l = utils::decimal_or_zero(self.value_of(left, ctx)?.as_ref());
                let r = utils::decimal_or_zero(self.value_of(right, ctx)?.as_ref());
                apply_arithmetic(*op, l, r).ok_or_else(|| overflow(*op, &command.position))?
            }
            Arithmetic::Chain { head, steps } => {
                let mut acc = self.operand(head, ctx)?;
                for step in steps {
                    let value = self.operand(&step.operand, ctx)?;
                    acc = apply_arithmetic(step.op, acc, value)
                        .ok_or_else(|| overflow(step.op, &command.position))?;
                }
                acc
            }
        };
        Ok(CommandResult::value(result))
    }

    fn operand(&self, operand: &Operand, ctx: &mut ExecutionContext) -> Result<Decimal, Flow> {
        match operand {
            Operand::Constant(value) => Ok(*value),
            Operand::Command(command) => {
                Ok(utils::decimal_or_zero(self.value_of(command, ctx)?.as_ref()))
            }
        }
    }

    // ── Assignment ──

    fn exec_assign_variable(
        &self,
        command: &Command,
        name: &str,
        path: &[String],
        type_name: Option<&str>,
        value: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let value = self.value_of(value, ctx)?.unwrap_or(Value::Null);
        let value = match type_name {
            Some(t) => value.with_type(t),
            None => value,
        };
        let position = &command.position;

        if path.is_empty() {
            ctx.operation.set_variable(name, value).map_err(|e| {
                TransformError::with_source(format!("{} at {}", e, position), position.clone(), e)
            })?;
            return Ok(CommandResult::none());
        }

        let existing = ctx.operation.get_transform_variable(name);
        if existing.is_some_and(|v| v.read_only) {
            return Err(TransformError::new(
                format!(
                    "Could not set property={} in readonly variable={}.",
                    path.join("."),
                    name
                ),
                position.clone(),
            )
            .into());
        }
        let base = existing
            .map(|v| v.value.clone())
            .unwrap_or_else(|| Value::typed_object(type_name));
        let nested = path.iter().rev().fold(value, |inner, key| {
            let mut level = ObjectMap::new();
            level.insert(key.clone(), inner);
            Value::object_map(level)
        });
        ctx.operation
            .set_variable(name, base.merge(&nested))
            .map_err(|e| TransformError::with_source(format!("{} at {}", e, position), position.clone(), e))?;
        Ok(CommandResult::none())
    }
}

/// `+ - * /` on decimals. Division by zero yields zero; quotients keep four
/// fractional digits, ties rounded toward zero. `None` on overflow.
pub fn apply_arithmetic(op: ArithOp, left: Decimal, right: Decimal) -> Option<Decimal> {
    match op {
        ArithOp::Add => left.checked_add(right),
        ArithOp::Subtract => left.checked_sub(right),
        ArithOp::Multiply => left.checked_mul(right),
        ArithOp::Divide if right.is_zero() => Some(Decimal::ZERO),
        ArithOp::Divide => left
            .checked_div(right)
            .map(|q| q.round_dp_with_strategy(DIVISION_SCALE, RoundingStrategy::MidpointTowardZero)),
    }
}

fn overflow(op: ArithOp, position: &Position) -> Flow {
    TransformError::new(
        format!("Arithmetic overflow evaluating '{}' at {}.", op.symbol(), position),
        position.clone(),
    )
    .into()
}

/// Element `index` of an array or host iterable; negative indexes count from the end.
fn index_of(value: &Value, index: i64) -> Option<Value> {
    let elements: Vec<Value>;
    let slice: &[Value] = match value {
        Value::Array(arr) => arr,
        Value::Iterable(it) => {
            elements = it.to_vec();
            &elements
        }
        _ => return None,
    };
    let len = slice.len() as i64;
    let position = if index < 0 { len + index } else { index };
    if (0..len).contains(&position) {
        slice.get(position as usize).cloned()
    } else {
        None
    }
}

fn select_path(root: &Value, path: &SelectorPath) -> Option<Value> {
    match path {
        SelectorPath::Single(name) => root.get(name).cloned(),
        SelectorPath::Properties(names) => {
            let mut current = root;
            for name in names {
                current = current.get(name)?;
            }
            Some(current.clone())
        }
        SelectorPath::Expression(segments) => walk_segments(root, segments),
    }
}

fn walk_segments(value: &Value, segments: &[PathSegment]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match first {
        PathSegment::Property(name) => walk_segments(value.get(name)?, rest),
        PathSegment::Index(index) => walk_segments(&index_of(value, *index)?, rest),
        PathSegment::Wildcard => {
            let children: Vec<Value> = match value {
                Value::Object(map) => map.values().cloned().collect(),
                other => other.iter_elements()?.collect(),
            };
            let found = children
                .iter()
                .filter_map(|child| walk_segments(child, rest))
                .filter(|v| !v.is_absent())
                .collect();
            Some(Value::array(found))
        }
    }
}
