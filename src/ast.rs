// Command tree definitions
// Produced by the front end, optimized by the compiler, executed by the evaluator

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::condition::Operator;
use crate::value::Value;

/// Source span of a command, used only for error messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Position {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
    pub end_line: Option<u32>,
    pub end_column: Option<u32>,
}

impl Position {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Position {
            file: file.into(),
            line,
            column,
            end_line: None,
            end_column: None,
        }
    }

    pub fn with_end(mut self, end_line: u32, end_column: u32) -> Self {
        self.end_line = Some(end_line);
        self.end_column = Some(end_column);
        self
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Index of a function inside its module's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub usize);

/// One compiled command plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub position: Position,
}

/// A step of a compiled variable path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// `.name` or `['name']`
    Property(String),
    /// `[n]`; negative counts from the end
    Index(i64),
    /// `[*]` or `.*`
    Wildcard,
}

/// How a `$var.path` selector walks its path.
///
/// The compiler picks the cheapest strategy that fits the static shape of the path.
/// All three produce the same value for the same input.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorPath {
    /// General path expression: indexes, wildcards, nested properties.
    Expression(Vec<PathSegment>),
    /// Plain property chain `$var.a.b.c`.
    Properties(Vec<String>),
    /// One property `$var.a`.
    Single(String),
}

/// `[index]` or `[ condition ]` after a simple selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Index(i64),
    Filter(Box<ConditionExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "+" => Some(ArithOp::Add),
            "-" => Some(ArithOp::Subtract),
            "*" => Some(ArithOp::Multiply),
            "/" => Some(ArithOp::Divide),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Subtract => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
        }
    }
}

/// An operand of a flattened arithmetic chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Constant(Decimal),
    Command(Box<Command>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    pub op: ArithOp,
    pub operand: Operand,
}

/// Evaluation strategy of an arithmetic node.
///
/// `Constant` and `Chain` are produced by the compiler from `Direct` trees and are
/// observationally identical to them.
#[derive(Debug, Clone, PartialEq)]
pub enum Arithmetic {
    Direct {
        op: ArithOp,
        left: Box<Command>,
        right: Box<Command>,
    },
    Constant(Decimal),
    /// `head op1 x1 op2 x2 ...` evaluated strictly left to right.
    Chain {
        head: Operand,
        steps: Vec<ChainStep>,
    },
}

/// Boolean expression used by if, while, filters and condition values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Simple {
        left: Box<Command>,
        op: Operator,
        right: Option<Box<Command>>,
    },
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    /// Short-circuits when the left side holds.
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub op: Operator,
    pub right: Command,
    pub result: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Noop,
    Literal(Value),

    // ── Selectors ──
    /// `$var` or `$var.path`
    Variable {
        name: String,
        path: Option<SelectorPath>,
    },
    /// `$var[index]` / `$var[ condition ]`
    Select {
        name: String,
        selection: Option<Selection>,
    },
    /// `<source>.name[index]` / `<source>.name[ condition ]`
    Property {
        source: Box<Command>,
        name: String,
        selection: Option<Selection>,
    },

    // ── Builders ──
    Interpolate(Vec<Command>),
    Object {
        type_name: Option<String>,
        children: Vec<Command>,
    },
    Array(Vec<Command>),
    Statements(Vec<Command>),
    Spread(Box<Command>),
    Arithmetic(Arithmetic),

    // ── Assignment ──
    /// `$name = value` or `$name.a.b = value`
    AssignVariable {
        name: String,
        path: Vec<String>,
        type_name: Option<String>,
        value: Box<Command>,
    },
    /// `name: value`
    AssignProperty {
        name: String,
        type_name: Option<String>,
        value: Box<Command>,
    },
    /// `` `$name`: value ``
    AssignDynamicProperty {
        name: Box<Command>,
        value: Box<Command>,
    },

    // ── Control flow ──
    Condition(ConditionExpr),
    If {
        condition: ConditionExpr,
        then_branch: Box<Command>,
        else_branch: Option<Box<Command>>,
    },
    Switch {
        subject: Box<Command>,
        cases: Vec<SwitchCase>,
    },
    Coalesce {
        left: Box<Command>,
        right: Box<Command>,
    },
    While {
        condition: ConditionExpr,
        options: Option<Box<Command>>,
        body: Box<Command>,
    },
    ForEach {
        iterator: String,
        source: Box<Command>,
        body: Box<Command>,
    },
    ParallelForEach {
        iterator: String,
        options: Option<Box<Command>>,
        source: Box<Command>,
        body: Arc<Command>,
    },

    // ── Functions ──
    Call {
        name: String,
        args: Vec<Command>,
    },
    /// A call whose target was resolved at link time.
    HardwiredCall {
        name: String,
        function: FunctionId,
        args: Vec<Command>,
    },
    /// A call that hands the callee a statement block it may run.
    StatementCall {
        name: String,
        args: Vec<Command>,
        body: Box<Command>,
    },
    Return(Box<Command>),
    Annotation {
        name: String,
        function: String,
        args: Vec<Command>,
        next: Box<Command>,
    },

    // ── Modifiers ──
    /// `value | name(args)`
    Modifier {
        name: String,
        value: Box<Command>,
        args: Vec<Command>,
    },
    Filter {
        value: Box<Command>,
        condition: ConditionExpr,
    },
    Map {
        value: Box<Command>,
        mapper: Box<Command>,
    },
    Reduce {
        value: Box<Command>,
        reducer: Box<Command>,
    },
}

impl CommandKind {
    /// Stable name of the node type, as seen by generic tree walkers.
    ///
    /// Every arithmetic strategy reports itself as `arithmetic`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CommandKind::Noop => "noop",
            CommandKind::Literal(_) => "literal",
            CommandKind::Variable { .. } => "variable",
            CommandKind::Select { .. } => "select",
            CommandKind::Property { .. } => "property",
            CommandKind::Interpolate(_) => "interpolate",
            CommandKind::Object { .. } => "object",
            CommandKind::Array(_) => "array",
            CommandKind::Statements(_) => "statements",
            CommandKind::Spread(_) => "spread",
            CommandKind::Arithmetic(_) => "arithmetic",
            CommandKind::AssignVariable { .. } => "assign_variable",
            CommandKind::AssignProperty { .. } => "assign_property",
            CommandKind::AssignDynamicProperty { .. } => "assign_dynamic_property",
            CommandKind::Condition(_) => "condition",
            CommandKind::If { .. } => "if",
            CommandKind::Switch { .. } => "switch",
            CommandKind::Coalesce { .. } => "coalesce",
            CommandKind::While { .. } => "while",
            CommandKind::ForEach { .. } => "foreach",
            CommandKind::ParallelForEach { .. } => "parallel_foreach",
            CommandKind::Call { .. } => "call",
            CommandKind::HardwiredCall { .. } => "call",
            CommandKind::StatementCall { .. } => "statement_call",
            CommandKind::Return(_) => "return",
            CommandKind::Annotation { .. } => "annotation",
            CommandKind::Modifier { .. } => "modifier",
            CommandKind::Filter { .. } => "filter",
            CommandKind::Map { .. } => "map",
            CommandKind::Reduce { .. } => "reduce",
        }
    }
}

// ── Tree walking ─────────────────────────────────────────────────────────────

impl ConditionExpr {
    fn for_each_command<'a>(&'a self, f: &mut dyn FnMut(&'a Command)) {
        match self {
            ConditionExpr::Simple { left, right, .. } => {
                f(left);
                if let Some(r) = right {
                    f(r);
                }
            }
            ConditionExpr::And(a, b) | ConditionExpr::Or(a, b) => {
                a.for_each_command(f);
                b.for_each_command(f);
            }
        }
    }

    fn for_each_command_mut(&mut self, f: &mut dyn FnMut(&mut Command)) {
        match self {
            ConditionExpr::Simple { left, right, .. } => {
                f(left);
                if let Some(r) = right {
                    f(r);
                }
            }
            ConditionExpr::And(a, b) | ConditionExpr::Or(a, b) => {
                a.for_each_command_mut(f);
                b.for_each_command_mut(f);
            }
        }
    }
}

impl Command {
    pub fn new(kind: CommandKind, position: Position) -> Self {
        Command { kind, position }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Command> {
        let mut out = Vec::new();
        self.for_each_child(&mut |c| out.push(c));
        out
    }

    /// Pre-order visit of this command and everything below it.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Command)) {
        f(self);
        self.for_each_child(&mut |c| c.walk(f));
    }

    /// Post-order mutable visit: children are rewritten before their parent sees them.
    ///
    /// Parallel loop bodies are shared behind an `Arc` and are copied on write.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Command)) {
        self.for_each_child_mut(&mut |c| c.walk_mut(f));
        f(self);
    }

    fn for_each_child<'a>(&'a self, f: &mut dyn FnMut(&'a Command)) {
        match &self.kind {
            CommandKind::Noop | CommandKind::Literal(_) | CommandKind::Variable { .. } => {}
            CommandKind::Select { selection, .. } => {
                if let Some(Selection::Filter(cond)) = selection {
                    cond.for_each_command(f);
                }
            }
            CommandKind::Property {
                source, selection, ..
            } => {
                f(source);
                if let Some(Selection::Filter(cond)) = selection {
                    cond.for_each_command(f);
                }
            }
            CommandKind::Interpolate(items)
            | CommandKind::Array(items)
            | CommandKind::Statements(items)
            | CommandKind::Object {
                children: items, ..
            } => items.iter().for_each(|c| f(c)),
            CommandKind::Spread(inner) | CommandKind::Return(inner) => f(inner),
            CommandKind::Arithmetic(arith) => match arith {
                Arithmetic::Direct { left, right, .. } => {
                    f(left);
                    f(right);
                }
                Arithmetic::Constant(_) => {}
                Arithmetic::Chain { head, steps } => {
                    if let Operand::Command(c) = head {
                        f(c);
                    }
                    for step in steps {
                        if let Operand::Command(c) = &step.operand {
                            f(c);
                        }
                    }
                }
            },
            CommandKind::AssignVariable { value, .. } | CommandKind::AssignProperty { value, .. } => {
                f(value)
            }
            CommandKind::AssignDynamicProperty { name, value } => {
                f(name);
                f(value);
            }
            CommandKind::Condition(cond) => cond.for_each_command(f),
            CommandKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.for_each_command(f);
                f(then_branch);
                if let Some(e) = else_branch {
                    f(e);
                }
            }
            CommandKind::Switch { subject, cases } => {
                f(subject);
                for case in cases {
                    f(&case.right);
                    f(&case.result);
                }
            }
            CommandKind::Coalesce { left, right } => {
                f(left);
                f(right);
            }
            CommandKind::While {
                condition,
                options,
                body,
            } => {
                if let Some(o) = options {
                    f(o);
                }
                condition.for_each_command(f);
                f(body);
            }
            CommandKind::ForEach { source, body, .. } => {
                f(source);
                f(body);
            }
            CommandKind::ParallelForEach {
                options,
                source,
                body,
                ..
            } => {
                if let Some(o) = options {
                    f(o);
                }
                f(source);
                f(body);
            }
            CommandKind::Call { args, .. } | CommandKind::HardwiredCall { args, .. } => {
                args.iter().for_each(|c| f(c))
            }
            CommandKind::StatementCall { args, body, .. } => {
                args.iter().for_each(|c| f(c));
                f(body);
            }
            CommandKind::Annotation { args, next, .. } => {
                args.iter().for_each(|c| f(c));
                f(next);
            }
            CommandKind::Modifier { value, args, .. } => {
                f(value);
                args.iter().for_each(|c| f(c));
            }
            CommandKind::Filter { value, condition } => {
                f(value);
                condition.for_each_command(f);
            }
            CommandKind::Map { value, mapper: other } | CommandKind::Reduce { value, reducer: other } => {
                f(value);
                f(other);
            }
        }
    }

    fn for_each_child_mut(&mut self, f: &mut dyn FnMut(&mut Command)) {
        match &mut self.kind {
            CommandKind::Noop | CommandKind::Literal(_) | CommandKind::Variable { .. } => {}
            CommandKind::Select { selection, .. } => {
                if let Some(Selection::Filter(cond)) = selection {
                    cond.for_each_command_mut(f);
                }
            }
            CommandKind::Property {
                source, selection, ..
            } => {
                f(source);
                if let Some(Selection::Filter(cond)) = selection {
                    cond.for_each_command_mut(f);
                }
            }
            CommandKind::Interpolate(items)
            | CommandKind::Array(items)
            | CommandKind::Statements(items)
            | CommandKind::Object {
                children: items, ..
            } => items.iter_mut().for_each(|c| f(c)),
            CommandKind::Spread(inner) | CommandKind::Return(inner) => f(inner),
            CommandKind::Arithmetic(arith) => match arith {
                Arithmetic::Direct { left, right, .. } => {
                    f(left);
                    f(right);
                }
                Arithmetic::Constant(_) => {}
                Arithmetic::Chain { head, steps } => {
                    if let Operand::Command(c) = head {
                        f(c);
                    }
                    for step in steps {
                        if let Operand::Command(c) = &mut step.operand {
                            f(c);
                        }
                    }
                }
            },
            CommandKind::AssignVariable { value, .. } | CommandKind::AssignProperty { value, .. } => {
                f(value)
            }
            CommandKind::AssignDynamicProperty { name, value } => {
                f(name);
                f(value);
            }
            CommandKind::Condition(cond) => cond.for_each_command_mut(f),
            CommandKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.for_each_command_mut(f);
                f(then_branch);
                if let Some(e) = else_branch {
                    f(e);
                }
            }
            CommandKind::Switch { subject, cases } => {
                f(subject);
                for case in cases {
                    f(&mut case.right);
                    f(&mut case.result);
                }
            }
            CommandKind::Coalesce { left, right } => {
                f(left);
                f(right);
            }
            CommandKind::While {
                condition,
                options,
                body,
            } => {
                if let Some(o) = options {
                    f(o);
                }
                condition.for_each_command_mut(f);
                f(body);
            }
            CommandKind::ForEach { source, body, .. } => {
                f(source);
                f(body);
            }
            CommandKind::ParallelForEach {
                options,
                source,
                body,
                ..
            } => {
                if let Some(o) = options {
                    f(o);
                }
                f(source);
                f(Arc::make_mut(body));
            }
            CommandKind::Call { args, .. } | CommandKind::HardwiredCall { args, .. } => {
                args.iter_mut().for_each(|c| f(c))
            }
            CommandKind::StatementCall { args, body, .. } => {
                args.iter_mut().for_each(|c| f(c));
                f(body);
            }
            CommandKind::Annotation { args, next, .. } => {
                args.iter_mut().for_each(|c| f(c));
                f(next);
            }
            CommandKind::Modifier { value, args, .. } => {
                f(value);
                args.iter_mut().for_each(|c| f(c));
            }
            CommandKind::Filter { value, condition } => {
                f(value);
                condition.for_each_command_mut(f);
            }
            CommandKind::Map { value, mapper: other } | CommandKind::Reduce { value, reducer: other } => {
                f(value);
                f(other);
            }
        }
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────
//
// Convenience constructors used by front ends and tests. Each builds a command at
// the default position; use `at` to attach a real one.

impl Command {
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    fn of(kind: CommandKind) -> Self {
        Command::new(kind, Position::default())
    }

    pub fn noop() -> Self {
        Command::of(CommandKind::Noop)
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Command::of(CommandKind::Literal(value.into()))
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Command::of(CommandKind::Variable {
            name: name.into(),
            path: None,
        })
    }

    /// `$name.a.b` as a general path expression; the compiler may pick a faster strategy.
    pub fn path(name: impl Into<String>, segments: Vec<PathSegment>) -> Self {
        Command::of(CommandKind::Variable {
            name: name.into(),
            path: Some(SelectorPath::Expression(segments)),
        })
    }

    pub fn index(name: impl Into<String>, index: i64) -> Self {
        Command::of(CommandKind::Select {
            name: name.into(),
            selection: Some(Selection::Index(index)),
        })
    }

    pub fn filtered(name: impl Into<String>, condition: ConditionExpr) -> Self {
        Command::of(CommandKind::Select {
            name: name.into(),
            selection: Some(Selection::Filter(Box::new(condition))),
        })
    }

    pub fn property(source: Command, name: impl Into<String>, selection: Option<Selection>) -> Self {
        Command::of(CommandKind::Property {
            source: Box::new(source),
            name: name.into(),
            selection,
        })
    }

    pub fn interpolate(parts: Vec<Command>) -> Self {
        Command::of(CommandKind::Interpolate(parts))
    }

    pub fn object(children: Vec<Command>) -> Self {
        Command::of(CommandKind::Object {
            type_name: None,
            children,
        })
    }

    pub fn typed_object(type_name: impl Into<String>, children: Vec<Command>) -> Self {
        Command::of(CommandKind::Object {
            type_name: Some(type_name.into()),
            children,
        })
    }

    pub fn array(items: Vec<Command>) -> Self {
        Command::of(CommandKind::Array(items))
    }

    pub fn statements(items: Vec<Command>) -> Self {
        Command::of(CommandKind::Statements(items))
    }

    pub fn spread(inner: Command) -> Self {
        Command::of(CommandKind::Spread(Box::new(inner)))
    }

    pub fn math(op: ArithOp, left: Command, right: Command) -> Self {
        Command::of(CommandKind::Arithmetic(Arithmetic::Direct {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }))
    }

    pub fn assign_variable(name: impl Into<String>, value: Command) -> Self {
        Command::of(CommandKind::AssignVariable {
            name: name.into(),
            path: Vec::new(),
            type_name: None,
            value: Box::new(value),
        })
    }

    pub fn assign_variable_path(name: impl Into<String>, path: Vec<String>, value: Command) -> Self {
        Command::of(CommandKind::AssignVariable {
            name: name.into(),
            path,
            type_name: None,
            value: Box::new(value),
        })
    }

    pub fn assign(name: impl Into<String>, value: Command) -> Self {
        Command::of(CommandKind::AssignProperty {
            name: name.into(),
            type_name: None,
            value: Box::new(value),
        })
    }

    pub fn assign_dynamic(name: Command, value: Command) -> Self {
        Command::of(CommandKind::AssignDynamicProperty {
            name: Box::new(name),
            value: Box::new(value),
        })
    }

    pub fn condition(condition: ConditionExpr) -> Self {
        Command::of(CommandKind::Condition(condition))
    }

    pub fn if_then(condition: ConditionExpr, then_branch: Command, else_branch: Option<Command>) -> Self {
        Command::of(CommandKind::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        })
    }

    pub fn switch(subject: Command, cases: Vec<SwitchCase>) -> Self {
        Command::of(CommandKind::Switch {
            subject: Box::new(subject),
            cases,
        })
    }

    pub fn coalesce(left: Command, right: Command) -> Self {
        Command::of(CommandKind::Coalesce {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn while_loop(condition: ConditionExpr, options: Option<Command>, body: Command) -> Self {
        Command::of(CommandKind::While {
            condition,
            options: options.map(Box::new),
            body: Box::new(body),
        })
    }

    pub fn foreach(iterator: impl Into<String>, source: Command, body: Command) -> Self {
        Command::of(CommandKind::ForEach {
            iterator: iterator.into(),
            source: Box::new(source),
            body: Box::new(body),
        })
    }

    pub fn parallel_foreach(
        iterator: impl Into<String>,
        options: Option<Command>,
        source: Command,
        body: Command,
    ) -> Self {
        Command::of(CommandKind::ParallelForEach {
            iterator: iterator.into(),
            options: options.map(Box::new),
            source: Box::new(source),
            body: Arc::new(body),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Command>) -> Self {
        Command::of(CommandKind::Call {
            name: name.into(),
            args,
        })
    }

    pub fn statement_call(name: impl Into<String>, args: Vec<Command>, body: Command) -> Self {
        Command::of(CommandKind::StatementCall {
            name: name.into(),
            args,
            body: Box::new(body),
        })
    }

    pub fn ret(value: Command) -> Self {
        Command::of(CommandKind::Return(Box::new(value)))
    }

    pub fn annotation(
        name: impl Into<String>,
        function: impl Into<String>,
        args: Vec<Command>,
        next: Command,
    ) -> Self {
        Command::of(CommandKind::Annotation {
            name: name.into(),
            function: function.into(),
            args,
            next: Box::new(next),
        })
    }

    pub fn modifier(name: impl Into<String>, value: Command, args: Vec<Command>) -> Self {
        Command::of(CommandKind::Modifier {
            name: name.into(),
            value: Box::new(value),
            args,
        })
    }

    pub fn filter(value: Command, condition: ConditionExpr) -> Self {
        Command::of(CommandKind::Filter {
            value: Box::new(value),
            condition,
        })
    }

    pub fn map(value: Command, mapper: Command) -> Self {
        Command::of(CommandKind::Map {
            value: Box::new(value),
            mapper: Box::new(mapper),
        })
    }

    pub fn reduce(value: Command, reducer: Command) -> Self {
        Command::of(CommandKind::Reduce {
            value: Box::new(value),
            reducer: Box::new(reducer),
        })
    }
}

impl ConditionExpr {
    pub fn compare(left: Command, op: Operator, right: Command) -> Self {
        ConditionExpr::Simple {
            left: Box::new(left),
            op,
            right: Some(Box::new(right)),
        }
    }

    /// Truthiness test of a single value.
    pub fn exists(value: Command) -> Self {
        ConditionExpr::Simple {
            left: Box::new(value),
            op: Operator::Exists,
            right: None,
        }
    }

    pub fn and(self, other: ConditionExpr) -> Self {
        ConditionExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: ConditionExpr) -> Self {
        ConditionExpr::Or(Box::new(self), Box::new(other))
    }
}

impl SwitchCase {
    pub fn new(op: Operator, right: Command, result: Command) -> Self {
        SwitchCase { op, right, result }
    }

    pub fn otherwise(result: Command) -> Self {
        SwitchCase {
            op: Operator::Else,
            right: Command::noop(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_creation() {
        let lit = Command::literal(42i64);
        assert!(matches!(lit.kind, CommandKind::Literal(_)));

        let var = Command::variable("$x");
        assert!(matches!(var.kind, CommandKind::Variable { path: None, .. }));

        let pos = Position::new("main.isl", 3, 7).with_end(3, 12);
        let placed = Command::noop().at(pos.clone());
        assert_eq!(placed.position, pos);
        assert_eq!(pos.to_string(), "main.isl:3:7");
    }

    #[test]
    fn test_arithmetic_strategies_share_kind_name() {
        let direct = Command::math(ArithOp::Add, Command::literal(1i64), Command::literal(2i64));
        let constant = Command::new(
            CommandKind::Arithmetic(Arithmetic::Constant(Decimal::from(3))),
            Position::default(),
        );
        let chain = Command::new(
            CommandKind::Arithmetic(Arithmetic::Chain {
                head: Operand::Constant(Decimal::from(1)),
                steps: vec![ChainStep {
                    op: ArithOp::Add,
                    operand: Operand::Command(Box::new(Command::variable("$x"))),
                }],
            }),
            Position::default(),
        );
        for cmd in [&direct, &constant, &chain] {
            assert_eq!(cmd.kind.kind_name(), "arithmetic");
        }
        assert_eq!(chain.children().len(), 1);
    }

    #[test]
    fn test_walk_visits_nested_commands() {
        let tree = Command::object(vec![
            Command::assign("a", Command::literal(1i64)),
            Command::assign(
                "b",
                Command::if_then(
                    ConditionExpr::exists(Command::variable("$flag")),
                    Command::literal("yes"),
                    None,
                ),
            ),
        ]);
        let mut kinds = Vec::new();
        tree.walk(&mut |c| kinds.push(c.kind.kind_name()));
        assert_eq!(
            kinds,
            vec![
                "object",
                "assign_property",
                "literal",
                "assign_property",
                "if",
                "variable",
                "literal"
            ]
        );
    }

    #[test]
    fn test_walk_mut_reaches_parallel_body() {
        let mut tree = Command::parallel_foreach(
            "$it",
            None,
            Command::variable("$list"),
            Command::call("this.work", vec![]),
        );
        tree.walk_mut(&mut |c| {
            if let CommandKind::Call { name, .. } = &mut c.kind {
                *name = "renamed".to_string();
            }
        });
        let mut names = Vec::new();
        tree.walk(&mut |c| {
            if let CommandKind::Call { name, .. } = &c.kind {
                names.push(name.clone());
            }
        });
        assert_eq!(names, vec!["renamed".to_string()]);
    }

    #[test]
    fn test_arith_op_symbols() {
        for sym in ["+", "-", "*", "/"] {
            assert_eq!(ArithOp::from_symbol(sym).map(ArithOp::symbol), Some(sym));
        }
        assert_eq!(ArithOp::from_symbol("%"), None);
    }
}
