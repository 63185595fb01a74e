//! Module compiler: turns function declarations into a linked [`Module`].
//!
//! Every function body is optimized bottom-up, then intra-module call sites
//! (`this.<fn>`) are resolved to table indexes. Because all declarations are known
//! before linking starts, recursion and mutual recursion need no runtime
//! indirection: a linked call site holds the callee's [`FunctionId`] directly.
//!
//! The optimizations never change what a tree evaluates to:
//! - a one-part interpolation becomes its only part, so the part's native type survives
//! - arithmetic over two constants is folded into a constant
//! - a left-leaning run of arithmetic becomes one flat chain
//! - a path made only of property steps uses the plain property walk

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::ast::{
    Arithmetic, ChainStep, Command, CommandKind, FunctionId, Operand, PathSegment, Position,
    SelectorPath,
};
use crate::condition::{Operator, UnknownOperator};
use crate::evaluator::apply_arithmetic;
use crate::functions::{FunctionDecl, Module};
use crate::utils;

/// Compilation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Function '{0}' is declared more than once")]
    DuplicateFunction(String),

    #[error("Could not resolve call '{name}' at {position}")]
    UnresolvedCall { name: String, position: Position },

    #[error(transparent)]
    UnknownOperator(#[from] UnknownOperator),
}

/// Parse a condition operator as written in source.
pub fn parse_operator(symbol: &str) -> Result<Operator, CompileError> {
    Ok(symbol.parse::<Operator>()?)
}

// ---------------------------------------------------------------------------
// Module builder
// ---------------------------------------------------------------------------

pub struct ModuleBuilder {
    name: String,
    functions: Vec<FunctionDecl>,
    names: HashSet<String>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder {
            name: name.into(),
            functions: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Register a declaration. Names are unique regardless of case.
    pub fn add_function(&mut self, decl: FunctionDecl) -> Result<FunctionId, CompileError> {
        if !self.names.insert(decl.name.to_lowercase()) {
            return Err(CompileError::DuplicateFunction(decl.name));
        }
        self.functions.push(decl);
        Ok(FunctionId(self.functions.len() - 1))
    }

    /// Chaining form of [`add_function`](Self::add_function).
    pub fn function(mut self, decl: FunctionDecl) -> Result<Self, CompileError> {
        self.add_function(decl)?;
        Ok(self)
    }

    /// Optimize every body and link intra-module calls.
    pub fn build(self) -> Result<Module, CompileError> {
        let index: HashMap<String, FunctionId> = self
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.to_lowercase(), FunctionId(i)))
            .collect();

        let mut functions = self.functions;
        let mut linked = 0;
        for decl in &mut functions {
            let body = std::mem::replace(&mut decl.body, Command::noop());
            decl.body = optimize(body);
            linked += link(&mut decl.body, &index)?;
        }

        debug!(module = %self.name, functions = functions.len(), linked, "module linked");
        Ok(Module::from_parts(self.name, functions))
    }
}

// ---------------------------------------------------------------------------
// Optimization
// ---------------------------------------------------------------------------

/// Apply the tree rewrites to a standalone command.
pub fn optimize(mut command: Command) -> Command {
    command.walk_mut(&mut optimize_node);
    command
}

fn optimize_node(command: &mut Command) {
    let kind = std::mem::replace(&mut command.kind, CommandKind::Noop);
    match kind {
        CommandKind::Interpolate(mut parts) if parts.len() == 1 => {
            if let Some(only) = parts.pop() {
                *command = only;
            }
        }
        CommandKind::Arithmetic(arith) => {
            command.kind = CommandKind::Arithmetic(optimize_arithmetic(arith));
        }
        CommandKind::Variable {
            name,
            path: Some(SelectorPath::Expression(segments)),
        } => {
            command.kind = CommandKind::Variable {
                name,
                path: Some(narrow_path(segments)),
            };
        }
        other => command.kind = other,
    }
}

/// The compile-time value of an operand, read the same way evaluation reads it.
fn constant_of(command: &Command) -> Option<rust_decimal::Decimal> {
    match &command.kind {
        CommandKind::Literal(value) => Some(utils::decimal_or_zero(
            Some(value).filter(|v| !v.is_absent()),
        )),
        CommandKind::Arithmetic(Arithmetic::Constant(value)) => Some(*value),
        _ => None,
    }
}

fn operand(command: Command) -> Operand {
    match constant_of(&command) {
        Some(value) => Operand::Constant(value),
        None => Operand::Command(Box::new(command)),
    }
}

fn optimize_arithmetic(arith: Arithmetic) -> Arithmetic {
    let Arithmetic::Direct { op, left, right } = arith else {
        return arith;
    };

    if let (Some(l), Some(r)) = (constant_of(&left), constant_of(&right)) {
        // an overflowing fold keeps the runtime form so the failure keeps its position
        return match apply_arithmetic(op, l, r) {
            Some(value) => Arithmetic::Constant(value),
            None => Arithmetic::Direct { op, left, right },
        };
    }

    let left = *left;
    match left.kind {
        CommandKind::Arithmetic(Arithmetic::Direct {
            op: inner_op,
            left: inner_left,
            right: inner_right,
        }) => Arithmetic::Chain {
            head: operand(*inner_left),
            steps: vec![
                ChainStep {
                    op: inner_op,
                    operand: operand(*inner_right),
                },
                ChainStep {
                    op,
                    operand: operand(*right),
                },
            ],
        },
        CommandKind::Arithmetic(Arithmetic::Chain { head, mut steps }) => {
            steps.push(ChainStep {
                op,
                operand: operand(*right),
            });
            Arithmetic::Chain { head, steps }
        }
        kind => Arithmetic::Direct {
            op,
            left: Box::new(Command::new(kind, left.position)),
            right,
        },
    }
}

fn narrow_path(segments: Vec<PathSegment>) -> SelectorPath {
    if !segments
        .iter()
        .all(|s| matches!(s, PathSegment::Property(_)))
    {
        return SelectorPath::Expression(segments);
    }
    let mut names: Vec<String> = segments
        .into_iter()
        .filter_map(|s| match s {
            PathSegment::Property(name) => Some(name),
            _ => None,
        })
        .collect();
    if names.len() == 1 {
        SelectorPath::Single(names.remove(0))
    } else {
        SelectorPath::Properties(names)
    }
}

// ---------------------------------------------------------------------------
// Linking
// ---------------------------------------------------------------------------

/// Replace `this.<fn>` calls with direct table references. Returns how many
/// call sites were linked.
fn link(body: &mut Command, index: &HashMap<String, FunctionId>) -> Result<usize, CompileError> {
    let mut linked = 0;
    let mut unresolved = None;
    body.walk_mut(&mut |command| {
        let CommandKind::Call { name, args } = &mut command.kind else {
            return;
        };
        let lower = name.to_lowercase();
        let Some(target) = lower.strip_prefix("this.") else {
            return;
        };
        match index.get(target) {
            Some(&function) => {
                let name = std::mem::take(name);
                let args = std::mem::take(args);
                command.kind = CommandKind::HardwiredCall {
                    name,
                    function,
                    args,
                };
                linked += 1;
            }
            None => {
                if unresolved.is_none() {
                    unresolved = Some(CompileError::UnresolvedCall {
                        name: name.clone(),
                        position: command.position.clone(),
                    });
                }
            }
        }
    });
    match unresolved {
        Some(err) => Err(err),
        None => Ok(linked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ArithOp;
    use crate::signature::Signature;
    use rust_decimal::Decimal;

    fn kind_of(command: &Command) -> &CommandKind {
        &command.kind
    }

    #[test]
    fn test_constant_folding() {
        let folded = optimize(Command::math(
            ArithOp::Multiply,
            Command::literal(6i64),
            Command::math(ArithOp::Add, Command::literal("3"), Command::literal(4i64)),
        ));
        assert_eq!(
            kind_of(&folded),
            &CommandKind::Arithmetic(Arithmetic::Constant(Decimal::from(42)))
        );
        assert_eq!(folded.kind.kind_name(), "arithmetic");
    }

    #[test]
    fn test_overflowing_fold_stays_direct() {
        let cmd = optimize(Command::math(
            ArithOp::Multiply,
            Command::literal("79228162514264337593543950335"),
            Command::literal("2"),
        ));
        assert!(matches!(
            kind_of(&cmd),
            CommandKind::Arithmetic(Arithmetic::Direct { .. })
        ));
    }

    #[test]
    fn test_left_spine_becomes_chain() {
        // (($a + 1) - $b) * 2
        let cmd = optimize(Command::math(
            ArithOp::Multiply,
            Command::math(
                ArithOp::Subtract,
                Command::math(ArithOp::Add, Command::variable("$a"), Command::literal(1i64)),
                Command::variable("$b"),
            ),
            Command::literal(2i64),
        ));
        let CommandKind::Arithmetic(Arithmetic::Chain { head, steps }) = kind_of(&cmd) else {
            panic!("expected a chain, got {:?}", cmd.kind);
        };
        assert!(matches!(head, Operand::Command(_)));
        let ops: Vec<ArithOp> = steps.iter().map(|s| s.op).collect();
        assert_eq!(ops, vec![ArithOp::Add, ArithOp::Subtract, ArithOp::Multiply]);
        assert_eq!(steps[0].operand, Operand::Constant(Decimal::ONE));
        assert_eq!(steps[2].operand, Operand::Constant(Decimal::from(2)));
    }

    #[test]
    fn test_single_part_interpolation_unwraps() {
        let cmd = optimize(Command::interpolate(vec![Command::variable("$obj")]));
        assert!(matches!(kind_of(&cmd), CommandKind::Variable { .. }));

        let two = optimize(Command::interpolate(vec![
            Command::literal("a"),
            Command::variable("$b"),
        ]));
        assert!(matches!(kind_of(&two), CommandKind::Interpolate(parts) if parts.len() == 2));
    }

    #[test]
    fn test_path_strategy_selection() {
        let single = optimize(Command::path("$x", vec![PathSegment::Property("a".into())]));
        assert_eq!(
            kind_of(&single),
            &CommandKind::Variable {
                name: "$x".into(),
                path: Some(SelectorPath::Single("a".into()))
            }
        );
        let many = optimize(Command::path(
            "$x",
            vec![PathSegment::Property("a".into()), PathSegment::Property("b".into())],
        ));
        assert!(matches!(
            kind_of(&many),
            CommandKind::Variable { path: Some(SelectorPath::Properties(p)), .. } if p.len() == 2
        ));
        let general = optimize(Command::path(
            "$x",
            vec![PathSegment::Property("a".into()), PathSegment::Index(0)],
        ));
        assert!(matches!(
            kind_of(&general),
            CommandKind::Variable { path: Some(SelectorPath::Expression(_)), .. }
        ));
    }

    #[test]
    fn test_recursive_call_links_to_own_index() {
        let body = Command::call("this.Loop", vec![]);
        let module = ModuleBuilder::new("m")
            .function(FunctionDecl::new("first", Signature::default(), Command::noop()))
            .and_then(|b| b.function(FunctionDecl::new("loop", Signature::default(), body)))
            .and_then(ModuleBuilder::build)
            .unwrap();
        let id = module.function_id("loop").unwrap();
        assert_eq!(id, FunctionId(1));
        let decl = module.function(id).unwrap();
        assert!(matches!(
            &decl.body.kind,
            CommandKind::HardwiredCall { function, .. } if *function == id
        ));
    }

    #[test]
    fn test_duplicate_and_unresolved() {
        let mut builder = ModuleBuilder::new("m");
        builder
            .add_function(FunctionDecl::new("run", Signature::default(), Command::noop()))
            .unwrap();
        let err = builder
            .add_function(FunctionDecl::new("RUN", Signature::default(), Command::noop()))
            .unwrap_err();
        assert_eq!(err, CompileError::DuplicateFunction("RUN".into()));

        let err = ModuleBuilder::new("m")
            .function(FunctionDecl::new(
                "run",
                Signature::default(),
                Command::call("this.nothing", vec![]).at(Position::new("m.isl", 2, 5)),
            ))
            .and_then(ModuleBuilder::build)
            .unwrap_err();
        assert_eq!(err.to_string(), "Could not resolve call 'this.nothing' at m.isl:2:5");
    }

    #[test]
    fn test_parse_operator() {
        assert_eq!(parse_operator("StartsWith"), Ok(Operator::StartsWith));
        assert!(matches!(
            parse_operator("~="),
            Err(CompileError::UnknownOperator(_))
        ));
    }
}
