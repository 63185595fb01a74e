//! Parallel foreach tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use isl_runtime::{
    execute, ArithOp, Command, ConditionExpr, ExecutionContext, FunctionDecl, ModuleBuilder,
    Operator, Position, Registry, Signature, Transformer, Value,
};
use rstest::rstest;
use serde_json::json;

fn workers(n: i64) -> Option<Command> {
    Some(Command::literal(json!({ "workers": n })))
}

fn numbers(n: i64) -> Value {
    Value::array((0..n).map(Value::from).collect())
}

#[rstest]
#[case::two(2)]
#[case::five(5)]
#[case::capped(500)]
fn test_results_follow_source_order(#[case] requested: i64) {
    let mut registry = Registry::new();
    registry.register_extension("jitter", |call| {
        let n = call.parameter(0).and_then(Value::as_i64).unwrap_or(0);
        // later elements finish first
        std::thread::sleep(Duration::from_millis((12 - n as u64) * 3));
        Ok(Value::from(format!("item-{}", n)))
    });
    let mut ctx = ExecutionContext::new(registry).with_variable("$items", numbers(12));
    let program = Command::parallel_foreach(
        "$it",
        workers(requested),
        Command::variable("$items"),
        Command::call("jitter", vec![Command::variable("$it")]),
    );
    let expected: Vec<Value> = (0..12).map(|n| Value::from(format!("item-{}", n))).collect();
    assert_eq!(execute(&program, &mut ctx).unwrap(), Value::array(expected));
}

#[test]
fn test_index_binding_and_skipped_iterations() {
    let mut ctx = ExecutionContext::default()
        .with_variable("$items", Value::from(json!(["a", "b", "c", "d"])));
    let program = Command::parallel_foreach(
        "$item",
        workers(3),
        Command::variable("$items"),
        Command::if_then(
            ConditionExpr::compare(Command::variable("$itemIndex"), Operator::NotEqual, Command::literal(1i64)),
            Command::interpolate(vec![Command::variable("$item"), Command::variable("$itemIndex")]),
            None,
        ),
    );
    assert_eq!(
        execute(&program, &mut ctx).unwrap(),
        Value::from(json!(["a0", "c2", "d3"]))
    );
}

#[test]
fn test_failure_waits_for_every_iteration() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let mut registry = Registry::new();
    registry.register_extension("check", move |call| {
        counter.fetch_add(1, Ordering::SeqCst);
        let n = call.parameter(0).and_then(Value::as_i64).unwrap_or(0);
        if n == 3 || n == 5 {
            anyhow::bail!("bad {}", n);
        }
        Ok(Value::from(n))
    });
    let mut ctx = ExecutionContext::new(registry).with_variable("$items", numbers(8));
    let program = Command::parallel_foreach(
        "$n",
        workers(4),
        Command::variable("$items"),
        Command::call("check", vec![Command::variable("$n")]).at(Position::new("par.isl", 2, 3)),
    )
    .at(Position::new("par.isl", 1, 1));

    let err = execute(&program, &mut ctx).unwrap_err();
    assert_eq!(ran.load(Ordering::SeqCst), 8);
    assert_eq!(
        err.message(),
        "Parallel foreach failed at par.isl:1:1.\n\
         Could not Execute '@.check'. Error='bad 3' at par.isl:2:3."
    );
    assert_eq!(err.position(), Some(&Position::new("par.isl", 2, 3)));
}

#[test]
fn test_nested_parallel_loops() {
    let mut ctx = ExecutionContext::default()
        .with_variable("$rows", numbers(3))
        .with_variable("$cols", numbers(2));
    let program = Command::parallel_foreach(
        "$r",
        workers(3),
        Command::variable("$rows"),
        Command::parallel_foreach(
            "$c",
            workers(2),
            Command::variable("$cols"),
            Command::interpolate(vec![Command::variable("$r"), Command::variable("$c")]),
        ),
    );
    assert_eq!(
        execute(&program, &mut ctx).unwrap(),
        Value::from(json!([["00", "01"], ["10", "11"], ["20", "21"]]))
    );
}

#[test]
fn test_iterations_call_module_functions() {
    let mut builder = ModuleBuilder::new("batch");
    builder
        .add_function(FunctionDecl::new(
            "run",
            Signature::default(),
            Command::parallel_foreach(
                "$x",
                workers(4),
                Command::variable("$input"),
                Command::call("this.square", vec![Command::variable("$x")]),
            ),
        ))
        .unwrap();
    builder
        .add_function(FunctionDecl::new(
            "square",
            Signature::of(&["$v"]),
            Command::math(ArithOp::Multiply, Command::variable("$v"), Command::variable("$v")),
        ))
        .unwrap();
    let t = Transformer::new(builder.build().unwrap());
    let mut ctx = ExecutionContext::default().with_variable("$input", numbers(6));
    assert_eq!(
        t.run_default(&mut ctx).unwrap(),
        Value::from(json!([0, 1, 4, 9, 16, 25]))
    );
}

#[test]
fn test_return_from_iteration_ends_function() {
    let mut builder = ModuleBuilder::new("search");
    builder
        .add_function(FunctionDecl::new(
            "run",
            Signature::default(),
            Command::statements(vec![
                Command::parallel_foreach(
                    "$x",
                    workers(4),
                    Command::variable("$input"),
                    Command::if_then(
                        ConditionExpr::compare(Command::variable("$x"), Operator::GreaterOrEqual, Command::literal(2i64)),
                        Command::ret(Command::interpolate(vec![
                            Command::literal("found "),
                            Command::variable("$x"),
                        ])),
                        None,
                    ),
                ),
                Command::literal("not found"),
            ]),
        ))
        .unwrap();
    let t = Transformer::new(builder.build().unwrap());
    let mut ctx = ExecutionContext::default().with_variable("$input", numbers(5));
    // the first returning iteration in source order wins
    assert_eq!(t.run_default(&mut ctx).unwrap(), Value::from("found 2"));
}

#[test]
fn test_empty_or_scalar_source() {
    let mut ctx = ExecutionContext::default().with_variable("$one", "text");
    for source in [Command::variable("$one"), Command::variable("$none")] {
        let program = Command::parallel_foreach("$x", None, source, Command::variable("$x"));
        assert_eq!(execute(&program, &mut ctx).unwrap(), Value::array(vec![]));
    }
}
