// Parallel foreach on the process-wide worker pool
// Dispatch every element, then collect results and failures in source order

use std::cell::Cell;
use std::sync::{mpsc, Arc, OnceLock};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::ast::{Command, Position};
use crate::context::ExecutionContext;
use crate::evaluator::{Evaluator, Flow, TransformError};
use crate::functions::bind;
use crate::result::CommandResult;
use crate::utils;
use crate::value::Value;

const POOL_STACK_SIZE: usize = 8 * 1024 * 1024;

static POOL: OnceLock<Result<Runtime, String>> = OnceLock::new();

thread_local! {
    /// Set on pool threads. A parallel loop started there runs inline so the pool
    /// can never wait on itself.
    static IN_POOL: Cell<bool> = const { Cell::new(false) };
}

/// The shared pool, started on first use. Its size is fixed from then on.
fn pool(threads: usize) -> Result<&'static Runtime, TransformError> {
    POOL.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(threads.max(1))
            .thread_name("isl-parallel")
            .thread_stack_size(POOL_STACK_SIZE)
            .build()
            .map_err(|e| e.to_string())
    })
    .as_ref()
    .map_err(|e| TransformError::Invalid(format!("Could not start the parallel worker pool: {}", e)))
}

type Outcome = Result<CommandResult, Flow>;

impl Evaluator {
    pub(crate) fn exec_parallel_foreach(
        &self,
        command: &Command,
        iterator: &str,
        options: Option<&Command>,
        source: &Command,
        body: &Arc<Command>,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let source = self.value_of(source, ctx)?;
        let requested = match options {
            Some(options) => {
                let options = self.value_of(options, ctx)?;
                utils::try_int(options.as_ref().and_then(|o| o.get("workers")))
            }
            None => None,
        };
        let workers = self.config().worker_count(requested);
        if workers == 1 {
            return self.foreach_over(command, iterator, source.as_ref(), body, ctx);
        }

        let elements: Vec<Value> = source
            .as_ref()
            .and_then(Value::iter_elements)
            .map(Iterator::collect)
            .unwrap_or_default();

        // every iteration gets its own scope forked from the caller's
        let index_name = format!("{}index", iterator);
        let mut children = Vec::with_capacity(elements.len());
        for (i, element) in elements.into_iter().enumerate() {
            let mut child = ctx.parallel_child();
            bind(&mut child, iterator, element, &command.position)?;
            bind(&mut child, &index_name, Value::from(i), &command.position)?;
            children.push(child);
        }

        let nested = IN_POOL.with(Cell::get);
        debug!(count = children.len(), workers, nested, position = %command.position, "parallel foreach");

        let outcomes = if nested {
            children
                .into_iter()
                .map(|mut child| self.exec(body, &mut child))
                .collect()
        } else {
            self.dispatch(children, Arc::clone(body), workers, &command.position)?
        };
        collect(command, outcomes)
    }

    /// Run one task per child on the pool, at most `workers` at a time, and wait
    /// for all of them. Outcomes come back in child order.
    fn dispatch(
        &self,
        children: Vec<ExecutionContext>,
        body: Arc<Command>,
        workers: usize,
        position: &Position,
    ) -> Result<Vec<Outcome>, TransformError> {
        let runtime = pool(self.config().pool_threads)?;
        let gate = Arc::new(Semaphore::new(workers));
        let evaluator = self.clone();
        let loop_position = position.clone();
        let (tx, rx) = mpsc::channel();

        runtime.spawn(async move {
            let handles: Vec<_> = children
                .into_iter()
                .map(|child| {
                    tokio::spawn(run_item(
                        Arc::clone(&gate),
                        evaluator.clone(),
                        Arc::clone(&body),
                        child,
                    ))
                })
                .collect();

            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(panicked(e, &loop_position)),
                };
                outcomes.push(outcome);
            }
            // the receiver only goes away if the caller unwound
            let _ = tx.send(outcomes);
        });

        rx.recv().map_err(|_| {
            TransformError::new(
                format!("Parallel foreach at {} lost its worker results.", position),
                position.clone(),
            )
        })
    }
}

async fn run_item(
    gate: Arc<Semaphore>,
    evaluator: Evaluator,
    body: Arc<Command>,
    mut child: ExecutionContext,
) -> Outcome {
    let _permit = gate
        .acquire_owned()
        .await
        .map_err(|e| TransformError::Invalid(format!("Worker gate closed: {}", e)))?;
    let position = body.position.clone();
    match tokio::task::spawn_blocking(move || {
        IN_POOL.with(|flag| flag.set(true));
        evaluator.exec(&body, &mut child)
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => Err(panicked(e, &position)),
    }
}

fn panicked(error: tokio::task::JoinError, position: &Position) -> Flow {
    TransformError::new(format!("Task panicked: {} at {}.", error, position), position.clone()).into()
}

/// Fold outcomes in source order. The first failure wins and names the loop;
/// a `return` from any iteration keeps unwinding.
fn collect(command: &Command, outcomes: Vec<Outcome>) -> Result<CommandResult, Flow> {
    let mut out = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(result) => {
                if !result.is_skipped() {
                    out.push(result.into_value());
                }
            }
            Err(Flow::Return(value)) => return Err(Flow::Return(value)),
            Err(Flow::Error(TransformError::Failed {
                message,
                position,
                source,
            })) => {
                return Err(TransformError::Failed {
                    message: format!("Parallel foreach failed at {}.\n{}", command.position, message),
                    position,
                    source,
                }
                .into())
            }
            Err(Flow::Error(invalid)) => return Err(invalid.into()),
        }
    }
    Ok(CommandResult::value(Value::array(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Registry;
    use serde_json::json;

    fn list(n: usize) -> Value {
        Value::array((0..n).map(Value::from).collect())
    }

    #[test]
    fn test_results_keep_source_order() {
        let mut registry = Registry::new();
        registry.register_extension("slow", |call| {
            let n = call.parameter(0).and_then(Value::as_i64).unwrap_or(0);
            std::thread::sleep(std::time::Duration::from_millis(((10 - n) * 5) as u64));
            Ok(Value::from(n * 10))
        });
        let mut ctx = ExecutionContext::new(registry).with_variable("$list", list(10));
        let cmd = Command::parallel_foreach(
            "$it",
            Some(Command::literal(json!({"workers": 5}))),
            Command::variable("$list"),
            Command::call("slow", vec![Command::variable("$it")]),
        );
        let result = Evaluator::new().evaluate(&cmd, &mut ctx).unwrap();
        assert_eq!(
            result,
            Value::array((0..10).map(|i| Value::from(i * 10)).collect())
        );
    }

    #[test]
    fn test_iteration_writes_stay_local() {
        let mut ctx = ExecutionContext::default()
            .with_variable("$list", list(4))
            .with_variable("$shared", "caller");
        let cmd = Command::parallel_foreach(
            "$it",
            None,
            Command::variable("$list"),
            Command::statements(vec![
                Command::assign_variable("$shared", Command::variable("$it")),
                Command::variable("$shared"),
            ]),
        );
        let result = Evaluator::new().evaluate(&cmd, &mut ctx).unwrap();
        assert_eq!(result, list(4));
        assert_eq!(ctx.operation.get_variable("$shared"), Some(&Value::from("caller")));
        assert_eq!(ctx.operation.get_variable("$it"), None);
    }

    #[test]
    fn test_single_worker_runs_sequentially() {
        let mut ctx = ExecutionContext::default().with_variable("$list", list(3));
        let cmd = Command::parallel_foreach(
            "$it",
            Some(Command::literal(json!({"workers": 1}))),
            Command::variable("$list"),
            Command::variable("$itIndex"),
        );
        let result = Evaluator::new().evaluate(&cmd, &mut ctx).unwrap();
        assert_eq!(result, list(3));
        // the sequential form binds in the caller's scope
        assert_eq!(ctx.operation.get_variable("$it"), Some(&Value::from(2i64)));
    }

    #[test]
    fn test_collect_reports_first_failure_in_order() {
        let command = Command::noop().at(Position::new("loop.isl", 4, 1));
        let outcomes = vec![
            Ok(CommandResult::value(1i64)),
            Err(Flow::Error(TransformError::new("second", Position::new("loop.isl", 9, 2)))),
            Err(Flow::Error(TransformError::new("third", Position::new("loop.isl", 9, 3)))),
        ];
        let Err(Flow::Error(err)) = collect(&command, outcomes) else {
            panic!("expected a failure");
        };
        assert_eq!(err.message(), "Parallel foreach failed at loop.isl:4:1.\nsecond");
        assert_eq!(err.position(), Some(&Position::new("loop.isl", 9, 2)));
    }
}
