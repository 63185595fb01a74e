// Conditions, branches and sequential loops
// Loop bodies signal omission through valid_result; loops never splice themselves

use tracing::warn;

use crate::ast::{Command, ConditionExpr, SwitchCase};
use crate::condition;
use crate::context::ExecutionContext;
use crate::evaluator::{Evaluator, Flow};
use crate::functions::bind;
use crate::result::CommandResult;
use crate::utils;
use crate::value::Value;

impl Evaluator {
    /// Evaluate a boolean expression. `or` stops at the first true side.
    pub(crate) fn eval_condition(
        &self,
        condition: &ConditionExpr,
        ctx: &mut ExecutionContext,
    ) -> Result<bool, Flow> {
        match condition {
            ConditionExpr::Simple { left, op, right } => {
                let left = self.value_of(left, ctx)?;
                let right = match right {
                    Some(r) => self.value_of(r, ctx)?,
                    None => None,
                };
                Ok(condition::evaluate(left.as_ref(), *op, right.as_ref()))
            }
            ConditionExpr::And(a, b) => {
                let left = self.eval_condition(a, ctx)?;
                let right = self.eval_condition(b, ctx)?;
                Ok(left && right)
            }
            ConditionExpr::Or(a, b) => Ok(self.eval_condition(a, ctx)? || self.eval_condition(b, ctx)?),
        }
    }

    pub(crate) fn exec_if(
        &self,
        condition: &ConditionExpr,
        then_branch: &Command,
        else_branch: Option<&Command>,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let branch = if self.eval_condition(condition, ctx)? {
            then_branch
        } else {
            match else_branch {
                Some(branch) => branch,
                // nothing to contribute: the enclosing builder drops this entry
                None => return Ok(CommandResult::skip()),
            }
        };
        let result = self.exec(branch, ctx)?;
        Ok(CommandResult {
            value: result.value,
            property_name: None,
            append: Some(true),
            valid_result: Some(true),
        })
    }

    pub(crate) fn exec_switch(
        &self,
        subject: &Command,
        cases: &[SwitchCase],
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let subject = self.value_of(subject, ctx)?;
        for case in cases {
            let right = self.value_of(&case.right, ctx)?;
            if condition::evaluate(subject.as_ref(), case.op, right.as_ref()) {
                return self.exec(&case.result, ctx);
            }
        }
        Ok(CommandResult::none())
    }

    /// `left ?? right` without evaluating `left` twice.
    pub(crate) fn exec_coalesce(
        &self,
        left: &Command,
        right: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let result = self.exec(left, ctx)?;
        if condition::is_valid(result.value_ref()) {
            Ok(result)
        } else {
            self.exec(right, ctx)
        }
    }

    pub(crate) fn exec_while(
        &self,
        command: &Command,
        condition: &ConditionExpr,
        options: Option<&Command>,
        body: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let requested = match options {
            Some(options) => {
                let options = self.value_of(options, ctx)?;
                utils::try_int(options.as_ref().and_then(|o| o.get("maxLoops")))
            }
            None => None,
        };
        let mut budget = self.config().while_budget(requested);

        let mut out = Vec::new();
        while self.eval_condition(condition, ctx)? {
            if budget == 0 {
                warn!(position = %command.position, "while loop stopped: iteration budget exhausted");
                break;
            }
            let result = self.exec(body, ctx)?;
            if !result.is_skipped() {
                out.push(result.into_value());
            }
            budget -= 1;
        }
        Ok(CommandResult::value(Value::array(out)))
    }

    /// Bind `<iterator>` and `<iterator>index` for each element and collect the
    /// body results that were not skipped.
    pub(crate) fn exec_foreach(
        &self,
        command: &Command,
        iterator: &str,
        source: &Command,
        body: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let source = self.value_of(source, ctx)?;
        self.foreach_over(command, iterator, source.as_ref(), body, ctx)
    }

    pub(crate) fn foreach_over(
        &self,
        command: &Command,
        iterator: &str,
        source: Option<&Value>,
        body: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandResult, Flow> {
        let mut out = Vec::new();
        if let Some(elements) = source.and_then(Value::iter_elements) {
            let index_name = format!("{}index", iterator);
            for (i, element) in elements.enumerate() {
                bind(ctx, iterator, element, &command.position)?;
                bind(ctx, &index_name, Value::from(i), &command.position)?;
                let result = self.exec(body, ctx)?;
                if !result.is_skipped() {
                    out.push(result.into_value());
                }
            }
        }
        Ok(CommandResult::value(Value::array(out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ArithOp;
    use crate::condition::Operator;
    use serde_json::json;

    fn run(command: &Command, ctx: &mut ExecutionContext) -> Value {
        Evaluator::new().evaluate(command, ctx).unwrap()
    }

    #[test]
    fn test_if_without_else_is_skipped() {
        let mut ctx = ExecutionContext::default();
        let result = Evaluator::new()
            .exec(
                &Command::if_then(
                    ConditionExpr::exists(Command::literal(false)),
                    Command::literal(1i64),
                    None,
                ),
                &mut ctx,
            )
            .unwrap();
        assert!(result.is_skipped());
    }

    #[test]
    fn test_if_taken_branch_is_valid() {
        let mut ctx = ExecutionContext::default();
        let result = Evaluator::new()
            .exec(
                &Command::if_then(
                    ConditionExpr::exists(Command::literal(true)),
                    Command::variable("$missing"),
                    None,
                ),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(result.valid_result, Some(true));
        assert_eq!(result.value, None);
    }

    #[test]
    fn test_or_short_circuits() {
        let mut ctx = ExecutionContext::default();
        let cond = ConditionExpr::exists(Command::literal(true)).or(ConditionExpr::exists(
            Command::statements(vec![Command::assign_variable("$touched", Command::literal(1i64))]),
        ));
        assert_eq!(run(&Command::condition(cond), &mut ctx), Value::Bool(true));
        assert_eq!(ctx.operation.get_variable("$touched"), None);
    }

    #[test]
    fn test_switch_picks_first_match() {
        let mut ctx = ExecutionContext::default().with_variable("$status", "B");
        let cmd = Command::switch(
            Command::variable("$status"),
            vec![
                SwitchCase::new(Operator::Equal, Command::literal("a"), Command::literal(1i64)),
                SwitchCase::new(Operator::Equal, Command::literal("b"), Command::literal(2i64)),
                SwitchCase::otherwise(Command::literal(3i64)),
            ],
        );
        // text comparison is case-sensitive
        assert_eq!(run(&cmd, &mut ctx), Value::from(3i64));

        let mut ctx = ExecutionContext::default().with_variable("$status", "b");
        assert_eq!(run(&cmd, &mut ctx), Value::from(2i64));
    }

    #[test]
    fn test_coalesce() {
        let mut ctx = ExecutionContext::default().with_variable("$empty", "");
        let cmd = Command::coalesce(Command::variable("$empty"), Command::literal("fallback"));
        assert_eq!(run(&cmd, &mut ctx), Value::from("fallback"));
        let cmd = Command::coalesce(Command::literal(0i64), Command::literal("fallback"));
        assert_eq!(run(&cmd, &mut ctx), Value::from(0i64));
    }

    #[test]
    fn test_while_counts_with_variable() {
        let mut ctx = ExecutionContext::default().with_variable("$i", 0i64);
        let cmd = Command::while_loop(
            ConditionExpr::compare(Command::variable("$i"), Operator::Less, Command::literal(3i64)),
            None,
            Command::statements(vec![
                Command::assign_variable(
                    "$i",
                    Command::math(ArithOp::Add, Command::variable("$i"), Command::literal(1i64)),
                ),
                Command::variable("$i"),
            ]),
        );
        assert_eq!(run(&cmd, &mut ctx), Value::from(json!([1, 2, 3])));
    }

    #[test]
    fn test_foreach_binds_index() {
        let mut ctx = ExecutionContext::default().with_variable("$list", Value::from(json!(["a", "b"])));
        let cmd = Command::foreach(
            "$x",
            Command::variable("$list"),
            Command::interpolate(vec![Command::variable("$x"), Command::variable("$xIndex")]),
        );
        assert_eq!(run(&cmd, &mut ctx), Value::from(json!(["a0", "b1"])));
    }

    #[test]
    fn test_foreach_over_non_collection_is_empty() {
        let mut ctx = ExecutionContext::default().with_variable("$one", 5i64);
        let cmd = Command::foreach("$x", Command::variable("$one"), Command::variable("$x"));
        assert_eq!(run(&cmd, &mut ctx), Value::array(vec![]));
    }
}
