// Pagination statements: @.Pagination.Page / Cursor / Date ( $var, {options} ) { block }
// The block runs once per page with $var describing the page; it steers the loop by editing $var

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::ast::CommandKind;
use crate::condition;
use crate::context::{FunctionCall, Registry};
use crate::datetime;
use crate::utils;
use crate::value::Value;

use super::object;

const DEFAULT_PAGE_SIZE: i64 = 100;
const DEFAULT_DATE_STEP: &str = "P1D";

pub(super) fn register(registry: &mut Registry) {
    registry.register_statement_extension("Pagination.Page", page);
    registry.register_statement_extension("Pagination.Cursor", cursor);
    registry.register_statement_extension("Pagination.Date", date);
}

/// The page variable has to be written as a bare `$name` in the first argument.
fn page_variable(call: &FunctionCall<'_>) -> anyhow::Result<String> {
    if let CommandKind::StatementCall { args, .. } = &call.command.kind {
        if let Some(CommandKind::Variable { name, path: None }) = args.first().map(|a| &a.kind) {
            return Ok(name.clone());
        }
    }
    anyhow::bail!("Unknown format for variable for {}", call.name)
}

fn option<'c>(call: &'c FunctionCall<'_>, key: &str) -> Option<&'c Value> {
    call.parameter(1).and_then(|o| o.get(key))
}

/// Numbered pages: keeps going while the block sets `$page.hasMorePages = true`.
fn page(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let variable = page_variable(call)?;
    let start_index = utils::try_int(option(call, "startIndex")).unwrap_or(0);
    let page_size = match utils::try_int(option(call, "pageSize")) {
        Some(size) if size > 0 => size,
        _ => DEFAULT_PAGE_SIZE,
    };

    let mut page = start_index;
    loop {
        let offset = |p: i64| p.checked_mul(page_size).map_or(Value::Null, Value::from);
        let state = object([
            ("name", Value::from(variable.as_str())),
            ("startIndex", Value::from(start_index)),
            ("pageSize", Value::from(page_size)),
            ("page", Value::from(page)),
            ("fromOffset", offset(page)),
            ("toOffset", page.checked_add(1).map_or(Value::Null, offset)),
            ("hasMorePages", Value::Bool(false)),
        ]);
        call.context.operation.set_variable(&variable, state)?;
        call.run_block()?;

        let more = call
            .context
            .operation
            .get_variable(&variable)
            .and_then(|v| v.get("hasMorePages"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !more {
            debug!(variable = %variable, pages = page - start_index + 1, "page pagination finished");
            return Ok(Value::Null);
        }
        page = match page.checked_add(1) {
            Some(next) => next,
            None => return Ok(Value::Null),
        };
    }
}

/// Cursor pages: the block stores the next cursor in `$page.next`; the loop ends
/// when no cursor comes back or the same cursor repeats.
fn cursor(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let variable = page_variable(call)?;
    let mut current = Value::Null;
    let mut pages = 0usize;
    loop {
        let state = object([("current", current.clone()), ("next", Value::Null)]);
        call.context.operation.set_variable(&variable, state)?;
        call.run_block()?;
        pages += 1;

        let next = call
            .context
            .operation
            .get_variable(&variable)
            .and_then(|v| v.get("next"))
            .cloned();
        match next {
            Some(next) if condition::is_valid(Some(&next)) && !condition::equalish(Some(&next), Some(&current)) => {
                current = next;
            }
            _ => break,
        }
    }
    debug!(variable = %variable, pages, "cursor pagination finished");
    Ok(Value::Null)
}

fn instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Date(d) => Some(*d),
        Value::String(s) => datetime::parse_iso8601(s).ok(),
        _ => None,
    }
}

/// Date windows: `[startDate, startDate + duration)` and so on up to `endDate`.
/// A trailing window shorter than the duration is clamped to `endDate`; negative
/// durations walk backwards.
fn date(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let variable = page_variable(call)?;
    let Some(start) = instant(option(call, "startDate")) else {
        anyhow::bail!("{} requires a startDate", call.name);
    };
    let end = instant(option(call, "endDate")).unwrap_or_else(Utc::now);
    let step_text = utils::try_string(option(call, "duration"))
        .map(|s| s.into_owned())
        .unwrap_or_else(|| DEFAULT_DATE_STEP.to_string());
    let step = datetime::parse_duration(&step_text)?;
    if step.is_zero() {
        anyhow::bail!("{} needs a non-zero duration, got {}", call.name, step_text);
    }
    let backwards = step < Duration::zero();

    let mut window_start = start;
    let mut page = 0i64;
    loop {
        let Some(mut window_end) = window_start.checked_add_signed(step) else {
            break;
        };
        let overshoots = |at: DateTime<Utc>| if backwards { at < end } else { at > end };
        let end_inside = if backwards {
            end < window_start
        } else {
            end > window_start
        };
        if overshoots(window_end) && end_inside {
            window_end = end;
        }
        if overshoots(window_end) {
            break;
        }

        let state = object([
            ("startDate", Value::from(window_start)),
            ("endDate", Value::from(window_end)),
            ("page", Value::from(page)),
        ]);
        call.context.operation.set_variable(&variable, state)?;
        call.run_block()?;

        window_start = window_end;
        page += 1;
    }
    debug!(variable = %variable, pages = page, "date pagination finished");
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::{ArithOp, Command, ConditionExpr};
    use crate::condition::Operator;
    use crate::context::{ExecutionContext, Registry};
    use crate::execute;
    use crate::value::Value;

    fn lit(v: impl Into<Value>) -> Command {
        Command::literal(v)
    }

    /// `$seen = $seen | push($page.<field>)` as the block.
    fn collect(field: &str) -> Command {
        Command::assign_variable(
            "$seen",
            Command::modifier(
                "push",
                Command::variable("$seen"),
                vec![Command::property(Command::variable("$page"), field, None)],
            ),
        )
    }

    fn run(program: Command) -> (Value, Value) {
        let mut ctx = ExecutionContext::new(Registry::with_builtins()).with_variable("$seen", json!([]));
        let result = execute(&program, &mut ctx).unwrap();
        let seen = ctx.operation.get_variable("$seen").cloned().unwrap_or(Value::Null);
        (result, seen)
    }

    #[test]
    fn test_page_runs_while_more_pages() {
        // ask for more until the third page
        let body = Command::statements(vec![
            collect("fromOffset"),
            Command::assign_variable_path(
                "$page",
                vec!["hasMorePages".to_string()],
                Command::condition(ConditionExpr::compare(
                    Command::property(Command::variable("$page"), "page", None),
                    Operator::Less,
                    lit(2i64),
                )),
            ),
        ]);
        let program = Command::statement_call(
            "Pagination.Page",
            vec![Command::variable("$page"), lit(json!({"pageSize": 25}))],
            body,
        );
        let (result, seen) = run(program);
        assert_eq!(result, Value::Null);
        assert_eq!(seen, Value::from(json!([0, 25, 50])));
    }

    #[test]
    fn test_page_defaults() {
        let program = Command::statement_call(
            "Pagination.Page",
            vec![Command::variable("$page"), lit(json!({"pageSize": 0, "startIndex": 2}))],
            collect("toOffset"),
        );
        let (_, seen) = run(program);
        assert_eq!(seen, Value::from(json!([300])));
    }

    #[test]
    fn test_page_needs_a_plain_variable() {
        let program = Command::statement_call("Pagination.Page", vec![lit("$page")], Command::noop());
        let mut ctx = ExecutionContext::new(Registry::with_builtins());
        let err = execute(&program, &mut ctx).unwrap_err().to_string();
        assert!(err.contains("Unknown format for variable for Pagination.Page"), "{err}");
    }

    #[test]
    fn test_cursor_follows_next_until_it_repeats() {
        // next = current + 1, capped at 3 so the cursor eventually repeats
        let body = Command::statements(vec![
            collect("current"),
            Command::assign_variable_path(
                "$page",
                vec!["next".to_string()],
                Command::modifier(
                    "Math.min",
                    Command::array(vec![
                        Command::math(
                            ArithOp::Add,
                            Command::property(Command::variable("$page"), "current", None),
                            lit(1i64),
                        ),
                        lit(3i64),
                    ]),
                    vec![],
                ),
            ),
        ]);
        let program =
            Command::statement_call("Pagination.Cursor", vec![Command::variable("$page")], body);
        let (_, seen) = run(program);
        assert_eq!(seen, Value::from(json!([null, 1, 2, 3])));
    }

    #[test]
    fn test_cursor_stops_without_next() {
        let program =
            Command::statement_call("Pagination.Cursor", vec![Command::variable("$page")], collect("current"));
        let (_, seen) = run(program);
        assert_eq!(seen, Value::from(json!([null])));
    }

    #[test]
    fn test_date_windows_clamp_to_end() {
        let options = json!({
            "startDate": "2024-01-01T00:00:00Z",
            "endDate": "2024-01-03T12:00:00Z",
            "duration": "P1D"
        });
        let program = Command::statement_call(
            "Pagination.Date",
            vec![Command::variable("$page"), lit(options)],
            collect("endDate"),
        );
        let (_, seen) = run(program);
        let ends: Vec<String> = seen
            .as_array()
            .unwrap()
            .iter()
            .map(|v| crate::datetime::format_iso8601(v.as_date().unwrap()))
            .collect();
        assert_eq!(
            ends,
            [
                "2024-01-02T00:00:00.000Z",
                "2024-01-03T00:00:00.000Z",
                "2024-01-03T12:00:00.000Z"
            ]
        );
    }

    #[test]
    fn test_date_walks_backwards() {
        let options = json!({
            "startDate": "2024-01-03T00:00:00Z",
            "endDate": "2024-01-01T00:00:00Z",
            "duration": "-P1D"
        });
        let program = Command::statement_call(
            "Pagination.Date",
            vec![Command::variable("$page"), lit(options)],
            collect("page"),
        );
        let (_, seen) = run(program);
        assert_eq!(seen, Value::from(json!([0, 1])));
    }

    #[test]
    fn test_date_rejects_bad_duration() {
        let options = json!({"startDate": "2024-01-01", "duration": "one day"});
        let program = Command::statement_call(
            "Pagination.Date",
            vec![Command::variable("$page"), lit(options)],
            Command::noop(),
        );
        let mut ctx = ExecutionContext::new(Registry::with_builtins());
        let err = execute(&program, &mut ctx).unwrap_err().to_string();
        assert!(err.contains("Could not parse duration one day"), "{err}");
    }
}
