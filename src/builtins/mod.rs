// Built-in modifier library and pagination statements
// Installed on a registry by Registry::with_builtins

mod arrays;
mod conversion;
mod math;
mod objects;
mod pagination;
mod strings;

use std::borrow::Cow;

use rust_decimal::Decimal;

use crate::context::{FunctionCall, Registry};
use crate::utils;
use crate::value::{ObjectMap, Value};

/// Register every built-in group on `registry`.
pub(crate) fn register(registry: &mut Registry) {
    strings::register(registry);
    arrays::register(registry);
    math::register(registry);
    objects::register(registry);
    conversion::register(registry);
    pagination::register(registry);
}

// ── Parameter helpers ────────────────────────────────────────────────────────

/// Text of parameter `index`; absent for null, missing or not passed.
fn text<'c>(call: &'c FunctionCall<'_>, index: usize) -> Option<Cow<'c, str>> {
    utils::try_string(call.parameter(index))
}

fn int(call: &FunctionCall<'_>, index: usize) -> Option<i64> {
    utils::try_int(call.parameter(index))
}

/// Decimal of parameter `index`; unlike arithmetic operands, absence stays absent.
fn decimal(call: &FunctionCall<'_>, index: usize) -> Option<Decimal> {
    call.parameter(index)
        .filter(|v| !v.is_absent())
        .and_then(|v| utils::try_decimal(Some(v)))
}

/// Elements of an array or host iterable parameter.
fn elements(call: &FunctionCall<'_>, index: usize) -> Option<Vec<Value>> {
    call.parameter(index)
        .and_then(Value::iter_elements)
        .map(Iterator::collect)
}

fn object<'k>(entries: impl IntoIterator<Item = (&'k str, Value)>) -> Value {
    Value::object_map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<ObjectMap>(),
    )
}
