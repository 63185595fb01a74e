// Array modifiers and the Array.* helpers
// Inputs are never mutated; every modifier returns a new array

use std::collections::HashSet;

use crate::context::{FunctionCall, Registry};
use crate::value::Value;

use super::{elements, int, text};

pub(super) fn register(registry: &mut Registry) {
    registry.register_extension("modifier.isEmpty", |call| Ok(Value::Bool(is_empty(call.parameter(0)))));
    registry.register_extension("modifier.isNotEmpty", |call| {
        Ok(Value::Bool(!is_empty(call.parameter(0))))
    });
    registry.register_extension("modifier.at", at);
    registry.register_extension("modifier.first", |call| {
        Ok(elements(call, 0).and_then(|items| items.into_iter().next()).into())
    });
    registry.register_extension("modifier.last", |call| {
        Ok(elements(call, 0).and_then(|mut items| items.pop()).into())
    });
    registry.register_extension("modifier.push", push);
    registry.register_extension("modifier.pop", |call| {
        Ok(elements(call, 0).and_then(|mut items| items.pop()).into())
    });
    registry.register_extension("modifier.pushItems", push_items);
    registry.register_extension("modifier.reverse", reverse);
    registry.register_extension("modifier.take", |call| Ok(take_drop(call, true)));
    registry.register_extension("modifier.drop", |call| Ok(take_drop(call, false)));
    registry.register_extension("modifier.indexOf", |call| Ok(index_of(call, false)));
    registry.register_extension("modifier.lastIndexOf", |call| Ok(index_of(call, true)));
    registry.register_extension("modifier.chunk", chunk);
    registry.register_extension("modifier.slice", slice);
    registry.register_extension("modifier.unique", unique);
    registry.register_extension("Array.slice", slice);
    registry.register_extension("Array.unique", unique);
    registry.register_extension("Array.range", range);
}

/// Only containers can be non-empty.
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Iterable(it)) => it.iter().next().is_none(),
        _ => true,
    }
}

fn at(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let index = int(call, 1).unwrap_or(0);
    let Ok(index) = usize::try_from(index) else {
        return Ok(Value::Null);
    };
    Ok(elements(call, 0).and_then(|items| items.into_iter().nth(index)).into())
}

/// `push(item)`: an absent input starts a new array; non-arrays pass through.
fn push(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let item = call.parameter(1).cloned().unwrap_or(Value::Null);
    match call.parameter(0) {
        None | Some(Value::Null | Value::Missing) => Ok(Value::array(vec![item])),
        Some(Value::Array(_) | Value::Iterable(_)) => {
            let mut items = elements(call, 0).unwrap_or_default();
            items.push(item);
            Ok(Value::array(items))
        }
        Some(other) => Ok(other.clone()),
    }
}

/// `pushItems(items)`: concatenation; a non-array argument leaves the input alone.
fn push_items(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(extra) = elements(call, 1) else {
        return Ok(call.parameter(0).cloned().unwrap_or(Value::Null));
    };
    match elements(call, 0) {
        Some(mut items) => {
            items.extend(extra);
            Ok(Value::array(items))
        }
        None => Ok(Value::array(extra)),
    }
}

/// Arrays reverse their elements, text reverses its characters.
fn reverse(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    if let Some(mut items) = elements(call, 0) {
        items.reverse();
        return Ok(Value::array(items));
    }
    Ok(text(call, 0).map(|s| s.chars().rev().collect::<String>()).into())
}

/// `take(n)` / `drop(n)`; `n` defaults to one.
fn take_drop(call: &FunctionCall<'_>, take: bool) -> Value {
    let Some(items) = elements(call, 0) else {
        return Value::Null;
    };
    let n = (int(call, 1).unwrap_or(1).max(0) as usize).min(items.len());
    let out = if take {
        items[..n].to_vec()
    } else {
        items[n..].to_vec()
    };
    Value::array(out)
}

fn index_of(call: &FunctionCall<'_>, last: bool) -> Value {
    let needle = call.parameter(1).cloned().unwrap_or(Value::Null);
    let items = elements(call, 0).unwrap_or_default();
    let found = if last {
        items.iter().rposition(|item| *item == needle)
    } else {
        items.iter().position(|item| *item == needle)
    };
    found.map_or(Value::from(-1i64), Value::from)
}

fn chunk(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let input = call.parameter(0).cloned().unwrap_or(Value::Null);
    let size = int(call, 1).unwrap_or(0);
    match elements(call, 0) {
        Some(items) if size > 0 => Ok(Value::array(
            items
                .chunks(size as usize)
                .map(|c| Value::array(c.to_vec()))
                .collect(),
        )),
        _ => Ok(input),
    }
}

/// `slice(from, to)`: negative offsets count from the end, a missing `to` is the end.
fn slice(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(items) = elements(call, 0) else {
        return Ok(Value::Null);
    };
    let len = items.len() as i64;
    let resolve = |offset: i64| -> usize {
        let at = if offset < 0 { len + offset } else { offset };
        at.clamp(0, len) as usize
    };
    let from = resolve(int(call, 1).unwrap_or(0));
    let to = resolve(int(call, 2).unwrap_or(len));
    if from >= to {
        return Ok(Value::array(vec![]));
    }
    Ok(Value::array(items[from..to].to_vec()))
}

/// `unique()` drops repeated elements; `unique("a.b")` compares by that property path.
fn unique(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(items) = elements(call, 0) else {
        return Ok(Value::Null);
    };
    let path: Option<Vec<String>> = text(call, 1).map(|p| {
        let p = p.trim_start_matches('$').trim_start_matches('.');
        p.split('.').filter(|s| !s.is_empty()).map(str::to_string).collect()
    });
    let mut seen = HashSet::new();
    let kept = items
        .into_iter()
        .filter(|item| {
            let key = match &path {
                Some(path) => path
                    .iter()
                    .try_fold(item, |v, key| v.get(key))
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                None => item.to_string(),
            };
            seen.insert(key)
        })
        .collect();
    Ok(Value::array(kept))
}

/// `Array.range(start, count, step)`: `count` numbers from `start`.
fn range(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let start = int(call, 0).unwrap_or(0);
    let count = int(call, 1).unwrap_or(0).max(0);
    let step = int(call, 2).unwrap_or(1);
    if step == 0 {
        anyhow::bail!("Array.range step must not be zero");
    }
    let mut out = Vec::with_capacity(count.min(1024) as usize);
    let mut current = start;
    for _ in 0..count {
        out.push(Value::from(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::array(out))
}
