// Object modifiers: keys, sorting, picking and renaming properties, type names

use std::cmp::Ordering;

use crate::context::{FunctionCall, Registry};
use crate::utils;
use crate::value::{ObjectMap, Value};

use super::{object, text};

pub(super) fn register(registry: &mut Registry) {
    registry.register_extension("modifier.length", length);
    registry.register_extension("modifier.keys", keys);
    registry.register_extension("modifier.kv", kv);
    registry.register_extension("modifier.sort", sort);
    registry.register_extension("modifier.delete", delete);
    registry.register_extension("modifier.getProperty", get_property);
    registry.register_extension("modifier.setProperty", set_property);
    registry.register_extension("modifier.pick", |call| Ok(select_keys(call, true)));
    registry.register_extension("modifier.omit", |call| Ok(select_keys(call, false)));
    registry.register_extension("modifier.rename", rename);
    registry.register_extension("modifier.has", |call| {
        let key = text(call, 1);
        let found = match (call.parameter(0).and_then(Value::as_object), key) {
            (Some(map), Some(key)) => map.contains_key(&*key),
            _ => false,
        };
        Ok(Value::Bool(found))
    });
    registry.register_extension("modifier.default", default);
    registry.register_extension("modifier.typeof", type_of);
}

/// Characters of text, elements of arrays, members of objects.
fn length(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let n = match call.parameter(0) {
        None | Some(Value::Null | Value::Missing) => 0,
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        Some(Value::Iterable(it)) => it.iter().count(),
        other => utils::try_string(other).map_or(0, |s| s.chars().count()),
    };
    Ok(Value::from(n))
}

fn keys(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(call
        .parameter(0)
        .and_then(Value::as_object)
        .map(|map| Value::array(map.keys().map(|k| Value::from(k.as_str())).collect()))
        .into())
}

/// `[{key, value}]` pairs, ready for a foreach.
fn kv(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(call
        .parameter(0)
        .and_then(Value::as_object)
        .map(|map| {
            Value::array(
                map.iter()
                    .map(|(k, v)| object([("key", Value::from(k.as_str())), ("value", v.clone())]))
                    .collect(),
            )
        })
        .into())
}

fn delete(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(map) = call.parameter(0).and_then(Value::as_object) else {
        return Ok(Value::Null);
    };
    let mut out = map.clone();
    if let Some(name) = text(call, 1) {
        out.shift_remove(&*name);
    }
    Ok(Value::object_map(out))
}

/// Case-insensitive property read.
fn get_property(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let (Some(map), Some(name)) = (call.parameter(0).and_then(Value::as_object), text(call, 1)) else {
        return Ok(Value::Null);
    };
    Ok(map
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        .map(|(_, v)| v.clone())
        .into())
}

/// `setProperty(name, value)`; a non-object input starts a fresh object.
fn set_property(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let mut out = call
        .parameter(0)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(name) = text(call, 1) {
        let value = call.parameter(2).cloned().unwrap_or(Value::Null);
        out.insert(name.into_owned(), value);
    }
    Ok(Value::object_map(out))
}

/// `pick(keys...)` / `omit(keys...)`; array arguments contribute every element.
fn select_keys(call: &FunctionCall<'_>, keep: bool) -> Value {
    let Some(map) = call.parameter(0).and_then(Value::as_object) else {
        return Value::Null;
    };
    let mut names: Vec<String> = Vec::new();
    for arg in call.parameters.iter().skip(1) {
        match arg.iter_elements() {
            Some(items) => names.extend(items.filter_map(|v| utils::try_string(Some(&v)).map(|s| s.into_owned()))),
            None => names.extend(utils::try_string(Some(arg)).map(|s| s.into_owned())),
        }
    }
    let mut out = map.clone();
    out.retain(|k, _| names.contains(k) == keep);
    Value::object_map(out)
}

fn rename(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(map) = call.parameter(0).and_then(Value::as_object) else {
        return Ok(Value::Null);
    };
    let (Some(from), Some(to)) = (text(call, 1), text(call, 2)) else {
        return Ok(Value::object_map(map.clone()));
    };
    if !map.contains_key(&*from) {
        return Ok(Value::object_map(map.clone()));
    }
    let mut out = ObjectMap::with_capacity(map.len());
    for (k, v) in map.iter() {
        let key = if *k == *from { to.to_string() } else { k.clone() };
        out.insert(key, v.clone());
    }
    if let Some(name) = map.type_name() {
        out.set_type_name(name);
    }
    Ok(Value::object_map(out))
}

/// The second argument when the input is absent, empty text, or an empty container.
fn default(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let empty = match call.parameter(0) {
        None | Some(Value::Null | Value::Missing) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    };
    let pick = if empty { 1 } else { 0 };
    Ok(call.parameter(pick).cloned().unwrap_or(Value::Null))
}

/// Type names: a typed object reports its declared type.
fn type_of(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let name = match call.parameter(0) {
        None | Some(Value::Null | Value::Missing) => "null",
        Some(Value::Object(map)) => map.type_name().unwrap_or("object"),
        Some(Value::Array(_) | Value::Iterable(_)) => "array",
        Some(Value::String(_)) => "string",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(n)) if n.fract() == 0.0 => "integer",
        Some(Value::Decimal(d)) if d.fract().is_zero() => "integer",
        Some(Value::Number(_) | Value::Decimal(_)) => "number",
        Some(Value::Date(_)) => "datetime",
    };
    Ok(Value::from(name))
}

// ── Sorting ──────────────────────────────────────────────────────────────────

struct SortOptions {
    by: Option<String>,
    descending: bool,
    case_sensitive: bool,
}

impl SortOptions {
    fn from_value(options: Option<&Value>) -> Self {
        let get = |key: &str| options.and_then(|o| o.get(key));
        SortOptions {
            by: utils::try_string(get("by")).map(|s| s.into_owned()),
            descending: utils::try_string(get("order")).is_some_and(|o| o.eq_ignore_ascii_case("desc")),
            case_sensitive: !matches!(get("caseSensitive"), Some(Value::Bool(false)))
                && !utils::try_string(get("caseSensitive")).is_some_and(|s| s.eq_ignore_ascii_case("false")),
        }
    }

    fn fold(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }

    fn order(&self, ordering: Ordering) -> Ordering {
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

#[derive(PartialEq, PartialOrd)]
enum SortKey {
    Number(rust_decimal::Decimal),
    Bool(bool),
    Text(String),
}

/// `sort({by, order, caseSensitive})`: objects by key, arrays by value (or by the
/// `by` property of each element), text by character. The first element decides
/// whether arrays compare as numbers, booleans or text.
fn sort(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let options = SortOptions::from_value(call.parameter(1));
    match call.parameter(0) {
        Some(Value::Object(map)) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| options.order(options.fold(a.0).cmp(&options.fold(b.0))));
            let mut out: ObjectMap = entries.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            if let Some(name) = map.type_name() {
                out.set_type_name(name);
            }
            Ok(Value::object_map(out))
        }
        Some(list @ (Value::Array(_) | Value::Iterable(_))) => {
            let mut items: Vec<Value> = list.iter_elements().map(Iterator::collect).unwrap_or_default();
            let Some(first) = items.first() else {
                return Ok(Value::array(items));
            };
            let project = |item: &Value| -> Option<Value> {
                match &options.by {
                    Some(by) if !by.is_empty() => item.get(by).cloned().or_else(|| Some(item.clone())),
                    _ => Some(item.clone()),
                }
            };
            let kind = project(first);
            let key = |item: &Value| -> Option<SortKey> {
                let value = project(item)?;
                match &kind {
                    Some(Value::Number(_) | Value::Decimal(_)) => {
                        utils::try_decimal(Some(&value).filter(|v| !v.is_absent())).map(SortKey::Number)
                    }
                    Some(Value::Bool(_)) => value.as_bool().map(SortKey::Bool),
                    _ => value.as_str().map(|s| SortKey::Text(options.fold(s))),
                }
            };
            items.sort_by(|a, b| {
                let ordering = key(a).partial_cmp(&key(b)).unwrap_or(Ordering::Equal);
                options.order(ordering)
            });
            Ok(Value::array(items))
        }
        Some(Value::String(s)) => {
            let mut chars: Vec<char> = s.chars().collect();
            if options.case_sensitive {
                chars.sort_unstable();
            } else {
                chars.sort_by_key(|c| c.to_lowercase().collect::<String>());
            }
            if options.descending {
                chars.reverse();
            }
            Ok(Value::from(chars.into_iter().collect::<String>()))
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::Command;
    use crate::context::{ExecutionContext, Registry};
    use crate::execute;
    use crate::value::Value;

    fn apply(name: &str, input: impl Into<Value>, args: Vec<Command>) -> Value {
        let mut ctx = ExecutionContext::new(Registry::with_builtins());
        let program = Command::modifier(name, Command::literal(input), args);
        execute(&program, &mut ctx).unwrap()
    }

    fn lit(v: impl Into<Value>) -> Command {
        Command::literal(v)
    }

    fn obj(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_length_and_keys() {
        assert_eq!(apply("length", "héllo", vec![]), Value::from(5i64));
        assert_eq!(apply("length", obj(json!([1, 2])), vec![]), Value::from(2i64));
        assert_eq!(apply("length", Value::Null, vec![]), Value::from(0i64));
        let unordered = Value::from_json_str(r#"{"b": 1, "a": 2}"#).unwrap();
        assert_eq!(apply("keys", unordered, vec![]), obj(json!(["b", "a"])));
        assert_eq!(
            apply("kv", obj(json!({"a": 1})), vec![]),
            obj(json!([{"key": "a", "value": 1}]))
        );
        assert_eq!(apply("keys", "text", vec![]), Value::Null);
    }

    #[test]
    fn test_property_edits() {
        let input = obj(json!({"Id": 1, "name": "x", "tmp": true}));
        assert_eq!(apply("getProperty", input.clone(), vec![lit("id")]), Value::from(1i64));
        assert_eq!(apply("delete", input.clone(), vec![lit("tmp")]), obj(json!({"Id": 1, "name": "x"})));
        assert_eq!(
            apply("setProperty", input.clone(), vec![lit("tmp"), lit(false)]),
            obj(json!({"Id": 1, "name": "x", "tmp": false}))
        );
        assert_eq!(apply("pick", input.clone(), vec![lit("name"), lit("Id")]), obj(json!({"Id": 1, "name": "x"})));
        assert_eq!(apply("omit", input.clone(), vec![lit(json!(["tmp", "Id"]))]), obj(json!({"name": "x"})));
        assert_eq!(
            apply("rename", input.clone(), vec![lit("Id"), lit("id")]),
            obj(json!({"id": 1, "name": "x", "tmp": true}))
        );
        assert_eq!(apply("has", input.clone(), vec![lit("name")]), Value::Bool(true));
        assert_eq!(apply("has", input, vec![lit("nope")]), Value::Bool(false));
    }

    #[test]
    fn test_default() {
        assert_eq!(apply("default", "", vec![lit("N/A")]), Value::from("N/A"));
        assert_eq!(apply("default", obj(json!([])), vec![lit("N/A")]), Value::from("N/A"));
        assert_eq!(apply("default", Value::Null, vec![lit(0i64)]), Value::from(0i64));
        assert_eq!(apply("default", "set", vec![lit("N/A")]), Value::from("set"));
        assert_eq!(apply("default", 0i64, vec![lit("N/A")]), Value::from(0i64));
    }

    #[test]
    fn test_typeof() {
        assert_eq!(apply("typeof", 1i64, vec![]), Value::from("integer"));
        assert_eq!(apply("typeof", 1.5, vec![]), Value::from("number"));
        assert_eq!(apply("typeof", "s", vec![]), Value::from("string"));
        assert_eq!(apply("typeof", obj(json!({})), vec![]), Value::from("object"));
        assert_eq!(apply("typeof", obj(json!({})).with_type("Invoice"), vec![]), Value::from("Invoice"));
        assert_eq!(apply("typeof", Value::Null, vec![]), Value::from("null"));
    }

    #[test]
    fn test_sort() {
        assert_eq!(apply("sort", obj(json!([3, 1, 2])), vec![]), obj(json!([1, 2, 3])));
        assert_eq!(
            apply("sort", obj(json!(["b", "C", "a"])), vec![lit(json!({"caseSensitive": false, "order": "desc"}))]),
            obj(json!(["C", "b", "a"]))
        );
        assert_eq!(
            apply("sort", obj(json!([{"n": 2}, {"n": 10}, {"n": 1}])), vec![lit(json!({"by": "n"}))]),
            obj(json!([{"n": 1}, {"n": 2}, {"n": 10}]))
        );
        let sorted_keys = apply("sort", Value::from_json_str(r#"{"b": 1, "a": 2}"#).unwrap(), vec![]);
        assert_eq!(sorted_keys.as_object().unwrap().keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(apply("sort", "cab", vec![]), Value::from("abc"));
    }
}
