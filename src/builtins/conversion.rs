// Conversion modifiers: to.<target> and join.<encoding>

use std::fmt::Write;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::context::{FunctionCall, Registry};
use crate::datetime;
use crate::utils;
use crate::value::{ObjectMap, Value};

use super::{elements, int, text};

pub(super) fn register(registry: &mut Registry) {
    registry.register_extension("modifier.to.*", convert_to);
    registry.register_extension("modifier.join.*", join);
}

fn number_text(text: &str) -> Option<Decimal> {
    utils::try_decimal(Some(&Value::from(text.trim())))
}

/// `to.<target>`; the target is matched case-insensitively.
fn convert_to(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let target = text(call, 1).unwrap_or_default().to_lowercase();
    let first = call.parameter(0).filter(|v| !v.is_absent());
    let value = match target.as_str() {
        "boolean" => Value::Bool(utils::try_string(first).is_some_and(|s| s.eq_ignore_ascii_case("true"))),
        "number" => match first {
            Some(Value::Date(d)) => Value::from(datetime::epoch_second(d)),
            Some(value) => {
                let text = utils::try_string(Some(value)).unwrap_or_default();
                let Some(n) = number_text(&text) else {
                    anyhow::bail!("'{}' is not a number", text);
                };
                n.trunc().to_i64().map_or(Value::from(n.trunc()), Value::from)
            }
            None => Value::Null,
        },
        "epochmillis" => match first {
            Some(Value::Date(d)) => Value::from(d.timestamp_millis()),
            _ => Value::from(0i64),
        },
        "decimal" => match utils::try_string(first) {
            Some(text) => match number_text(&text) {
                Some(n) => Value::from(n),
                None => anyhow::bail!("'{}' is not a decimal", text),
            },
            None => Value::Null,
        },
        "hex" => {
            let text = utils::try_string(first).unwrap_or_default();
            let mut out = String::with_capacity(text.len() * 2);
            for byte in text.bytes() {
                let _ = write!(out, "{:02x}", byte);
            }
            Value::from(out)
        }
        "string" => match first {
            Some(Value::Date(d)) => Value::from(format_date(d, text(call, 2).as_deref())?),
            other => utils::try_string(other).map(|s| s.into_owned()).into(),
        },
        "array" => match call.parameter(0) {
            Some(list @ (Value::Array(_) | Value::Iterable(_))) => {
                Value::array(list.iter_elements().map(Iterator::collect).unwrap_or_default())
            }
            other => Value::array(vec![other.cloned().unwrap_or(Value::Null)]),
        },
        "object" => {
            let mut out = ObjectMap::new();
            for entry in elements(call, 0).unwrap_or_default() {
                let key = entry.get("key").and_then(Value::as_str).filter(|k| !k.trim().is_empty());
                if let Some(key) = key {
                    out.insert(key.to_string(), entry.get("value").cloned().unwrap_or(Value::Null));
                }
            }
            Value::object_map(out)
        }
        "json" => {
            let value = call.parameter(0).cloned().unwrap_or(Value::Null);
            let json = if int(call, 2).is_some_and(|indent| indent > 0) {
                value.to_json_string_pretty()?
            } else {
                value.to_json_string()?
            };
            Value::from(json)
        }
        "csv" => Value::from(to_csv(call.parameter(0), text(call, 2).as_deref().unwrap_or(","))),
        _ => anyhow::bail!("Unsupported conversion target:to.{}", target),
    };
    Ok(value)
}

/// Date text: ISO by default, otherwise a `%`-style pattern or a `yyyy-MM-dd`-style one.
fn format_date(date: &DateTime<Utc>, pattern: Option<&str>) -> anyhow::Result<String> {
    let Some(pattern) = pattern else {
        return Ok(datetime::format_iso8601(date));
    };
    let pattern = if pattern.contains('%') {
        pattern.to_string()
    } else {
        strftime_pattern(pattern)
    };
    let mut out = String::new();
    write!(out, "{}", date.format(&pattern))
        .map_err(|_| anyhow::anyhow!("Invalid date format '{}'", pattern))?;
    Ok(out)
}

/// Rewrites the common letters of `yyyy-MM-dd'T'HH:mm:ss.SSS` patterns into strftime.
fn strftime_pattern(pattern: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("yyyy", "%Y"),
        ("yy", "%y"),
        ("MMMM", "%B"),
        ("MMM", "%b"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("hh", "%I"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("SSS", "%3f"),
        ("EEEE", "%A"),
        ("EEE", "%a"),
        ("a", "%p"),
    ];
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;
    'outer: while let Some(c) = rest.chars().next() {
        if c == '\'' {
            // quoted literal
            let body = &rest[1..];
            let end = body.find('\'').unwrap_or(body.len());
            out.push_str(&body[..end].replace('%', "%%"));
            rest = body.get(end + 1..).unwrap_or("");
            continue;
        }
        for (token, replacement) in TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = after;
                continue 'outer;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn to_csv(input: Option<&Value>, delimiter: &str) -> String {
    let Some(rows) = input.and_then(Value::iter_elements).map(Iterator::collect::<Vec<Value>>) else {
        return "Input must be an array for CSV conversion".to_string();
    };
    let Some(first) = rows.first() else {
        return String::new();
    };
    let Some(headers) = first.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()) else {
        return "Array must contain objects for CSV conversion".to_string();
    };
    let escape = |value: &str| {
        if value.contains(delimiter) || value.contains('"') || value.contains('\n') {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    };

    let mut csv = headers.iter().map(|h| escape(h)).collect::<Vec<_>>().join(delimiter);
    csv.push('\n');
    for row in rows.iter().filter(|r| r.is_object()) {
        let line = headers
            .iter()
            .map(|h| {
                let cell = match row.get(h) {
                    Some(Value::Array(_) | Value::Object(_)) | None => String::new(),
                    other => utils::try_string(other).map(|s| s.into_owned()).unwrap_or_default(),
                };
                escape(&cell)
            })
            .collect::<Vec<_>>()
            .join(delimiter);
        csv.push_str(&line);
        csv.push('\n');
    }
    csv
}

// ── join.* ───────────────────────────────────────────────────────────────────

/// `join.<string|path|query>(itemDelimiter, fieldDelimiter)`: objects become
/// `k=v` pairs, arrays their items, each piece encoded for the target.
fn join(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let encoding = text(call, 1).map(|e| e.to_lowercase());
    let items = text(call, 2).map(|s| s.into_owned()).unwrap_or_else(|| ",".to_string());
    let fields = text(call, 3).map(|s| s.into_owned()).unwrap_or_else(|| "=".to_string());
    let encode = |value: Option<&Value>| {
        let text = utils::try_string(value).unwrap_or_default();
        match encoding.as_deref() {
            Some("path") => percent_encode(&text, is_path_safe, false),
            Some("query") => percent_encode(&text, is_query_safe, true),
            _ => text.into_owned(),
        }
    };

    let joined = match call.parameter(0) {
        None | Some(Value::Null | Value::Missing) => String::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| format!("{}{}{}", encode(Some(&Value::from(k.as_str()))), fields, encode(Some(v))))
            .collect::<Vec<_>>()
            .join(&items),
        Some(list @ (Value::Array(_) | Value::Iterable(_))) => list
            .iter_elements()
            .map(|it| it.map(|v| encode(Some(&v))).collect::<Vec<_>>().join(&items))
            .unwrap_or_default(),
        Some(other) => anyhow::bail!(
            "Unsupported conversion for={} target=join.{}",
            kind_name(other),
            encoding.as_deref().unwrap_or("")
        ),
    };
    Ok(Value::from(joined))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) | Value::Decimal(_) => "number",
        Value::String(_) => "string",
        Value::Date(_) => "date",
        _ => "value",
    }
}

fn is_query_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'*' | b'_')
}

fn is_path_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.' | b'_' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b','
                | b';' | b'=' | b':' | b'@' | b'/' | b'?'
        )
}

fn percent_encode(text: &str, safe: fn(u8) -> bool, space_as_plus: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        if safe(b) {
            out.push(b as char);
        } else if b == b' ' && space_as_plus {
            out.push('+');
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ast::Command;
    use crate::context::{ExecutionContext, Registry};
    use crate::datetime::parse_iso8601;
    use crate::execute;
    use crate::value::Value;

    fn try_apply(name: &str, input: impl Into<Value>, args: Vec<Command>) -> Result<Value, String> {
        let mut ctx = ExecutionContext::new(Registry::with_builtins());
        let program = Command::modifier(name, Command::literal(input), args);
        execute(&program, &mut ctx).map_err(|e| e.to_string())
    }

    fn apply(name: &str, input: impl Into<Value>, args: Vec<Command>) -> Value {
        try_apply(name, input, args).unwrap()
    }

    fn lit(v: impl Into<Value>) -> Command {
        Command::literal(v)
    }

    #[test]
    fn test_scalar_targets() {
        assert_eq!(apply("to.boolean", "TRUE", vec![]), Value::Bool(true));
        assert_eq!(apply("to.boolean", "yes", vec![]), Value::Bool(false));
        assert_eq!(apply("to.number", "42.9", vec![]), Value::from(42i64));
        assert_eq!(apply("to.number", Value::Null, vec![]), Value::Null);
        assert_eq!(apply("to.decimal", " 1.25 ", vec![]), Value::from(1.25));
        assert_eq!(apply("to.string", 12i64, vec![]), Value::from("12"));
        assert_eq!(apply("to.hex", "Hi!", vec![]), Value::from("486921"));
        assert!(try_apply("to.number", "abc", vec![]).unwrap_err().contains("'abc' is not a number"));
    }

    #[test]
    fn test_date_targets() {
        let date = parse_iso8601("2024-03-01T10:15:30.250Z").unwrap();
        assert_eq!(apply("to.number", date, vec![]), Value::from(1709288130i64));
        assert_eq!(apply("to.epochmillis", date, vec![]), Value::from(1709288130250i64));
        assert_eq!(apply("to.string", date, vec![]), Value::from("2024-03-01T10:15:30.250Z"));
        assert_eq!(apply("to.string", date, vec![lit("yyyy/MM/dd HH:mm")]), Value::from("2024/03/01 10:15"));
        assert_eq!(apply("to.string", date, vec![lit("%d.%m.%Y")]), Value::from("01.03.2024"));
        assert_eq!(
            apply("to.string", date, vec![lit("yyyy-MM-dd'T'HH")]),
            Value::from("2024-03-01T10")
        );
    }

    #[test]
    fn test_container_targets() {
        assert_eq!(apply("to.array", "x", vec![]), Value::from(json!(["x"])));
        assert_eq!(apply("to.array", json!([1]), vec![]), Value::from(json!([1])));
        assert_eq!(
            apply("to.object", json!([{"key": "a", "value": 1}, {"key": " ", "value": 2}, {"value": 3}]), vec![]),
            Value::from(json!({"a": 1}))
        );
        assert_eq!(apply("to.json", json!({"a": [1, "b"]}), vec![]), Value::from(r#"{"a":[1,"b"]}"#));
        assert!(apply("to.json", json!({"a": 1}), vec![lit(2i64)]).as_str().unwrap().contains('\n'));
    }

    #[test]
    fn test_csv() {
        let rows = json!([{"name": "a,b", "n": 1}, {"name": "say \"hi\"", "n": null}]);
        assert_eq!(
            apply("to.csv", rows, vec![]),
            Value::from("name,n\n\"a,b\",1\n\"say \"\"hi\"\"\",\n")
        );
        assert_eq!(apply("to.csv", json!([]), vec![]), Value::from(""));
        assert_eq!(
            apply("to.csv", "x", vec![]),
            Value::from("Input must be an array for CSV conversion")
        );
    }

    #[test]
    fn test_unknown_target_fails() {
        let err = try_apply("to.yaml", "x", vec![]).unwrap_err();
        assert!(err.contains("Unsupported conversion target:to.yaml"), "{err}");
    }

    #[test]
    fn test_join_encodings() {
        let query = Value::from_json_str(r#"{"q": "a b&c", "page": 2}"#).unwrap();
        assert_eq!(apply("join.query", query.clone(), vec![lit("&")]), Value::from("q=a+b%26c&page=2"));
        assert_eq!(apply("join.string", query, vec![lit("&")]), Value::from("q=a b&c&page=2"));
        assert_eq!(apply("join.path", json!(["a b", "c/d"]), vec![lit("/")]), Value::from("a%20b/c/d"));
        assert_eq!(apply("join.string", json!(["x", 1]), vec![]), Value::from("x,1"));
        assert_eq!(apply("join.string", json!({"k": "v"}), vec![lit(";"), lit(":")]), Value::from("k:v"));
        assert_eq!(apply("join.string", Value::Null, vec![]), Value::from(""));
        assert!(try_apply("join.string", 5i64, vec![]).is_err());
    }
}
