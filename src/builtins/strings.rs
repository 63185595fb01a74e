// String modifiers: trimming, slicing, case, padding, replacement
// Every modifier reads its input as text, so numbers and dates work too

use crate::context::{FunctionCall, Registry};
use crate::value::Value;

use super::{int, text};

pub(super) fn register(registry: &mut Registry) {
    registry.register_extension("modifier.trim", |call| Ok(trim(call, Side::Both)));
    registry.register_extension("modifier.trimStart", |call| Ok(trim(call, Side::Start)));
    registry.register_extension("modifier.trimEnd", |call| Ok(trim(call, Side::End)));
    registry.register_extension("modifier.left", left);
    registry.register_extension("modifier.cap", left);
    registry.register_extension("modifier.right", right);
    registry.register_extension("modifier.substring", substring);
    registry.register_extension("modifier.substringUpto", substring_upto);
    registry.register_extension("modifier.substringAfter", substring_after);
    registry.register_extension("modifier.lowerCase", |call| {
        Ok(text(call, 0).map(|s| s.to_lowercase()).into())
    });
    registry.register_extension("modifier.upperCase", |call| {
        Ok(text(call, 0).map(|s| s.to_uppercase()).into())
    });
    registry.register_extension("modifier.replace", replace);
    registry.register_extension("modifier.remove", remove);
    registry.register_extension("modifier.concat", concat);
    registry.register_extension("modifier.append", append);
    registry.register_extension("modifier.split", split);
    registry.register_extension("modifier.padStart", |call| Ok(pad(call, Side::Start)));
    registry.register_extension("modifier.padEnd", |call| Ok(pad(call, Side::End)));
    registry.register_extension("modifier.capitalize", capitalize);
    registry.register_extension("modifier.titleCase", title_case);
    registry.register_extension("modifier.camelCase", camel_case);
    registry.register_extension("modifier.snakeCase", snake_case);
    registry.register_extension("modifier.truncate", truncate);
    registry.register_extension("modifier.html.*", html);
}

#[derive(Clone, Copy)]
enum Side {
    Start,
    End,
    Both,
}

/// Whitespace by default; with a second argument, any of its characters.
fn trim(call: &FunctionCall<'_>, side: Side) -> Value {
    let Some(s) = text(call, 0) else {
        return Value::Null;
    };
    if call.parameters.len() < 2 {
        let out = match side {
            Side::Start => s.trim_start(),
            Side::End => s.trim_end(),
            Side::Both => s.trim(),
        };
        return Value::from(out);
    }
    let set: Vec<char> = text(call, 1).map(|t| t.chars().collect()).unwrap_or_default();
    let strip = |c: char| set.contains(&c);
    let out = match side {
        Side::Start => s.trim_start_matches(strip),
        Side::End => s.trim_end_matches(strip),
        Side::Both => s.trim_matches(strip),
    };
    Value::from(out)
}

fn count(call: &FunctionCall<'_>, index: usize) -> usize {
    int(call, index).unwrap_or(0).max(0) as usize
}

fn left(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    Ok(Value::from(s.chars().take(count(call, 1)).collect::<String>()))
}

fn right(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let chars: Vec<char> = s.chars().collect();
    let n = count(call, 1).min(chars.len());
    Ok(Value::from(chars[chars.len() - n..].iter().collect::<String>()))
}

/// `substring(from, to)`: both ends clamp into the text; a missing end is `from`.
fn substring(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let chars: Vec<char> = s.chars().collect();
    let from = count(call, 1).min(chars.len());
    let to = count(call, 2).max(from).min(chars.len());
    Ok(Value::from(chars[from..to].iter().collect::<String>()))
}

fn substring_upto(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let delimiter = text(call, 1).unwrap_or_default();
    Ok(match s.find(&*delimiter) {
        Some(at) => Value::from(&s[..at]),
        None => Value::from(&*s),
    })
}

fn substring_after(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let delimiter = text(call, 1).unwrap_or_default();
    Ok(match s.find(&*delimiter) {
        Some(at) => Value::from(&s[at + delimiter.len()..]),
        None => Value::from(&*s),
    })
}

fn replace(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let what = text(call, 1).unwrap_or_default();
    let with = text(call, 2).unwrap_or_default();
    Ok(Value::from(s.replace(&*what, &with)))
}

fn remove(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let part = text(call, 1).unwrap_or_default();
    Ok(Value::from(s.replace(&*part, "")))
}

/// `concat(other, delimiter)`
fn concat(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let s = text(call, 0).unwrap_or_default();
    let other = text(call, 1).unwrap_or_default();
    let delimiter = text(call, 2).unwrap_or_default();
    Ok(Value::from(format!("{}{}{}", s, delimiter, other)))
}

/// Appends every further argument, skipping absent ones.
fn append(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let mut out = text(call, 0).unwrap_or_default().into_owned();
    for index in 1..call.parameters.len() {
        if let Some(part) = text(call, index) {
            out.push_str(&part);
        }
    }
    Ok(Value::from(out))
}

fn split(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let s = text(call, 0).unwrap_or_default();
    let delimiter = text(call, 1);
    let delimiter = delimiter.as_deref().unwrap_or(",");
    Ok(Value::array(s.split(delimiter).map(Value::from).collect()))
}

/// `padStart(length, char)` / `padEnd(length, char)`; the pad defaults to a space.
fn pad(call: &FunctionCall<'_>, side: Side) -> Value {
    let s = text(call, 0).unwrap_or_default().into_owned();
    let Some(length) = int(call, 1) else {
        return Value::from(s);
    };
    let fill = text(call, 2).and_then(|t| t.chars().next()).unwrap_or(' ');
    let missing = (length.max(0) as usize).saturating_sub(s.chars().count());
    let padding: String = std::iter::repeat(fill).take(missing).collect();
    match side {
        Side::End => Value::from(s + &padding),
        _ => Value::from(padding + &s),
    }
}

fn upper_first(word: &str, rest_lower: bool) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            let rest: String = chars.collect();
            let rest = if rest_lower { rest.to_lowercase() } else { rest };
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

fn capitalize(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(text(call, 0).map(|s| upper_first(&s, false)).into())
}

fn title_case(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(text(call, 0)
        .map(|s| {
            s.split(' ')
                .map(|word| upper_first(word, true))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .into())
}

/// Words split on whitespace, `_` and `-`; the first word is lower-cased.
fn camel_case(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(text(call, 0)
        .map(|s| {
            s.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
                .enumerate()
                .map(|(i, word)| match i {
                    0 => word.to_lowercase(),
                    _ => upper_first(word, true),
                })
                .collect::<String>()
        })
        .into())
}

/// `camelCase` humps and runs of spaces or hyphens become single underscores.
fn snake_case(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(s) = text(call, 0) else {
        return Ok(Value::Null);
    };
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev: Option<char> = None;
    for c in s.chars() {
        if c.is_whitespace() || c == '-' {
            if !matches!(prev, Some(p) if p.is_whitespace() || p == '-') {
                out.push('_');
            }
        } else {
            if c.is_ascii_uppercase() && prev.is_some_and(|p| p.is_ascii_lowercase()) {
                out.push('_');
            }
            out.push(c);
        }
        prev = Some(c);
    }
    Ok(Value::from(out.to_lowercase()))
}

/// `truncate(max, suffix)`: the suffix (default `...`) counts toward `max`.
fn truncate(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let s = text(call, 0).unwrap_or_default().into_owned();
    let Some(max) = int(call, 1) else {
        return Ok(Value::from(s));
    };
    let max = max.max(0) as usize;
    let suffix = text(call, 2).map(|t| t.into_owned()).unwrap_or_else(|| "...".to_string());
    if s.chars().count() <= max {
        return Ok(Value::from(s));
    }
    let keep = max.saturating_sub(suffix.chars().count());
    if keep == 0 {
        return Ok(Value::from(suffix.chars().take(max).collect::<String>()));
    }
    Ok(Value::from(s.chars().take(keep).collect::<String>() + &suffix))
}

/// `html.escape` / `html.unescape`
fn html(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let s = text(call, 0).unwrap_or_default();
    let method = text(call, 1).unwrap_or_default().to_lowercase();
    let out = match method.as_str() {
        "escape" => s
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;"),
        // `&amp;` last so `&amp;lt;` stays `&lt;`
        "unescape" => s
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&#x27;", "'")
            .replace("&#x2F;", "/")
            .replace("&#47;", "/")
            .replace("&amp;", "&"),
        _ => format!("Unknown method: html.{}", method),
    };
    Ok(Value::from(out))
}
