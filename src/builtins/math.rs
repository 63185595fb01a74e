// Math modifiers and the Math.* functions
// Exact decimal math where the result is exact; logarithms and roots use f64

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::context::{FunctionCall, Registry};
use crate::utils;
use crate::value::Value;

use super::{decimal, elements, int, text};

type MathFn = fn(&FunctionCall<'_>) -> anyhow::Result<Value>;

const FUNCTIONS: &[(&str, MathFn)] = &[
    ("min", min),
    ("max", max),
    ("mean", mean),
    ("mod", modulo),
    ("sqrt", sqrt),
    ("clamp", clamp),
    ("sum", sum),
    ("log", log),
    ("log10", log10),
    ("ln", ln),
    ("pow", pow),
];

pub(super) fn register(registry: &mut Registry) {
    registry.register_extension("modifier.negate", |call| {
        Ok(decimal(call, 0).map(|d| -d).into())
    });
    registry.register_extension("modifier.absolute", |call| {
        Ok(decimal(call, 0).map(|d| d.abs()).into())
    });
    registry.register_extension("modifier.precision", precision);
    registry.register_extension("modifier.round.*", round);

    for (name, function) in FUNCTIONS {
        let function = *function;
        registry.register_extension(&format!("Math.{}", name), move |call| function(call));
    }
    // `$list | Math.sum`: the piped value first, then the arguments after the name
    registry.register_extension("modifier.Math.*", |call| {
        let name = text(call, 1).unwrap_or_default().to_lowercase();
        let Some((_, function)) = FUNCTIONS.iter().find(|(n, _)| *n == name) else {
            return Ok(Value::Null);
        };
        if call.parameters.len() > 1 {
            call.parameters.remove(1);
        }
        function(call)
    });
}

fn scale(call: &FunctionCall<'_>, index: usize) -> u32 {
    int(call, index).unwrap_or(2).clamp(0, 28) as u32
}

/// `precision(digits)`: banker's rounding to `digits` places (default 2).
fn precision(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let value = decimal(call, 0).unwrap_or(Decimal::ZERO);
    Ok(Value::from(
        value.round_dp_with_strategy(scale(call, 1), RoundingStrategy::MidpointNearestEven),
    ))
}

/// `round.up|down|ceiling|floor(digits)`; anything else rounds down.
fn round(call: &mut FunctionCall<'_>) -> anyhow::Result<Value> {
    let value = decimal(call, 0).unwrap_or(Decimal::ZERO);
    let strategy = match text(call, 1).as_deref() {
        Some("up") => RoundingStrategy::AwayFromZero,
        Some("ceiling") => RoundingStrategy::ToPositiveInfinity,
        Some("floor") => RoundingStrategy::ToNegativeInfinity,
        _ => RoundingStrategy::ToZero,
    };
    Ok(Value::from(value.round_dp_with_strategy(scale(call, 2), strategy)))
}

/// The numbers of an array first argument, otherwise of every argument.
fn numbers(call: &FunctionCall<'_>) -> Vec<Decimal> {
    let parse = |v: &Value| Some(v).filter(|v| !v.is_absent()).and_then(|v| utils::try_decimal(Some(v)));
    match elements(call, 0) {
        Some(items) => items.iter().filter_map(parse).collect(),
        None => call.parameters.iter().filter_map(parse).collect(),
    }
}

fn min(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(numbers(call).into_iter().min().into())
}

fn max(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    Ok(numbers(call).into_iter().max().into())
}

/// Average truncated to two places.
fn mean(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let values = numbers(call);
    if values.is_empty() {
        return Ok(Value::Null);
    }
    let total = checked_sum(Decimal::ZERO, &values)?;
    let mean = total
        .checked_div(Decimal::from(values.len()))
        .ok_or_else(|| anyhow::anyhow!("Math.mean overflowed"))?;
    Ok(Value::from(mean.round_dp_with_strategy(2, RoundingStrategy::ToZero)))
}

/// Integer modulo taking the sign of the divisor.
fn modulo(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let a = int(call, 0).unwrap_or(0);
    let b = int(call, 1).unwrap_or(0);
    if b == 0 {
        anyhow::bail!("Math.mod by zero");
    }
    let r = a.checked_rem(b).unwrap_or(0);
    let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
    Ok(Value::from(r))
}

fn sqrt(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let value = float(call, 0).unwrap_or(0.0);
    if value <= 0.0 {
        return Ok(Value::from(0i64));
    }
    Ok(Value::from(value.sqrt()))
}

/// `clamp(value, low, high)`; a missing bound leaves the value alone.
fn clamp(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let Some(value) = decimal(call, 0) else {
        return Ok(Value::Null);
    };
    let (Some(low), Some(high)) = (decimal(call, 1), decimal(call, 2)) else {
        return Ok(Value::from(value));
    };
    Ok(Value::from(if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }))
}

/// `sum()` over an array, with an optional starting value, or over the arguments.
fn sum(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    if let Some(items) = elements(call, 0) {
        let values: Vec<Decimal> = items
            .iter()
            .filter(|v| !v.is_absent())
            .filter_map(|v| utils::try_decimal(Some(v)))
            .collect();
        let initial = decimal(call, 1).unwrap_or(Decimal::ZERO);
        return Ok(Value::from(checked_sum(initial, &values)?));
    }
    Ok(Value::from(checked_sum(Decimal::ZERO, &numbers(call))?))
}

fn checked_sum(initial: Decimal, values: &[Decimal]) -> anyhow::Result<Decimal> {
    values
        .iter()
        .try_fold(initial, |acc, v| acc.checked_add(*v))
        .ok_or_else(|| anyhow::anyhow!("Math.sum overflowed"))
}

fn float(call: &FunctionCall<'_>, index: usize) -> Option<f64> {
    decimal(call, index).and_then(|d| d.to_f64())
}

fn ln(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let value = float(call, 0).unwrap_or(0.0);
    Ok(Value::from(if value <= 0.0 { f64::NAN } else { value.ln() }))
}

fn log10(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let value = float(call, 0).unwrap_or(0.0);
    Ok(Value::from(if value <= 0.0 { f64::NAN } else { value.log10() }))
}

/// `log(value, base)`; natural log when the base is missing or unusable.
fn log(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let value = float(call, 0).unwrap_or(0.0);
    if value <= 0.0 {
        return Ok(Value::from(f64::NAN));
    }
    Ok(Value::from(match float(call, 1) {
        Some(base) if base > 0.0 && base != 1.0 => value.log(base),
        _ => value.ln(),
    }))
}

fn pow(call: &FunctionCall<'_>) -> anyhow::Result<Value> {
    let base = float(call, 0).unwrap_or(0.0);
    let exponent = float(call, 1).unwrap_or(1.0);
    Ok(Value::from(base.powf(exponent)))
}
