// CommandResult: the envelope every command hands back to its parent
// Builders read the flags to decide between assign, splice and omit

use crate::value::Value;

/// Outcome of executing one command.
///
/// - `property_name` set: the enclosing object builder stores `value` under that key.
/// - `append == Some(true)`: the members of `value` are spliced into the enclosing
///   collection instead of the value being placed as one entry.
/// - `valid_result == Some(false)`: the producer asks to be skipped entirely.
///   `None` means valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    pub value: Option<Value>,
    pub property_name: Option<String>,
    pub append: Option<bool>,
    pub valid_result: Option<bool>,
}

impl CommandResult {
    /// A plain value. Null and Missing are stored as absence.
    pub fn value(value: impl Into<Value>) -> Self {
        CommandResult {
            value: normalize(value.into()),
            ..Default::default()
        }
    }

    pub fn from_option(value: Option<Value>) -> Self {
        CommandResult {
            value: value.and_then(normalize),
            ..Default::default()
        }
    }

    /// No value, but still a valid result.
    pub fn none() -> Self {
        Self::default()
    }

    /// Ask the enclosing builder or loop to omit this entry.
    pub fn skip() -> Self {
        CommandResult {
            append: Some(false),
            valid_result: Some(false),
            ..Default::default()
        }
    }

    /// A value marked for splicing into the enclosing collection.
    pub fn appended(value: Value) -> Self {
        CommandResult {
            value: normalize(value),
            append: Some(true),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.property_name = Some(name.into());
        self
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.valid_result == Some(false)
    }

    #[inline]
    pub fn is_appended(&self) -> bool {
        self.append == Some(true)
    }

    /// The value, with absence surfaced as `Value::Null`.
    pub fn into_value(self) -> Value {
        self.value.unwrap_or(Value::Null)
    }

    pub fn value_ref(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

fn normalize(value: Value) -> Option<Value> {
    if value.is_absent() {
        None
    } else {
        Some(value)
    }
}
