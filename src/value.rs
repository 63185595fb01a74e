// Value: Arc-wrapped JSON value for O(1) cloning across worker threads
// Carries the missing marker, instants, typed objects and host iterables

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::datetime;
use crate::utils;

/// A JSON-like value with O(1) clone semantics via Arc-wrapping.
///
/// Standard JSON types (Array, Object, String) are wrapped in Arc so values can be
/// shared between the caller and parallel loop iterations without copying.
/// `Missing` is the "no value" marker: it reads as absence everywhere and serializes
/// as `null`.
#[derive(Clone, Debug)]
pub enum Value {
    // Standard JSON types
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<ObjectMap>),

    // Engine types
    /// An arithmetic result whose digits do not survive a trip through `f64`.
    Decimal(Decimal),
    Missing,
    Date(DateTime<Utc>),
    Iterable(HostIterable),
}

// ── Typed objects ────────────────────────────────────────────────────────────

/// Insertion-ordered object members plus an optional declared type name.
///
/// The type name is a best-effort tag for downstream consumers. It is never
/// validated against the members and does not take part in equality.
#[derive(Clone, Debug, Default)]
pub struct ObjectMap {
    entries: IndexMap<String, Value>,
    type_name: Option<Arc<str>>,
}

impl ObjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ObjectMap {
            entries: IndexMap::with_capacity(capacity),
            type_name: None,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn set_type_name(&mut self, name: impl Into<Arc<str>>) {
        self.type_name = Some(name.into());
    }

    pub fn into_entries(self) -> IndexMap<String, Value> {
        self.entries
    }
}

impl Deref for ObjectMap {
    type Target = IndexMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl DerefMut for ObjectMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}

impl PartialEq for ObjectMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl From<IndexMap<String, Value>> for ObjectMap {
    fn from(entries: IndexMap<String, Value>) -> Self {
        ObjectMap {
            entries,
            type_name: None,
        }
    }
}

impl FromIterator<(String, Value)> for ObjectMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        ObjectMap::from(iter.into_iter().collect::<IndexMap<_, _>>())
    }
}

// ── Host iterables ───────────────────────────────────────────────────────────

/// A lazily produced sequence supplied by the host (paged API results, streams).
///
/// Loops accept these transparently alongside arrays.
pub trait LazyIterable: Send + Sync + fmt::Debug {
    fn iterate(&self) -> Box<dyn Iterator<Item = Value> + '_>;
}

#[derive(Clone, Debug)]
pub struct HostIterable(Arc<dyn LazyIterable>);

impl HostIterable {
    pub fn new(inner: impl LazyIterable + 'static) -> Self {
        HostIterable(Arc::new(inner))
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Value> + '_> {
        self.0.iterate()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().collect()
    }
}

impl PartialEq for HostIterable {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Null and Missing both read as "no value".
    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Null | Value::Missing)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_) | Value::Decimal(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    #[inline]
    pub fn is_date(&self) -> bool {
        matches!(self, Value::Date(_))
    }

    #[inline]
    pub fn is_iterable(&self) -> bool {
        matches!(self, Value::Iterable(_))
    }

    /// Anything that is not a container.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_) | Value::Iterable(_))
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => {
                let f = *n;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            }
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner Vec, cloning if shared (Arc::make_mut).
    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(arr) => Some(Arc::make_mut(arr)),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner map, cloning if shared (Arc::make_mut).
    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut ObjectMap> {
        match self {
            Value::Object(map) => Some(Arc::make_mut(map)),
            _ => None,
        }
    }

    /// Index into an object by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Index into an array by position.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(arr) => arr.get(index),
            _ => None,
        }
    }

    /// The declared type name of a typed object.
    pub fn type_name(&self) -> Option<&str> {
        self.as_object().and_then(ObjectMap::type_name)
    }

    /// Elements of an array or a host iterable; `None` for everything else.
    pub fn iter_elements(&self) -> Option<Box<dyn Iterator<Item = Value> + '_>> {
        match self {
            Value::Array(arr) => Some(Box::new(arr.iter().cloned())),
            Value::Iterable(it) => Some(it.iter()),
            _ => None,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    #[inline]
    pub fn array(v: Vec<Value>) -> Self {
        Value::Array(Arc::new(v))
    }

    #[inline]
    pub fn object(m: IndexMap<String, Value>) -> Self {
        Value::Object(Arc::new(ObjectMap::from(m)))
    }

    #[inline]
    pub fn object_map(m: ObjectMap) -> Self {
        Value::Object(Arc::new(m))
    }

    #[inline]
    pub fn empty_object() -> Self {
        Value::Object(Arc::new(ObjectMap::new()))
    }

    /// An empty object already carrying a type name (None leaves it untyped).
    pub fn typed_object(type_name: Option<&str>) -> Self {
        let mut map = ObjectMap::new();
        if let Some(name) = type_name {
            map.set_type_name(name);
        }
        Value::Object(Arc::new(map))
    }

    #[inline]
    pub fn iterable(inner: impl LazyIterable + 'static) -> Self {
        Value::Iterable(HostIterable::new(inner))
    }
}

// ── Structural operations ────────────────────────────────────────────────────

impl Value {
    /// Tag an object with a declared type. Idempotent; non-objects pass through.
    pub fn with_type(mut self, type_name: &str) -> Self {
        if let Some(map) = self.as_object_mut() {
            map.set_type_name(type_name);
        }
        self
    }

    /// Rebuild every container with fresh allocations.
    ///
    /// Clones share their Arc payload; a deep copy shares nothing, so later
    /// copy-on-write edits of either side can never be observed by the other.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(arr) => Value::array(arr.iter().map(Value::deep_copy).collect()),
            Value::Object(map) => {
                let mut copy = ObjectMap::with_capacity(map.len());
                for (k, v) in map.iter() {
                    copy.insert(k.clone(), v.deep_copy());
                }
                copy.type_name = map.type_name.clone();
                Value::object_map(copy)
            }
            Value::String(s) => Value::String(Arc::from(&**s)),
            other => other.clone(),
        }
    }

    /// Structural merge of `other` into `self`.
    ///
    /// Objects merge key by key (object/object recurses, array/array concatenates,
    /// anything else takes the incoming value), arrays concatenate, and every other
    /// combination returns `other`.
    pub fn merge(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Object(original), Value::Object(incoming)) => {
                let mut result = (**original).clone();
                for (key, value) in incoming.iter() {
                    let merged = match result.get(key) {
                        Some(existing) if existing == value => continue,
                        Some(existing @ Value::Object(_)) if value.is_object() => {
                            existing.merge(value)
                        }
                        Some(existing @ Value::Array(_)) if value.is_array() => {
                            existing.merge(value)
                        }
                        _ => value.clone(),
                    };
                    result.insert(key.clone(), merged);
                }
                if result.type_name.is_none() {
                    result.type_name = incoming.type_name.clone();
                }
                Value::object_map(result)
            }
            (Value::Array(original), Value::Array(incoming)) => {
                let mut result = Vec::with_capacity(original.len() + incoming.len());
                result.extend(original.iter().cloned());
                result.extend(incoming.iter().cloned());
                Value::array(result)
            }
            _ => other.clone(),
        }
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for Value {
    #[inline]
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    #[inline]
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Decimal> for Value {
    /// A double when its shortest text matches the decimal digits, otherwise the
    /// exact decimal (`2^53 + 1`, nineteen fractional digits).
    fn from(d: Decimal) -> Self {
        let d = d.normalize();
        let text = d.to_string();
        match text.parse::<f64>() {
            Ok(n) if n.to_string() == text => Value::Number(n),
            _ => Value::Decimal(d),
        }
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<DateTime<Utc>> for Value {
    #[inline]
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    #[inline]
    fn from(v: Vec<Value>) -> Self {
        Value::Array(Arc::new(v))
    }
}

impl From<IndexMap<String, Value>> for Value {
    #[inline]
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::object(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Missing, Value::Missing) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Number(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Number(a)) => {
                utils::decimal_from_f64(*a).is_some_and(|a| a == *b)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Iterable(a), Value::Iterable(b)) => a == b,
            _ => false,
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null | Value::Missing => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => format_number(*n, f),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "\"{}\"", escape_json_string(s)),
            Value::Date(d) => write!(f, "\"{}\"", datetime::format_iso8601(d)),
            Value::Array(arr) => write_array(f, arr.iter()),
            Value::Iterable(it) => write_array(f, it.iter()),
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{}\":{}", escape_json_string(k), v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_array<I, V>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: Iterator<Item = V>,
    V: std::borrow::Borrow<Value>,
{
    write!(f, "[")?;
    for (i, v) in items.enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", v.borrow())?;
    }
    write!(f, "]")
}

fn escape_json_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c < '\x20' => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !n.is_finite() {
        write!(f, "null")
    } else if n.fract() == 0.0 && n.abs() < 1e20 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null | Value::Missing => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.is_nan() || n.is_infinite() {
                    serializer.serialize_none()
                } else if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            // fractional digits past f64 precision are rounded on the way out
            Value::Decimal(d) => match d.to_i128() {
                Some(i) if d.fract().is_zero() => serializer.serialize_i128(i),
                _ => serializer.serialize_f64(d.to_f64().unwrap_or(0.0)),
            },
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.serialize_str(&datetime::format_iso8601(d)),
            Value::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Iterable(it) => {
                let mut seq = serializer.serialize_seq(None)?;
                for v in it.iter() {
                    seq.serialize_element(&v)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

// ── Deserialization (single-pass JSON→Value) ─────────────────────────────────

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut vec = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element()? {
            vec.push(elem);
        }
        Ok(Value::array(vec))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut m = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            m.insert(k, v);
        }
        Ok(Value::object(m))
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

impl Value {
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(s: &str) -> Result<Value, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── serde_json::Value interop ────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(arr) => {
                Value::Array(Arc::new(arr.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => {
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect::<ObjectMap>().into()
            }
        }
    }
}

impl From<ObjectMap> for Value {
    fn from(m: ObjectMap) -> Self {
        Value::object_map(m)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null | Value::Missing => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::Decimal(d) => match (d.to_i64(), d.to_u64()) {
                (Some(i), _) if d.fract().is_zero() => serde_json::Value::from(i),
                (_, Some(u)) if d.fract().is_zero() => serde_json::Value::from(u),
                _ => d
                    .to_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            },
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Date(d) => serde_json::Value::String(datetime::format_iso8601(d)),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(serde_json::Value::from).collect())
            }
            Value::Iterable(it) => {
                serde_json::Value::Array(it.iter().map(|v| serde_json::Value::from(&v)).collect())
            }
            Value::Object(map) => {
                let m: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect();
                serde_json::Value::Object(m)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Countdown(i64);

    impl LazyIterable for Countdown {
        fn iterate(&self) -> Box<dyn Iterator<Item = Value> + '_> {
            Box::new((1..=self.0).rev().map(Value::from))
        }
    }

    #[test]
    fn test_clone_is_cheap() {
        let arr = Value::array(vec![Value::from(1i64), Value::from(2i64)]);
        let arr2 = arr.clone();
        if let (Value::Array(a), Value::Array(b)) = (&arr, &arr2) {
            assert!(Arc::ptr_eq(a, b));
        } else {
            panic!("expected arrays");
        }
    }

    #[test]
    fn test_type_checks() {
        assert!(Value::Null.is_absent());
        assert!(Value::Missing.is_absent());
        assert!(!Value::Bool(false).is_absent());
        assert!(Value::Number(1.0).is_scalar());
        assert!(Value::string("x").is_scalar());
        assert!(!Value::array(vec![]).is_scalar());
        assert!(!Value::empty_object().is_scalar());
        assert!(!Value::iterable(Countdown(2)).is_scalar());
    }

    #[test]
    fn test_type_tag_is_idempotent_and_ignored_by_equality() {
        let plain: Value = json!({"id": 1}).into();
        let tagged = plain.clone().with_type("Customer").with_type("Customer");
        assert_eq!(tagged.type_name(), Some("Customer"));
        assert_eq!(plain.type_name(), None);
        assert_eq!(plain, tagged);
        // Tagging a scalar is a no-op.
        assert_eq!(Value::from(3i64).with_type("Customer"), Value::from(3i64));
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original: Value = json!({"a": {"b": [1, 2]}}).into();
        let mut copy = original.deep_copy();
        assert_eq!(copy, original);

        copy.as_object_mut()
            .unwrap()
            .insert("extra".to_string(), Value::Bool(true));
        assert!(original.get("extra").is_none());

        if let (Value::Object(a), Value::Object(b)) = (&original, &copy) {
            let inner_a = a.get("a").unwrap();
            let inner_b = b.get("a").unwrap();
            if let (Value::Object(x), Value::Object(y)) = (inner_a, inner_b) {
                assert!(!Arc::ptr_eq(x, y));
            }
        }
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let obj: Value = json!({"a": 1, "b": {"c": 2}}).into();
        assert_eq!(obj.merge(&Value::empty_object()), obj);
    }

    #[test]
    fn test_merge_disjoint_is_union() {
        let left: Value = json!({"a": 1}).into();
        let right: Value = json!({"b": 2}).into();
        assert_eq!(left.merge(&right), Value::from(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_merge_recurses_into_objects() {
        let left: Value = json!({"a": {"b": 1}}).into();
        let right: Value = json!({"a": {"c": 2}}).into();
        assert_eq!(
            left.merge(&right),
            Value::from(json!({"a": {"b": 1, "c": 2}}))
        );
    }

    #[test]
    fn test_merge_arrays_and_scalars() {
        let left: Value = json!({"list": [1], "name": "a"}).into();
        let right: Value = json!({"list": [2], "name": "b"}).into();
        assert_eq!(
            left.merge(&right),
            Value::from(json!({"list": [1, 2], "name": "b"}))
        );
        assert_eq!(Value::from(1i64).merge(&Value::from(2i64)), Value::from(2i64));
    }

    #[test]
    fn test_merge_keeps_type_name() {
        let left = Value::from(json!({"a": 1})).with_type("Left");
        let right = Value::from(json!({"b": 2})).with_type("Right");
        assert_eq!(left.merge(&right).type_name(), Some("Left"));
        assert_eq!(
            Value::empty_object().merge(&right).type_name(),
            Some("Right")
        );
    }

    #[test]
    fn test_iterable_elements() {
        let it = Value::iterable(Countdown(3));
        let items: Vec<Value> = it.iter_elements().unwrap().collect();
        assert_eq!(items, vec![Value::from(3i64), Value::from(2i64), Value::from(1i64)]);
        assert_eq!(it.to_json_string().unwrap(), "[3,2,1]");
        assert!(Value::from(1i64).iter_elements().is_none());
    }

    #[test]
    fn test_serde_roundtrip() {
        let v: Value = json!({"name": "Alice", "scores": [1, 2.5], "active": true, "none": null}).into();
        let json_str = v.to_json_string().unwrap();
        assert_eq!(Value::from_json_str(&json_str).unwrap(), v);
        assert_eq!(Value::Missing.to_json_string().unwrap(), "null");
    }

    #[test]
    fn test_decimal_results_keep_their_digits() {
        let big = Value::from(Decimal::from_str_exact("9007199254740993").unwrap());
        assert!(matches!(big, Value::Decimal(_)));
        assert!(big.is_number());
        assert_eq!(big.to_string(), "9007199254740993");
        assert_eq!(big.as_i64(), Some(9_007_199_254_740_993));
        assert_eq!(big.to_json_string().unwrap(), "9007199254740993");
        assert_ne!(big, Value::from(9_007_199_254_740_992i64));

        let fine = Value::from(Decimal::from_str_exact("0.1234567890123456789").unwrap());
        assert_eq!(fine.to_string(), "0.1234567890123456789");

        // representable results stay plain doubles
        assert_eq!(Value::from(Decimal::from_str_exact("0.30").unwrap()), Value::Number(0.3));
        assert!(matches!(Value::from(Decimal::from(12)), Value::Number(_)));
    }

    #[test]
    fn test_display_matches_json() {
        let v: Value = json!({"a": [1, "two"], "b": 1.5}).into();
        assert_eq!(v.to_string(), r#"{"a":[1,"two"],"b":1.5}"#);
    }
}
