// Condition evaluation shared by if, switch, coalesce, filters and while
// Pure functions over values; no context access

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::RegexBuilder;
use thiserror::Error;

use crate::utils;
use crate::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown condition operator '{0}'")]
pub struct UnknownOperator(pub String);

/// Comparison operators understood by conditions and switch cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Exists,
    NotExists,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Matches,
    NotMatches,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    In,
    NotIn,
    Is,
    NotIs,
    /// Always matches. Used as the switch default branch.
    Else,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Exists => "exists",
            Operator::NotExists => "notexists",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Matches => "matches",
            Operator::NotMatches => "!matches",
            Operator::Contains => "contains",
            Operator::NotContains => "!contains",
            Operator::StartsWith => "startswith",
            Operator::NotStartsWith => "!startswith",
            Operator::EndsWith => "endswith",
            Operator::NotEndsWith => "!endswith",
            Operator::In => "in",
            Operator::NotIn => "!in",
            Operator::Is => "is",
            Operator::NotIs => "!is",
            Operator::Else => "else",
        }
    }

    /// Operators that only look at the left operand.
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Exists | Operator::NotExists | Operator::Else)
    }
}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "exists" => Operator::Exists,
            "notexists" | "!exists" => Operator::NotExists,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<" => Operator::Less,
            "<=" => Operator::LessOrEqual,
            ">" => Operator::Greater,
            ">=" => Operator::GreaterOrEqual,
            "matches" => Operator::Matches,
            "!matches" => Operator::NotMatches,
            "contains" => Operator::Contains,
            "!contains" => Operator::NotContains,
            "startswith" => Operator::StartsWith,
            "!startswith" => Operator::NotStartsWith,
            "endswith" => Operator::EndsWith,
            "!endswith" => Operator::NotEndsWith,
            "in" => Operator::In,
            "!in" => Operator::NotIn,
            "is" => Operator::Is,
            "!is" => Operator::NotIs,
            "else" => Operator::Else,
            _ => return Err(UnknownOperator(s.to_string())),
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Evaluate `left <op> right`. `None` stands for an absent operand.
pub fn evaluate(left: Option<&Value>, op: Operator, right: Option<&Value>) -> bool {
    match op {
        Operator::Exists => is_valid(left),
        Operator::NotExists => !is_valid(left),
        Operator::Equal => equalish(left, right),
        Operator::NotEqual => !equalish(left, right),
        Operator::Less => compare(left, right) == Some(Ordering::Less),
        Operator::LessOrEqual => {
            equalish(left, right) || compare(left, right) == Some(Ordering::Less)
        }
        Operator::Greater => compare(left, right) == Some(Ordering::Greater),
        Operator::GreaterOrEqual => {
            equalish(left, right) || compare(left, right) == Some(Ordering::Greater)
        }
        Operator::Matches => matches(left, right),
        Operator::NotMatches => !matches(left, right),
        Operator::Contains => contains(left, right),
        Operator::NotContains => !contains(left, right),
        Operator::StartsWith => affix(left, right, |l, r| l.starts_with(r)).unwrap_or(false),
        Operator::NotStartsWith => affix(left, right, |l, r| !l.starts_with(r)).unwrap_or(false),
        Operator::EndsWith => affix(left, right, |l, r| l.ends_with(r)).unwrap_or(false),
        Operator::NotEndsWith => affix(left, right, |l, r| !l.ends_with(r)).unwrap_or(false),
        Operator::In => contains(right, left),
        Operator::NotIn => !contains(right, left),
        Operator::Is => is_of_type(left, right),
        Operator::NotIs => !is_of_type(left, right),
        Operator::Else => true,
    }
}

/// Truthiness: false for absence, `""`, `[]` and `false`; true for everything
/// else including `0` and `{}`.
pub fn is_valid(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Missing) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(arr)) => !arr.is_empty(),
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

/// Loose equality: instants by epoch second, then decimals when either side is a
/// number, then text.
pub fn equalish(left: Option<&Value>, right: Option<&Value>) -> bool {
    let left = left.filter(|v| !v.is_absent());
    let right = right.filter(|v| !v.is_absent());
    let (l, r) = match (left, right) {
        (None, None) => return true,
        (Some(l), Some(r)) => (l, r),
        _ => return false,
    };

    if let (Some(a), Some(b)) = (l.as_date(), r.as_date()) {
        return a.timestamp() == b.timestamp();
    }

    if l.is_number() || r.is_number() {
        if let (Some(a), Some(b)) = (utils::try_decimal(Some(l)), utils::try_decimal(Some(r))) {
            return a == b;
        }
    }

    match (utils::try_string(Some(l)), utils::try_string(Some(r))) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

/// Ordering used by `<`, `>` and friends.
///
/// Absent operands read as zero on the decimal path, so `missing < 5` holds.
/// Two absent operands order as equal on the text path.
fn compare(left: Option<&Value>, right: Option<&Value>) -> Option<Ordering> {
    let left = left.filter(|v| !v.is_absent());
    let right = right.filter(|v| !v.is_absent());

    if let (Some(a), Some(b)) = (utils::try_instant(left), utils::try_instant(right)) {
        return Some(a.timestamp().cmp(&b.timestamp()));
    }

    if let (Some(a), Some(b)) = (utils::try_decimal(left), utils::try_decimal(right)) {
        return Some(a.cmp(&b));
    }

    match (utils::try_string(left), utils::try_string(right)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

fn contains(haystack: Option<&Value>, needle: Option<&Value>) -> bool {
    if let Some(elements) = haystack.and_then(Value::iter_elements) {
        return elements.into_iter().any(|item| equalish(Some(&item), needle));
    }
    match (utils::try_string(haystack), utils::try_string(needle)) {
        (Some(h), Some(n)) => h.to_lowercase().contains(&n.to_lowercase()),
        _ => false,
    }
}

/// Case-insensitive prefix/suffix test; `None` when either side has no text.
fn affix(
    left: Option<&Value>,
    right: Option<&Value>,
    test: impl Fn(&str, &str) -> bool,
) -> Option<bool> {
    let l = utils::try_string(left)?.to_lowercase();
    let r = utils::try_string(right)?.to_lowercase();
    Some(test(&l, &r))
}

/// Case-insensitive regex search (not a full match). An invalid pattern never matches.
fn matches(left: Option<&Value>, right: Option<&Value>) -> bool {
    let Some(text) = utils::try_string(left) else {
        return false;
    };
    let pattern = utils::try_string(right).unwrap_or_default();
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(&text))
        .unwrap_or(false)
}

fn is_of_type(left: Option<&Value>, right: Option<&Value>) -> bool {
    let kind = utils::try_string(right)
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    match (kind.as_str(), left) {
        ("number", Some(Value::Number(_) | Value::Decimal(_))) => true,
        ("date", Some(Value::Date(_))) => true,
        ("string", Some(Value::String(_))) => true,
        ("node", Some(Value::Object(_))) => true,
        ("array", Some(Value::Array(_) | Value::Iterable(_))) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::parse_iso8601;
    use rstest::rstest;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[rstest]
    #[case::null(json!(null), false)]
    #[case::empty_string(json!(""), false)]
    #[case::empty_array(json!([]), false)]
    #[case::false_value(json!(false), false)]
    #[case::zero(json!(0), true)]
    #[case::zero_string(json!("0"), true)]
    #[case::array_of_zero(json!([0]), true)]
    #[case::object(json!({"a": 1}), true)]
    #[case::empty_object(json!({}), true)]
    fn test_truthiness(#[case] input: serde_json::Value, #[case] expected: bool) {
        assert_eq!(is_valid(Some(&v(input))), expected);
    }

    #[test]
    fn test_absent_is_not_valid() {
        assert!(!is_valid(None));
        assert!(!is_valid(Some(&Value::Missing)));
    }

    #[rstest]
    #[case::numeric_string_vs_number(json!("10"), json!(10), true)]
    #[case::decimal_scale(json!(1.50), json!("1.5"), true)]
    #[case::lexical_strings(json!("10"), json!("9"), false)]
    #[case::lexical_other(json!("b"), json!("a"), false)]
    #[case::same_text(json!("abc"), json!("abc"), true)]
    #[case::case_sensitive(json!("ABC"), json!("abc"), false)]
    #[case::bool_text(json!(true), json!("true"), true)]
    #[case::null_vs_value(json!(null), json!(0), false)]
    #[case::null_vs_null(json!(null), json!(null), true)]
    fn test_equalish(
        #[case] left: serde_json::Value,
        #[case] right: serde_json::Value,
        #[case] expected: bool,
    ) {
        assert_eq!(equalish(Some(&v(left)), Some(&v(right))), expected);
    }

    #[test]
    fn test_dates_compare_by_epoch_second() {
        let a = Value::Date(parse_iso8601("2024-01-01T00:00:00.100Z").unwrap());
        let b = Value::Date(parse_iso8601("2024-01-01T00:00:00.900Z").unwrap());
        let c = Value::Date(parse_iso8601("2024-01-02T00:00:00Z").unwrap());
        assert!(equalish(Some(&a), Some(&b)));
        assert!(evaluate(Some(&a), Operator::Less, Some(&c)));
        assert!(evaluate(Some(&c), Operator::GreaterOrEqual, Some(&b)));
    }

    #[rstest]
    #[case::lt_numbers(json!(2), "<", json!(10), true)]
    #[case::lt_numeric_strings(json!("2"), "<", json!("10"), true)]
    #[case::lt_text(json!("apple"), "<", json!("banana"), true)]
    #[case::le_equal(json!(5), "<=", json!("5"), true)]
    #[case::gt(json!(10), ">", json!(9.5), true)]
    #[case::ge_less(json!(1), ">=", json!(2), false)]
    #[case::ne(json!("a"), "!=", json!("b"), true)]
    #[case::contains_text(json!("Hello World"), "contains", json!("WORLD"), true)]
    #[case::contains_array(json!([1, "2", 3]), "contains", json!(2), true)]
    #[case::not_contains_array(json!([1, 3]), "!contains", json!(2), true)]
    #[case::in_array(json!("b"), "in", json!(["a", "b"]), true)]
    #[case::not_in_array(json!("c"), "!in", json!(["a", "b"]), true)]
    #[case::starts_with(json!("Prefix-1"), "startsWith", json!("pre"), true)]
    #[case::not_starts_with(json!("Prefix-1"), "!startsWith", json!("x"), true)]
    #[case::ends_with(json!("file.JSON"), "endswith", json!(".json"), true)]
    #[case::not_ends_with(json!("file.json"), "!endsWith", json!(".json"), false)]
    #[case::matches_search(json!("value"), "matches", json!("^V"), true)]
    #[case::matches_partial(json!("my value"), "matches", json!("val"), true)]
    #[case::not_matches(json!("abc"), "!matches", json!("\\d"), true)]
    #[case::invalid_regex(json!("abc"), "matches", json!("("), false)]
    #[case::is_number(json!(1), "is", json!("number"), true)]
    #[case::is_string(json!("1"), "is", json!("number"), false)]
    #[case::is_node(json!({}), "is", json!("node"), true)]
    #[case::is_array(json!([]), "is", json!("Array"), true)]
    #[case::not_is(json!("x"), "!is", json!("string"), false)]
    #[case::exists(json!(0), "exists", json!(null), true)]
    #[case::notexists(json!(""), "notexists", json!(null), true)]
    #[case::else_branch(json!(null), "else", json!(null), true)]
    fn test_operators(
        #[case] left: serde_json::Value,
        #[case] op: &str,
        #[case] right: serde_json::Value,
        #[case] expected: bool,
    ) {
        let op: Operator = op.parse().unwrap();
        assert_eq!(evaluate(Some(&v(left)), op, Some(&v(right))), expected);
    }

    #[test]
    fn test_negated_affixes_fail_on_absent_operands() {
        let text = Value::string("abc");
        assert!(!evaluate(None, Operator::NotStartsWith, Some(&text)));
        assert!(!evaluate(Some(&text), Operator::NotEndsWith, None));
        assert!(!evaluate(None, Operator::StartsWith, Some(&text)));
    }

    #[test]
    fn test_absent_orders_as_zero() {
        assert!(evaluate(None, Operator::Less, Some(&Value::from(5i64))));
        assert!(evaluate(Some(&Value::from(-1i64)), Operator::Less, None));
    }

    #[test]
    fn test_unknown_operator() {
        assert_eq!(
            "~=".parse::<Operator>(),
            Err(UnknownOperator("~=".to_string()))
        );
        assert_eq!("StartsWith".parse::<Operator>(), Ok(Operator::StartsWith));
    }
}
