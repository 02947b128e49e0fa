//! # Condition Predicates
//!
//! The predicate language `condition` steps evaluate over the current
//! execution variables. Pure data, no dispatch: the scheduler evaluates
//! a predicate locally and follows `on_success`/`on_failure`.

use shared_types::Value;

/// Comparison operators over a variable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than (numeric or string).
    Gt,
    /// Greater or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less or equal.
    Lte,
}

impl CompareOp {
    /// Stable tag used in flow documents.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
        }
    }

    /// Parses a document tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "gt" => Some(CompareOp::Gt),
            "gte" => Some(CompareOp::Gte),
            "lt" => Some(CompareOp::Lt),
            "lte" => Some(CompareOp::Lte),
            _ => None,
        }
    }
}

/// A predicate over execution variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Compares the value at `path` against a literal.
    Compare {
        /// Dotted variable path.
        path: String,
        /// Operator.
        op: CompareOp,
        /// Literal to compare against.
        value: Value,
    },
    /// True when `path` resolves to a non-null value.
    Exists {
        /// Dotted variable path.
        path: String,
    },
    /// True when the list or string at `path` contains `value`.
    Contains {
        /// Dotted variable path.
        path: String,
        /// Needle.
        value: Value,
    },
    /// True when every child predicate holds.
    All(Vec<Predicate>),
    /// True when any child predicate holds.
    Any(Vec<Predicate>),
}

impl Predicate {
    /// Evaluates against the current variables. Missing paths make
    /// comparisons false, never errors: flows branch on absence via
    /// `Exists`.
    #[must_use]
    pub fn evaluate(&self, variables: &Value) -> bool {
        match self {
            Predicate::Compare { path, op, value } => {
                let Some(actual) = variables.get_path(path) else {
                    return false;
                };
                compare(actual, *op, value)
            }
            Predicate::Exists { path } => variables
                .get_path(path)
                .is_some_and(|v| !v.is_null()),
            Predicate::Contains { path, value } => match variables.get_path(path) {
                Some(Value::List(items)) => items.contains(value),
                Some(Value::Str(haystack)) => value
                    .as_str()
                    .is_some_and(|needle| haystack.contains(needle)),
                _ => false,
            },
            Predicate::All(children) => children.iter().all(|p| p.evaluate(variables)),
            Predicate::Any(children) => children.iter().any(|p| p.evaluate(variables)),
        }
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let ordering = match (actual, expected) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => match (actual.as_float(), expected.as_float()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Gte => ordering.is_ge(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Lte => ordering.is_le(),
                _ => unreachable!(),
            }
        }
    }
}

/// Equality with int/float widening, so `3 == 3.0` holds in predicates
/// even though the shapes differ.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    matches!(
        (a.as_float(), b.as_float()),
        (Some(x), Some(y)) if x == y
    )
}
