use crate::condition::{CompareOp, Expr};
use crate::{DataMap, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Result of evaluating a condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub matched: bool,
    /// One entry per distinct undefined variable referenced.
    pub warnings: Vec<String>,
}

/// Three-valued truth: `Unknown` comes from undefined variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

pub(crate) fn evaluate(expr: &Expr, data: &DataMap) -> Evaluation {
    let mut warnings = Vec::new();
    let truth = truth(expr, data, &mut warnings);
    Evaluation {
        matched: truth == Truth::True,
        warnings,
    }
}

fn truth(expr: &Expr, data: &DataMap, warnings: &mut Vec<String>) -> Truth {
    match expr {
        Expr::Not(inner) => match truth(inner, data, warnings) {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        },
        Expr::And(left, right) => match truth(left, data, warnings) {
            Truth::False => Truth::False,
            l => match (l, truth(right, data, warnings)) {
                (_, Truth::False) => Truth::False,
                (Truth::True, Truth::True) => Truth::True,
                _ => Truth::Unknown,
            },
        },
        Expr::Or(left, right) => match truth(left, data, warnings) {
            Truth::True => Truth::True,
            l => match (l, truth(right, data, warnings)) {
                (_, Truth::True) => Truth::True,
                (Truth::False, Truth::False) => Truth::False,
                _ => Truth::Unknown,
            },
        },
        Expr::Compare { op, left, right } => {
            let l = operand(left, data, warnings);
            let r = operand(right, data, warnings);
            match (l, r) {
                (Some(l), Some(r)) => compare(*op, &l, &r).into(),
                _ => Truth::Unknown,
            }
        }
        Expr::Literal(_) | Expr::Path(_) | Expr::List(_) => match operand(expr, data, warnings) {
            Some(value) => value.is_truthy().into(),
            None => Truth::Unknown,
        },
    }
}

/// Resolve an expression to a value; `None` means it depends on an undefined variable.
fn operand<'a>(expr: &'a Expr, data: &'a DataMap, warnings: &mut Vec<String>) -> Option<Cow<'a, Value>> {
    match expr {
        Expr::Literal(value) => Some(Cow::Borrowed(value)),
        Expr::Path(segments) => {
            let found = lookup(segments, data);
            if found.is_none() {
                let warning = format!("undefined variable '{}'", segments.join("."));
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
            found.map(Cow::Borrowed)
        }
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            let mut undefined = false;
            for item in items {
                match operand(item, data, warnings) {
                    Some(value) => values.push(value.into_owned()),
                    None => undefined = true,
                }
            }
            if undefined {
                None
            } else {
                Some(Cow::Owned(Value::Array(values)))
            }
        }
        other => match truth(other, data, warnings) {
            Truth::True => Some(Cow::Owned(Value::Bool(true))),
            Truth::False => Some(Cow::Owned(Value::Bool(false))),
            Truth::Unknown => None,
        },
    }
}

fn lookup<'a>(segments: &[String], data: &'a DataMap) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    rest.iter()
        .try_fold(data.get(first)?, |value, segment| value.get_segment(segment))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => left.loose_eq(right),
        CompareOp::Ne => !left.loose_eq(right),
        CompareOp::Lt => ordering(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::In => contains(right, left).unwrap_or(false),
        CompareOp::NotIn => contains(right, left).map(|found| !found).unwrap_or(false),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Membership test; `None` when the container is not a collection.
fn contains(container: &Value, item: &Value) -> Option<bool> {
    match container {
        Value::Array(items) => Some(items.iter().any(|candidate| candidate.loose_eq(item))),
        Value::String(haystack) => Some(item.as_str().is_some_and(|needle| haystack.contains(needle))),
        Value::Object(map) => Some(item.as_str().is_some_and(|key| map.contains_key(key))),
        _ => None,
    }
}
