//! Restricted condition language for sequence flows.
//!
//! Conditions are compiled once when a definition is loaded and evaluated
//! against instance data at exclusive gateways. The grammar covers
//! comparisons, boolean connectives and membership; there are no function
//! calls and no way to mutate data.

mod eval;
mod lexer;
mod parser;

use crate::DataMap;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub use eval::Evaluation;

/// Parse failure with the byte offset into the source text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("at offset {offset}: {message}")]
pub struct ConditionError {
    pub offset: usize,
    pub message: String,
}

impl ConditionError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Compiled condition syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(crate::Value),
    Path(Vec<String>),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// A compiled condition together with the text it was compiled from.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::Parser::new(tokens, source.len()).parse()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against instance data. Undefined variables make the result
    /// false and are reported in [`Evaluation::warnings`].
    pub fn evaluate(&self, data: &DataMap) -> Evaluation {
        eval::evaluate(&self.expr, data)
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn data(pairs: &[(&str, Value)]) -> DataMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn eval(source: &str, data: &DataMap) -> Evaluation {
        Condition::parse(source).unwrap().evaluate(data)
    }

    #[test]
    fn test_equality_and_inequality() {
        let d = data(&[("valid", Value::Bool(false)), ("count", Value::Int(3))]);
        assert!(eval("valid == false", &d).matched);
        assert!(!eval("valid == true", &d).matched);
        assert!(eval("count != 4", &d).matched);
        assert!(eval("count == 3.0", &d).matched);
        assert!(eval("count >= 3 && count < 10", &d).matched);
    }

    #[test]
    fn test_boolean_connectives() {
        let d = data(&[("a", Value::Bool(true)), ("b", Value::Bool(false))]);
        assert!(eval("a or b", &d).matched);
        assert!(!eval("a and b", &d).matched);
        assert!(eval("not b", &d).matched);
        assert!(eval("!(a && b)", &d).matched);
    }

    #[test]
    fn test_membership() {
        let d = data(&[
            ("tier", Value::from("gold")),
            ("tags", Value::Array(vec![Value::from("vip"), Value::from("eu")])),
        ]);
        assert!(eval("tier in ['gold', 'platinum']", &d).matched);
        assert!(eval("'vip' in tags", &d).matched);
        assert!(eval("'us' not in tags", &d).matched);
        assert!(eval("'ol' in tier", &d).matched);
    }

    #[test]
    fn test_nested_path_lookup() {
        let mut retries = std::collections::BTreeMap::new();
        retries.insert("charge-card".to_string(), Value::Int(2));
        let d = data(&[("_retries", Value::Object(retries))]);
        assert!(eval("_retries.charge-card >= 2", &d).matched);
    }

    #[test]
    fn test_undefined_variable_is_false_with_warning() {
        let d = data(&[]);
        let result = eval("missing == 1", &d);
        assert!(!result.matched);
        assert_eq!(result.warnings, vec!["undefined variable 'missing'".to_string()]);

        // negation must not turn an undefined reference into a match
        let negated = eval("not missing", &d);
        assert!(!negated.matched);
        assert_eq!(negated.warnings.len(), 1);
    }

    #[test]
    fn test_undefined_variable_does_not_mask_known_result() {
        let d = data(&[("ok", Value::Bool(true))]);
        assert!(eval("ok or missing", &d).matched);
        assert!(!eval("missing and ok", &d).matched);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("a ==").is_err());
        assert!(Condition::parse("(a == 1").is_err());
        assert!(Condition::parse("a = 1").is_err());
        assert!(Condition::parse("'open").is_err());
        let err = Condition::parse("a == 1 b").unwrap_err();
        assert_eq!(err.offset, 7);
    }

    #[test]
    fn test_numeric_path_segments() {
        let matrix = Value::Array(vec![
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
            Value::Array(vec![Value::Int(3), Value::Int(4)]),
        ]);
        let d = data(&[("items", matrix)]);
        assert!(eval("items.1.0 == 3", &d).matched);
        assert!(eval("items.0.1 == 2", &d).matched);
        assert!(eval("items.0.1 < 2.5", &d).matched);
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = format!("{}x{}", "(".repeat(3000), ")".repeat(3000));
        let err = Condition::parse(&nested).unwrap_err();
        assert_eq!(err.message, "condition nested too deeply");

        let negations = format!("{}x", "!".repeat(20_000));
        assert!(Condition::parse(&negations).is_err());

        let lists = format!("x in {}1{}", "[".repeat(3000), "]".repeat(3000));
        assert!(Condition::parse(&lists).is_err());

        let chain = vec!["x == 1"; 5000].join(" && ");
        assert!(Condition::parse(&chain).is_err());

        // moderate nesting is still fine
        let d = data(&[("x", Value::Int(1))]);
        let shallow = format!("{}x == 1{}", "(".repeat(20), ")".repeat(20));
        assert!(eval(&shallow, &d).matched);
        let short_chain = vec!["x == 1"; 20].join(" && ");
        assert!(eval(&short_chain, &d).matched);
    }
}
