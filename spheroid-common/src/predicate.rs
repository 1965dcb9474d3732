//! Object-level predicate AST
//!
//! Predicates select objects. They are plain data: the analysis stages
//! build them, and a storage backend lowers them to its native query form
//! (see `db::predicate_sql` for SQLite).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column a comparison reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnRef {
    ObjectId,
    ObjectType,
    ObjectNumber,
    ImageId,
    /// Condition of the object's image (NULL until debarcoded)
    ConditionId,
    /// Raw stored measurement value; only valid inside [`Predicate::Measurement`]
    Value,
    /// Measurement value times its calibration factor; only valid inside
    /// [`Predicate::Measurement`]
    ScaledValue,
}

impl ColumnRef {
    pub fn is_measurement_column(self) -> bool {
        matches!(self, ColumnRef::Value | ColumnRef::ScaledValue)
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
        }
    }

    /// Evaluate on in-memory values
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" | "lt" => Ok(CompareOp::Lt),
            "<=" | "le" => Ok(CompareOp::Le),
            ">" | "gt" => Ok(CompareOp::Gt),
            ">=" | "ge" => Ok(CompareOp::Ge),
            "=" | "==" | "eq" => Ok(CompareOp::Eq),
            "!=" | "<>" | "ne" => Ok(CompareOp::Ne),
            other => Err(format!("unknown comparison operator '{}'", other)),
        }
    }
}

/// Literal on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Text(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Text(v)
    }
}

/// Boolean predicate over objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Every object
    All,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: Literal,
    },
    InSet {
        column: ColumnRef,
        values: Vec<Literal>,
    },
    /// Object has a value for one of `measurement_ids` satisfying `condition`
    /// (`condition` may only reference measurement columns, or be `All`)
    Measurement {
        measurement_ids: Vec<i64>,
        condition: Box<Predicate>,
    },
    /// Object carries the named filter with the given value
    Filter { name: String, value: bool },
}

impl Predicate {
    pub fn compare(column: ColumnRef, op: CompareOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn object_type(object_type: &str) -> Self {
        Self::compare(ColumnRef::ObjectType, CompareOp::Eq, object_type)
    }

    /// Objects having any value for the given measurement definitions
    pub fn has_measurement(measurement_ids: Vec<i64>) -> Self {
        Predicate::Measurement {
            measurement_ids,
            condition: Box::new(Predicate::All),
        }
    }

    /// Objects whose scaled value for one of the definitions satisfies `op threshold`
    pub fn measurement_threshold(measurement_ids: Vec<i64>, op: CompareOp, threshold: f64) -> Self {
        Predicate::Measurement {
            measurement_ids,
            condition: Box::new(Self::compare(ColumnRef::ScaledValue, op, threshold)),
        }
    }

    pub fn filter(name: impl Into<String>, value: bool) -> Self {
        Predicate::Filter {
            name: name.into(),
            value,
        }
    }

    /// Conjunction, flattening nested `And` and dropping `All`
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = Vec::new();
        for p in [self, other] {
            match p {
                Predicate::All => {}
                Predicate::And(inner) => parts.extend(inner),
                p => parts.push(p),
            }
        }
        match parts.len() {
            0 => Predicate::All,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    /// Disjunction, flattening nested `Or`
    pub fn or(self, other: Predicate) -> Self {
        let mut parts = Vec::new();
        for p in [self, other] {
            match p {
                Predicate::Or(inner) => parts.extend(inner),
                p => parts.push(p),
            }
        }
        Predicate::Or(parts)
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::Not(inner) => *inner,
            p => Predicate::Not(Box::new(p)),
        }
    }

    /// True when no measurement column appears outside a `Measurement` node
    pub fn is_object_level(&self) -> bool {
        match self {
            Predicate::All | Predicate::Filter { .. } | Predicate::Measurement { .. } => true,
            Predicate::And(parts) | Predicate::Or(parts) => parts.iter().all(Predicate::is_object_level),
            Predicate::Not(inner) => inner.is_object_level(),
            Predicate::Compare { column, .. } | Predicate::InSet { column, .. } => {
                !column.is_measurement_column()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens_and_drops_all() {
        let p = Predicate::All
            .and(Predicate::object_type("cell"))
            .and(Predicate::filter("is-sphere", true));

        match p {
            Predicate::And(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_and_of_single_predicate_unwraps() {
        let p = Predicate::All.and(Predicate::object_type("cell"));
        assert_eq!(p, Predicate::object_type("cell"));
    }

    #[test]
    fn test_double_negation_cancels() {
        let p = Predicate::filter("is-hq", true);
        assert_eq!(p.clone().negate().negate(), p);
    }

    #[test]
    fn test_measurement_column_outside_measurement_is_not_object_level() {
        let bad = Predicate::compare(ColumnRef::Value, CompareOp::Gt, 1.0);
        assert!(!bad.is_object_level());

        let good = Predicate::measurement_threshold(vec![1], CompareOp::Gt, 1.0);
        assert!(good.is_object_level());
    }

    #[test]
    fn test_compare_op_parse_and_apply() {
        let op: CompareOp = ">=".parse().unwrap();
        assert_eq!(op, CompareOp::Ge);
        assert!(op.apply(2.0, 2.0));
        assert!("~".parse::<CompareOp>().is_err());
    }
}
