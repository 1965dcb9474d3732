//! Lowering of [`Predicate`] trees to SQLite `WHERE` clauses
//!
//! The outer query must expose `objects` as `o` and `images` as `i`
//! (see [`OBJECTS_FROM`]). Every literal is bound, never interpolated.

use crate::predicate::{ColumnRef, Literal, Predicate};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};

/// FROM clause every predicate query starts from
pub const OBJECTS_FROM: &str = " FROM objects o LEFT JOIN images i ON i.image_id = o.image_id ";

/// Scaled value expression inside a measurement subquery
const SCALED_VALUE_SQL: &str =
    "(om.value * COALESCE(s.stack_scale, 1.0) * COALESCE(p.plane_scale, 1.0))";

/// Append `predicate` as a parenthesised boolean SQL expression
pub fn push_predicate(qb: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate) -> Result<()> {
    push_node(qb, predicate, false)
}

fn push_node(qb: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate, in_measurement: bool) -> Result<()> {
    match predicate {
        Predicate::All => {
            qb.push("(1 = 1)");
        }
        Predicate::And(parts) => push_joined(qb, parts, " AND ", "(1 = 1)", in_measurement)?,
        Predicate::Or(parts) => push_joined(qb, parts, " OR ", "(1 = 0)", in_measurement)?,
        Predicate::Not(inner) => {
            qb.push("(NOT ");
            push_node(qb, inner, in_measurement)?;
            qb.push(")");
        }
        Predicate::Compare { column, op, value } => {
            qb.push("(");
            qb.push(column_sql(*column, in_measurement)?);
            qb.push(" ");
            qb.push(op.as_sql());
            qb.push(" ");
            push_literal(qb, value);
            qb.push(")");
        }
        Predicate::InSet { column, values } => {
            if values.is_empty() {
                qb.push("(1 = 0)");
                return Ok(());
            }
            qb.push("(");
            qb.push(column_sql(*column, in_measurement)?);
            qb.push(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_literal(qb, value);
            }
            qb.push("))");
        }
        Predicate::Measurement {
            measurement_ids,
            condition,
        } => {
            if in_measurement {
                return Err(Error::InvalidInput(
                    "measurement predicates cannot be nested".to_string(),
                ));
            }
            if measurement_ids.is_empty() {
                qb.push("(1 = 0)");
                return Ok(());
            }
            qb.push(
                "(EXISTS (SELECT 1 FROM object_measurements om \
                 JOIN measurements m ON m.measurement_id = om.measurement_id \
                 LEFT JOIN planes p ON p.plane_id = m.plane_id \
                 LEFT JOIN stacks s ON s.stack_id = p.stack_id \
                 WHERE om.object_id = o.object_id AND om.measurement_id IN (",
            );
            let mut ids = qb.separated(", ");
            for id in measurement_ids {
                ids.push_bind(*id);
            }
            qb.push(") AND ");
            push_node(qb, condition, true)?;
            qb.push("))");
        }
        Predicate::Filter { name, value } => {
            if in_measurement {
                return Err(Error::InvalidInput(
                    "filter predicates are not allowed inside a measurement condition".to_string(),
                ));
            }
            qb.push(
                "(EXISTS (SELECT 1 FROM object_filters f \
                 WHERE f.object_id = o.object_id AND f.object_filter_name = ",
            );
            qb.push_bind(name.clone());
            qb.push(" AND f.filter_value = ");
            qb.push_bind(i64::from(*value));
            qb.push("))");
        }
    }
    Ok(())
}

fn push_joined(
    qb: &mut QueryBuilder<'_, Sqlite>,
    parts: &[Predicate],
    separator: &str,
    empty: &str,
    in_measurement: bool,
) -> Result<()> {
    if parts.is_empty() {
        qb.push(empty.to_string());
        return Ok(());
    }
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(separator.to_string());
        }
        push_node(qb, part, in_measurement)?;
    }
    qb.push(")");
    Ok(())
}

fn column_sql(column: ColumnRef, in_measurement: bool) -> Result<&'static str> {
    match column {
        ColumnRef::Value | ColumnRef::ScaledValue if !in_measurement => Err(Error::InvalidInput(format!(
            "{:?} can only be compared inside a measurement predicate",
            column
        ))),
        ColumnRef::Value => Ok("om.value"),
        ColumnRef::ScaledValue => Ok(SCALED_VALUE_SQL),
        ColumnRef::ObjectId => Ok("o.object_id"),
        ColumnRef::ObjectType => Ok("o.object_type"),
        ColumnRef::ObjectNumber => Ok("o.object_number"),
        ColumnRef::ImageId => Ok("o.image_id"),
        ColumnRef::ConditionId => Ok("i.condition_id"),
    }
}

fn push_literal(qb: &mut QueryBuilder<'_, Sqlite>, value: &Literal) {
    match value {
        Literal::Int(v) => {
            qb.push_bind(*v);
        }
        Literal::Float(v) => {
            qb.push_bind(*v);
        }
        Literal::Text(v) => {
            qb.push_bind(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::CompareOp;

    fn lower(predicate: &Predicate) -> Result<String> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT o.object_id");
        qb.push(OBJECTS_FROM);
        qb.push("WHERE ");
        push_predicate(&mut qb, predicate)?;
        Ok(qb.sql().to_string())
    }

    #[test]
    fn test_object_type_compare_binds_literal() {
        let sql = lower(&Predicate::object_type("cell")).unwrap();
        assert!(sql.ends_with("WHERE (o.object_type = ?)"), "{}", sql);
    }

    #[test]
    fn test_measurement_threshold_uses_scaled_value() {
        let p = Predicate::measurement_threshold(vec![3, 4], CompareOp::Gt, 0.5);
        let sql = lower(&p).unwrap();
        assert!(sql.contains("om.measurement_id IN (?, ?)"), "{}", sql);
        assert!(sql.contains(SCALED_VALUE_SQL), "{}", sql);
    }

    #[test]
    fn test_value_outside_measurement_rejected() {
        let p = Predicate::compare(ColumnRef::Value, CompareOp::Gt, 1.0);
        assert!(matches!(lower(&p), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_nested_measurement_rejected() {
        let p = Predicate::Measurement {
            measurement_ids: vec![1],
            condition: Box::new(Predicate::has_measurement(vec![2])),
        };
        assert!(matches!(lower(&p), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_empty_or_is_false() {
        let sql = lower(&Predicate::Or(vec![])).unwrap();
        assert!(sql.ends_with("(1 = 0)"));
    }
}
