//! Measurement definitions and object measurement values

use crate::db::models::{MeasurementDefinition, ObjectMeasurement};
use crate::db::predicate_sql::push_predicate;
use crate::db::store::TabularStore;
use crate::matrix::AnnotatedMatrix;
use crate::measurement_index::MeasurementSelector;
use crate::predicate::Predicate;
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

const DEFINITION_SELECT: &str = "SELECT m.measurement_id, m.measurement_name, m.measurement_type, m.plane_id, \
     s.stack_name, p.channel_name, \
     COALESCE(s.stack_scale, 1.0) AS stack_scale, COALESCE(p.plane_scale, 1.0) AS plane_scale \
     FROM measurements m \
     LEFT JOIN planes p ON p.plane_id = m.plane_id \
     LEFT JOIN stacks s ON s.stack_id = p.stack_id ";

impl TabularStore {
    /// Id of the definition (name, type, plane), if registered
    pub async fn get_measurement_definition(
        &self,
        name: &str,
        measurement_type: &str,
        plane_id: Option<i64>,
    ) -> Result<Option<i64>> {
        let mut conn = self.pool().acquire().await?;
        find_definition_id(&mut *conn, name, measurement_type, plane_id).await
    }

    /// Register (name, type, plane) if absent and return its id
    ///
    /// Registering the same triple twice returns the same id and writes nothing.
    pub async fn register_measurement_definition(
        &self,
        name: &str,
        measurement_type: &str,
        plane_id: Option<i64>,
    ) -> Result<i64> {
        let mut conn = self.pool().acquire().await?;
        register_definition_on(&mut *conn, name, measurement_type, plane_id).await
    }

    /// Definitions by id, in the order given; unknown ids are `NotFound`
    pub async fn measurement_definitions_by_id(&self, ids: &[i64]) -> Result<Vec<MeasurementDefinition>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(DEFINITION_SELECT);
        qb.push("WHERE m.measurement_id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        qb.push(")");
        let found = qb
            .build_query_as::<MeasurementDefinition>()
            .fetch_all(self.pool())
            .await?;

        ids.iter()
            .map(|id| {
                found
                    .iter()
                    .find(|d| d.measurement_id == *id)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("measurement id {}", id)))
            })
            .collect()
    }

    /// Every definition matching the selector's open fields, ordered by id
    pub async fn find_measurement_definitions(
        &self,
        selector: &MeasurementSelector,
    ) -> Result<Vec<MeasurementDefinition>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(DEFINITION_SELECT);
        qb.push("WHERE 1 = 1");
        if let Some(name) = &selector.measurement_name {
            qb.push(" AND m.measurement_name = ");
            qb.push_bind(name.clone());
        }
        if let Some(mtype) = &selector.measurement_type {
            qb.push(" AND m.measurement_type = ");
            qb.push_bind(mtype.clone());
        }
        if let Some(stack) = &selector.stack {
            qb.push(" AND s.stack_name = ");
            qb.push_bind(stack.clone());
        }
        if let Some(channel) = &selector.channel {
            qb.push(" AND p.channel_name = ");
            qb.push_bind(channel.clone());
        }
        if let Some(object_type) = &selector.object_type {
            qb.push(
                " AND EXISTS (SELECT 1 FROM object_measurements om \
                 JOIN objects o ON o.object_id = om.object_id \
                 WHERE om.measurement_id = m.measurement_id AND o.object_type = ",
            );
            qb.push_bind(object_type.clone());
            qb.push(")");
        }
        qb.push(" ORDER BY m.measurement_id");

        let definitions = qb
            .build_query_as::<MeasurementDefinition>()
            .fetch_all(self.pool())
            .await?;
        debug!(selector = ?selector, found = definitions.len(), "Resolved measurement selector");
        Ok(definitions)
    }

    /// Annotated matrix of `definitions` for every object matching `objects`
    ///
    /// Values are raw; call [`AnnotatedMatrix::scaled`] for calibrated values.
    pub async fn get_measurements(
        &self,
        objects: &Predicate,
        definitions: &[MeasurementDefinition],
    ) -> Result<AnnotatedMatrix> {
        let rows = self.query_objects(objects).await?;
        let mut matrix = AnnotatedMatrix::new(rows, definitions.to_vec());
        if matrix.is_empty() || definitions.is_empty() {
            return Ok(matrix);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT v.object_id, v.measurement_id, v.value FROM object_measurements v \
             JOIN objects o ON o.object_id = v.object_id \
             LEFT JOIN images i ON i.image_id = o.image_id \
             WHERE v.measurement_id IN (",
        );
        let mut sep = qb.separated(", ");
        for d in definitions {
            sep.push_bind(d.measurement_id);
        }
        qb.push(") AND ");
        push_predicate(&mut qb, objects)?;

        let values: Vec<(i64, i64, Option<f64>)> = qb.build_query_as().fetch_all(self.pool()).await?;
        for (object_id, measurement_id, value) in values {
            if let (Some(row), Some(col)) = (matrix.row_of(object_id), matrix.column_of(measurement_id)) {
                matrix.set(row, col, value);
            }
        }
        Ok(matrix)
    }

    /// Bulk write of object measurement rows in one transaction
    ///
    /// `replace = true` overwrites existing (object, measurement) values;
    /// otherwise an existing value is a `Conflict`.
    pub async fn write_object_measurements(&self, rows: &[ObjectMeasurement], replace: bool) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        write_values_on(&mut *tx, rows, replace).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete every stored value of the given definitions
    pub async fn delete_object_measurements(&self, measurement_ids: &[i64]) -> Result<u64> {
        let mut conn = self.pool().acquire().await?;
        delete_values_on(&mut *conn, measurement_ids).await
    }

    /// Ensure a stack exists and return its id; an existing stack keeps its scale
    pub async fn ensure_stack(&self, stack_name: &str, stack_scale: f64) -> Result<i64> {
        let mut conn = self.pool().acquire().await?;
        ensure_stack_on(&mut *conn, stack_name, stack_scale).await
    }

    /// Ensure a plane exists within a stack and return its id
    pub async fn ensure_plane(&self, stack_id: i64, channel_name: &str, plane_scale: f64) -> Result<i64> {
        let mut conn = self.pool().acquire().await?;
        ensure_plane_on(&mut *conn, stack_id, channel_name, plane_scale).await
    }
}

pub(crate) async fn find_definition_id(
    conn: &mut SqliteConnection,
    name: &str,
    measurement_type: &str,
    plane_id: Option<i64>,
) -> Result<Option<i64>> {
    // `IS` so a NULL plane matches a NULL plane
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT measurement_id FROM measurements \
         WHERE measurement_name = ? AND measurement_type = ? AND plane_id IS ?",
    )
    .bind(name)
    .bind(measurement_type)
    .bind(plane_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Register-if-absent on an open connection or transaction
pub async fn register_definition_on(
    conn: &mut SqliteConnection,
    name: &str,
    measurement_type: &str,
    plane_id: Option<i64>,
) -> Result<i64> {
    if let Some(id) = find_definition_id(conn, name, measurement_type, plane_id).await? {
        return Ok(id);
    }

    sqlx::query("INSERT OR IGNORE INTO measurements (measurement_name, measurement_type, plane_id) VALUES (?, ?, ?)")
        .bind(name)
        .bind(measurement_type)
        .bind(plane_id)
        .execute(&mut *conn)
        .await?;

    let id = find_definition_id(conn, name, measurement_type, plane_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("measurement {} ({}) after insert", name, measurement_type)))?;
    debug!(measurement_id = id, name, measurement_type, ?plane_id, "Registered measurement definition");
    Ok(id)
}

/// Insert measurement rows on an open connection or transaction
pub async fn write_values_on(conn: &mut SqliteConnection, rows: &[ObjectMeasurement], replace: bool) -> Result<()> {
    let sql = if replace {
        "INSERT OR REPLACE INTO object_measurements (object_id, measurement_id, value) VALUES (?, ?, ?)"
    } else {
        "INSERT INTO object_measurements (object_id, measurement_id, value) VALUES (?, ?, ?)"
    };
    for row in rows {
        sqlx::query(sql)
            .bind(row.object_id)
            .bind(row.measurement_id)
            .bind(row.value.filter(|v| !v.is_nan()))
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::conflict_on_unique(e, format!("object {} measurement {}", row.object_id, row.measurement_id)))?;
    }
    Ok(())
}

/// Delete all values of the given definitions on an open connection or transaction
pub async fn delete_values_on(conn: &mut SqliteConnection, measurement_ids: &[i64]) -> Result<u64> {
    if measurement_ids.is_empty() {
        return Ok(0);
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM object_measurements WHERE measurement_id IN (");
    let mut sep = qb.separated(", ");
    for id in measurement_ids {
        sep.push_bind(*id);
    }
    qb.push(")");
    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub async fn ensure_stack_on(conn: &mut SqliteConnection, stack_name: &str, stack_scale: f64) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO stacks (stack_name, stack_scale) VALUES (?, ?)")
        .bind(stack_name)
        .bind(stack_scale)
        .execute(&mut *conn)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT stack_id FROM stacks WHERE stack_name = ?")
        .bind(stack_name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn ensure_plane_on(
    conn: &mut SqliteConnection,
    stack_id: i64,
    channel_name: &str,
    plane_scale: f64,
) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO planes (stack_id, channel_name, plane_scale) VALUES (?, ?, ?)")
        .bind(stack_id)
        .bind(channel_name)
        .bind(plane_scale)
        .execute(&mut *conn)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT plane_id FROM planes WHERE stack_id = ? AND channel_name = ?")
        .bind(stack_id)
        .bind(channel_name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}
