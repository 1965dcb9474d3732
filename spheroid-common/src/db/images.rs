//! Images, conditions and the debarcoding columns

use crate::db::models::{Condition, ConditionImageStats, Image, ImageBarcodeStats, ObjectRecord};
use crate::db::predicate_sql::{push_predicate, OBJECTS_FROM};
use crate::db::store::TabularStore;
use crate::predicate::Predicate;
use crate::Result;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

const IMAGE_SELECT: &str = "SELECT image_id, site_id, plate_id, sample_block, condition_id, \
     bc_highest_count, bc_second_count, bc_invalid, bc_valid, bc_depth, debarcoded_at FROM images";

impl TabularStore {
    pub async fn list_images(&self) -> Result<Vec<Image>> {
        let images = sqlx::query_as::<_, Image>(&format!("{} ORDER BY image_id", IMAGE_SELECT))
            .fetch_all(self.pool())
            .await?;
        Ok(images)
    }

    pub async fn get_image(&self, image_id: i64) -> Result<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(&format!("{} WHERE image_id = ?", IMAGE_SELECT))
            .bind(image_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(image)
    }

    /// Number of images with a resolved condition
    pub async fn count_debarcoded_images(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE condition_id IS NOT NULL")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Conditions sharing one (plate, sample block) barcode key space
    pub async fn conditions_for_block(&self, plate_id: i64, sample_block: i64) -> Result<Vec<Condition>> {
        let conditions = sqlx::query_as::<_, Condition>(
            "SELECT condition_id, condition_name, time_point, barcode, plate_id, sample_block, well_row, well_col \
             FROM conditions WHERE plate_id = ? AND sample_block = ? ORDER BY condition_id",
        )
        .bind(plate_id)
        .bind(sample_block)
        .fetch_all(self.pool())
        .await?;
        Ok(conditions)
    }

    /// Image count and mean barcode counters per resolved condition
    pub async fn condition_image_stats(&self) -> Result<Vec<ConditionImageStats>> {
        let stats = sqlx::query_as::<_, ConditionImageStats>(
            r#"
            SELECT
                c.condition_id,
                c.condition_name,
                c.time_point,
                COUNT(i.image_id) AS images,
                AVG(i.bc_highest_count) AS mean_highest_count,
                AVG(i.bc_second_count) AS mean_second_count,
                AVG(i.bc_invalid) AS mean_invalid,
                AVG(i.bc_valid) AS mean_valid
            FROM images i
            JOIN conditions c ON c.condition_id = i.condition_id
            GROUP BY c.condition_id, c.condition_name, c.time_point
            ORDER BY c.condition_id
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(stats)
    }

    /// `(condition_id, objects)` for objects matching `predicate` on debarcoded images
    pub async fn count_objects_by_condition(&self, predicate: &Predicate) -> Result<Vec<(i64, i64)>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT i.condition_id, COUNT(*)");
        qb.push(OBJECTS_FROM);
        qb.push("WHERE i.condition_id IS NOT NULL AND ");
        push_predicate(&mut qb, predicate)?;
        qb.push(" GROUP BY i.condition_id ORDER BY i.condition_id");

        let counts: Vec<(i64, i64)> = qb.build_query_as().fetch_all(self.pool()).await?;
        Ok(counts)
    }

    /// Insert or update an image row (condition and barcode columns untouched)
    pub async fn upsert_image(&self, image_id: i64, site_id: i64, plate_id: i64, sample_block: i64) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        upsert_image_on(&mut *conn, image_id, site_id, plate_id, sample_block).await
    }

    pub async fn upsert_condition(&self, condition: &Condition) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        upsert_condition_on(&mut *conn, condition).await
    }

    /// Register an object if absent and return its id
    pub async fn ensure_object(&self, image_id: i64, object_type: &str, object_number: i64) -> Result<ObjectRecord> {
        let mut conn = self.pool().acquire().await?;
        ensure_object_on(&mut *conn, image_id, object_type, object_number).await
    }
}

pub async fn upsert_image_on(
    conn: &mut SqliteConnection,
    image_id: i64,
    site_id: i64,
    plate_id: i64,
    sample_block: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO images (image_id, site_id, plate_id, sample_block)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(image_id) DO UPDATE SET
            site_id = excluded.site_id,
            plate_id = excluded.plate_id,
            sample_block = excluded.sample_block
        "#,
    )
    .bind(image_id)
    .bind(site_id)
    .bind(plate_id)
    .bind(sample_block)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn upsert_condition_on(conn: &mut SqliteConnection, condition: &Condition) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO conditions (
            condition_id, condition_name, time_point, barcode, plate_id, sample_block, well_row, well_col
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(condition_id) DO UPDATE SET
            condition_name = excluded.condition_name,
            time_point = excluded.time_point,
            barcode = excluded.barcode,
            plate_id = excluded.plate_id,
            sample_block = excluded.sample_block,
            well_row = excluded.well_row,
            well_col = excluded.well_col
        "#,
    )
    .bind(condition.condition_id)
    .bind(&condition.condition_name)
    .bind(&condition.time_point)
    .bind(&condition.barcode)
    .bind(condition.plate_id)
    .bind(condition.sample_block)
    .bind(condition.well_row)
    .bind(condition.well_col)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn ensure_object_on(
    conn: &mut SqliteConnection,
    image_id: i64,
    object_type: &str,
    object_number: i64,
) -> Result<ObjectRecord> {
    sqlx::query("INSERT OR IGNORE INTO objects (image_id, object_type, object_number) VALUES (?, ?, ?)")
        .bind(image_id)
        .bind(object_type)
        .bind(object_number)
        .execute(&mut *conn)
        .await?;
    let object = sqlx::query_as::<_, ObjectRecord>(
        "SELECT object_id, image_id, object_type, object_number FROM objects \
         WHERE image_id = ? AND object_type = ? AND object_number = ?",
    )
    .bind(image_id)
    .bind(object_type)
    .bind(object_number)
    .fetch_one(&mut *conn)
    .await?;
    Ok(object)
}

/// Clear condition and barcode columns of every image
pub async fn reset_debarcoding_on(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE images SET
            condition_id = NULL,
            bc_highest_count = NULL,
            bc_second_count = NULL,
            bc_invalid = NULL,
            bc_valid = NULL,
            bc_depth = NULL,
            debarcoded_at = NULL
        "#,
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Write one image's debarcoding result
pub async fn write_image_barcode_on(
    conn: &mut SqliteConnection,
    stats: &ImageBarcodeStats,
    depth: Option<f64>,
    debarcoded_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE images SET
            condition_id = ?,
            bc_highest_count = ?,
            bc_second_count = ?,
            bc_invalid = ?,
            bc_valid = ?,
            bc_depth = ?,
            debarcoded_at = ?
        WHERE image_id = ?
        "#,
    )
    .bind(stats.condition_id)
    .bind(stats.bc_highest_count)
    .bind(stats.bc_second_count)
    .bind(stats.bc_invalid)
    .bind(stats.bc_valid)
    .bind(depth)
    .bind(debarcoded_at)
    .bind(stats.image_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
