//! Named object filters

use crate::db::models::ObjectFilterRow;
use crate::db::store::TabularStore;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use tracing::debug;

impl TabularStore {
    /// Persist rows of filter `name` in one transaction
    ///
    /// With `drop = true` every prior row of `name` is deleted first. With
    /// `drop = false` prior rows stay and a row for an object that already
    /// has one is a `Conflict` (nothing of the batch is written).
    pub async fn write_object_filter(&self, name: &str, rows: &[ObjectFilterRow], drop: bool) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        if drop {
            let removed = delete_filter_on(&mut *tx, name).await?;
            debug!(filter = name, removed, "Dropped previous filter rows");
        }
        for row in rows {
            sqlx::query("INSERT INTO object_filters (object_filter_name, object_id, filter_value) VALUES (?, ?, ?)")
                .bind(name)
                .bind(row.object_id)
                .bind(i64::from(row.value))
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::conflict_on_unique(e, format!("filter '{}' object {}", name, row.object_id)))?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    /// Stored rows of filter `name`, ordered by object id
    pub async fn read_object_filter(&self, name: &str) -> Result<Vec<ObjectFilterRow>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT object_id, filter_value FROM object_filters WHERE object_filter_name = ? ORDER BY object_id",
        )
        .bind(name)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(object_id, value)| ObjectFilterRow {
                object_id,
                value: value != 0,
            })
            .collect())
    }

    pub async fn list_filter_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT object_filter_name FROM object_filters ORDER BY object_filter_name")
                .fetch_all(self.pool())
                .await?;
        Ok(names)
    }

    pub async fn delete_object_filter(&self, name: &str) -> Result<u64> {
        let mut conn = self.pool().acquire().await?;
        delete_filter_on(&mut *conn, name).await
    }
}

async fn delete_filter_on(conn: &mut SqliteConnection, name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM object_filters WHERE object_filter_name = ?")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
