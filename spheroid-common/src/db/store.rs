//! Tabular store: typed repository over the experiment database
//!
//! Reads go through the pool. Writes that must be atomic open one
//! transaction and run every statement on that connection; nothing inside a
//! transaction touches the pool again.

use crate::db::models::{Entity, ObjectRecord};
use crate::db::predicate_sql::{push_predicate, OBJECTS_FROM};
use crate::predicate::Predicate;
use crate::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Handle to the experiment database
#[derive(Debug, Clone)]
pub struct TabularStore {
    pool: SqlitePool,
}

impl TabularStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Objects matching `predicate`, ordered by object id
    pub async fn query_objects(&self, predicate: &Predicate) -> Result<Vec<ObjectRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT o.object_id, o.image_id, o.object_type, o.object_number");
        qb.push(OBJECTS_FROM);
        qb.push("WHERE ");
        push_predicate(&mut qb, predicate)?;
        qb.push(" ORDER BY o.object_id");

        let objects = qb
            .build_query_as::<ObjectRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(objects)
    }

    /// Ids of objects matching `predicate`, ascending
    pub async fn query_object_ids(&self, predicate: &Predicate) -> Result<Vec<i64>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT o.object_id");
        qb.push(OBJECTS_FROM);
        qb.push("WHERE ");
        push_predicate(&mut qb, predicate)?;
        qb.push(" ORDER BY o.object_id");

        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Allocate `count` fresh primary keys for `entity`
    ///
    /// Keys continue after the current maximum. Single-writer use only: two
    /// callers allocating concurrently would receive the same keys.
    pub async fn next_ids(&self, entity: Entity, count: usize) -> Result<Vec<i64>> {
        let (table, key) = entity.table_and_key();
        let max: Option<i64> = sqlx::query_scalar(&format!("SELECT MAX({}) FROM {}", key, table))
            .fetch_one(&self.pool)
            .await?;
        let start = max.unwrap_or(0) + 1;
        Ok((start..start + count as i64).collect())
    }

    pub async fn count_objects(&self, predicate: &Predicate) -> Result<i64> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*)");
        qb.push(OBJECTS_FROM);
        qb.push("WHERE ");
        push_predicate(&mut qb, predicate)?;

        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_in_memory;
    use crate::predicate::{ColumnRef, CompareOp};

    async fn seeded_store() -> TabularStore {
        let pool = init_in_memory().await.unwrap();
        sqlx::query("INSERT INTO images (image_id, site_id, plate_id) VALUES (1, 1, 1), (2, 1, 1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO objects (object_id, image_id, object_type, object_number) VALUES \
             (1, 1, 'cell', 1), (2, 1, 'cell', 2), (3, 2, 'sphere', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();
        TabularStore::new(pool)
    }

    #[tokio::test]
    async fn test_query_objects_by_type() {
        let store = seeded_store().await;
        let cells = store.query_objects(&Predicate::object_type("cell")).await.unwrap();
        assert_eq!(cells.iter().map(|o| o.object_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_query_object_ids_with_or_and_not() {
        let store = seeded_store().await;
        let p = Predicate::object_type("sphere")
            .or(Predicate::compare(ColumnRef::ObjectNumber, CompareOp::Eq, 2i64))
            .and(Predicate::compare(ColumnRef::ImageId, CompareOp::Eq, 1i64).negate());
        let ids = store.query_object_ids(&p).await.unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn test_next_ids_continue_after_max() {
        let store = seeded_store().await;
        assert_eq!(store.next_ids(Entity::Object, 3).await.unwrap(), vec![4, 5, 6]);
        assert_eq!(store.next_ids(Entity::Condition, 2).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_count_objects() {
        let store = seeded_store().await;
        assert_eq!(store.count_objects(&Predicate::All).await.unwrap(), 3);
    }
}
