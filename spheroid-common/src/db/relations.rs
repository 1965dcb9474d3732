//! Object relation edges (neighbor adjacency)

use crate::db::models::ObjectRelation;
use crate::db::store::TabularStore;
use crate::Result;
use sqlx::SqliteConnection;

impl TabularStore {
    /// Edges of `relation_type`, optionally restricted to edges whose two
    /// endpoints are both of `object_type`
    pub async fn relations(&self, relation_type: &str, object_type: Option<&str>) -> Result<Vec<ObjectRelation>> {
        let edges = match object_type {
            Some(object_type) => {
                sqlx::query_as::<_, ObjectRelation>(
                    r#"
                    SELECT r.relation_type, r.object_id_parent, r.object_id_child
                    FROM object_relations r
                    JOIN objects op ON op.object_id = r.object_id_parent
                    JOIN objects oc ON oc.object_id = r.object_id_child
                    WHERE r.relation_type = ? AND op.object_type = ? AND oc.object_type = ?
                    ORDER BY r.object_id_parent, r.object_id_child
                    "#,
                )
                .bind(relation_type)
                .bind(object_type)
                .bind(object_type)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, ObjectRelation>(
                    "SELECT relation_type, object_id_parent, object_id_child FROM object_relations \
                     WHERE relation_type = ? ORDER BY object_id_parent, object_id_child",
                )
                .bind(relation_type)
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(edges)
    }

    pub async fn relation_types(&self) -> Result<Vec<String>> {
        let types: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT relation_type FROM object_relations ORDER BY relation_type")
                .fetch_all(self.pool())
                .await?;
        Ok(types)
    }
}

pub async fn insert_relation_on(conn: &mut SqliteConnection, relation: &ObjectRelation) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO object_relations (relation_type, object_id_parent, object_id_child) VALUES (?, ?, ?)",
    )
    .bind(&relation.relation_type)
    .bind(relation.object_id_parent)
    .bind(relation.object_id_child)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
