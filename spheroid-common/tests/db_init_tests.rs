//! Database creation on first open and reopening an existing experiment

use spheroid_common::db::{init_database, TabularStore, MAX_CONNECTIONS, SCHEMA_VERSION};
use spheroid_common::Predicate;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_created_with_parent_directories() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("experiment.db");
    assert!(!db_path.exists());

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_reopen_keeps_data() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("experiment.db");

    {
        let store = TabularStore::new(init_database(&db_path).await.unwrap());
        store.upsert_image(1, 1, 1, 0).await.unwrap();
        store.ensure_object(1, "cell", 1).await.unwrap();
        store.pool().close().await;
    }

    let store = TabularStore::new(init_database(&db_path).await.unwrap());
    assert_eq!(store.count_objects(&Predicate::All).await.unwrap(), 1);
    assert_eq!(store.list_images().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pool_reads_while_a_write_is_open() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("experiment.db")).await.unwrap();
    assert_eq!(pool.options().get_max_connections(), MAX_CONNECTIONS);

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&pool).await.unwrap();
    assert_eq!(mode, "wal");

    let store = TabularStore::new(pool.clone());
    store.upsert_image(1, 1, 1, 0).await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    sqlx::query("INSERT INTO images (image_id, site_id, plate_id, sample_block) VALUES (2, 2, 1, 0)")
        .execute(&mut *tx)
        .await
        .unwrap();
    // Another pooled connection still sees the last committed state
    assert_eq!(store.list_images().await.unwrap().len(), 1);
    tx.commit().await.unwrap();
    assert_eq!(store.list_images().await.unwrap().len(), 2);
}
