//! Database initialization
//!
//! Creates the experiment schema on first open; every statement is
//! idempotent so opening an existing database is a no-op.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Pool size for file databases
pub const MAX_CONNECTIONS: u32 = 4;

/// Open (creating if missing) the experiment database and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    // Stages run one after another; WAL lets readers overlap the single writer
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema
///
/// Pinned to a single connection that never expires: every pooled
/// connection to `sqlite::memory:` would otherwise see its own empty database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and index if missing
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_stacks_table(pool).await?;
    create_planes_table(pool).await?;
    create_conditions_table(pool).await?;
    create_images_table(pool).await?;
    create_objects_table(pool).await?;
    create_measurements_table(pool).await?;
    create_object_measurements_table(pool).await?;
    create_object_filters_table(pool).await?;
    create_object_relations_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    info!(version = SCHEMA_VERSION, "Database schema ready");
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Named channel groups sharing a processing lineage
async fn create_stacks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stacks (
            stack_id INTEGER PRIMARY KEY,
            stack_name TEXT NOT NULL UNIQUE,
            stack_scale REAL NOT NULL DEFAULT 1.0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_planes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS planes (
            plane_id INTEGER PRIMARY KEY,
            stack_id INTEGER NOT NULL REFERENCES stacks(stack_id),
            channel_name TEXT NOT NULL,
            plane_scale REAL NOT NULL DEFAULT 1.0,
            UNIQUE (stack_id, channel_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_conditions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conditions (
            condition_id INTEGER PRIMARY KEY,
            condition_name TEXT NOT NULL,
            time_point TEXT,
            barcode TEXT NOT NULL,
            plate_id INTEGER NOT NULL DEFAULT 0,
            sample_block INTEGER NOT NULL DEFAULT 0,
            well_row INTEGER,
            well_col INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Images; `condition_id` and the `bc_*` columns stay NULL until debarcoded
async fn create_images_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            image_id INTEGER PRIMARY KEY,
            site_id INTEGER NOT NULL DEFAULT 0,
            plate_id INTEGER NOT NULL DEFAULT 0,
            sample_block INTEGER NOT NULL DEFAULT 0,
            condition_id INTEGER REFERENCES conditions(condition_id),
            bc_highest_count INTEGER,
            bc_second_count INTEGER,
            bc_invalid INTEGER,
            bc_valid INTEGER,
            bc_depth REAL,
            debarcoded_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_objects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS objects (
            object_id INTEGER PRIMARY KEY,
            image_id INTEGER NOT NULL REFERENCES images(image_id),
            object_type TEXT NOT NULL,
            object_number INTEGER NOT NULL,
            UNIQUE (image_id, object_type, object_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_type ON objects(object_type)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Measurement definitions; unique on (name, type, plane) with NULL plane
/// treated as a value of its own
async fn create_measurements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            measurement_id INTEGER PRIMARY KEY,
            measurement_name TEXT NOT NULL,
            measurement_type TEXT NOT NULL,
            plane_id INTEGER REFERENCES planes(plane_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_measurements_unique
        ON measurements(measurement_name, measurement_type, COALESCE(plane_id, -1))
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_object_measurements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_measurements (
            object_id INTEGER NOT NULL REFERENCES objects(object_id),
            measurement_id INTEGER NOT NULL REFERENCES measurements(measurement_id),
            value REAL,
            PRIMARY KEY (object_id, measurement_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_object_measurements_measurement ON object_measurements(measurement_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_object_filters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_filters (
            object_filter_name TEXT NOT NULL,
            object_id INTEGER NOT NULL REFERENCES objects(object_id),
            filter_value INTEGER NOT NULL CHECK (filter_value IN (0, 1)),
            PRIMARY KEY (object_filter_name, object_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_object_relations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_relations (
            relation_type TEXT NOT NULL,
            object_id_parent INTEGER NOT NULL REFERENCES objects(object_id),
            object_id_child INTEGER NOT NULL REFERENCES objects(object_id),
            PRIMARY KEY (relation_type, object_id_parent, object_id_child)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
