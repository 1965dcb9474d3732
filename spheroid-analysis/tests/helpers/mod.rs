//! Test Helper Utilities
//!
//! In-memory experiment builder shared by the integration tests

#![allow(dead_code)]

use spheroid_common::config::Config;
use spheroid_common::db::{init_in_memory, Condition, ObjectMeasurement, TabularStore};
use spheroid_common::db::relations::insert_relation_on;
use spheroid_common::db::ObjectRelation;

pub const OBJECT_TYPE: &str = "cell";
pub const INTENSITY: &str = "MeanIntensity";
pub const INTENSITY_TYPE: &str = "Intensity";

/// Experiment store plus shorthand for seeding it
pub struct Fixture {
    pub store: TabularStore,
}

impl Fixture {
    pub async fn new() -> Self {
        let pool = init_in_memory().await.expect("in-memory database");
        Self {
            store: TabularStore::new(pool),
        }
    }

    pub async fn image(&self, image_id: i64, site_id: i64, plate_id: i64, sample_block: i64) {
        self.store
            .upsert_image(image_id, site_id, plate_id, sample_block)
            .await
            .unwrap();
    }

    pub async fn condition(&self, condition_id: i64, name: &str, barcode: &str, plate_id: i64, sample_block: i64) {
        self.store
            .upsert_condition(&Condition {
                condition_id,
                condition_name: name.to_string(),
                time_point: Some("24h".to_string()),
                barcode: barcode.to_string(),
                plate_id,
                sample_block,
                well_row: None,
                well_col: None,
            })
            .await
            .unwrap();
    }

    /// MeanIntensity/Intensity definition on `stack`/`channel`
    pub async fn intensity(&self, stack: &str, stack_scale: f64, channel: &str, plane_scale: f64) -> i64 {
        let stack_id = self.store.ensure_stack(stack, stack_scale).await.unwrap();
        let plane_id = self.store.ensure_plane(stack_id, channel, plane_scale).await.unwrap();
        self.store
            .register_measurement_definition(INTENSITY, INTENSITY_TYPE, Some(plane_id))
            .await
            .unwrap()
    }

    pub async fn object(&self, image_id: i64, object_number: i64) -> i64 {
        self.object_of_type(image_id, OBJECT_TYPE, object_number).await
    }

    pub async fn object_of_type(&self, image_id: i64, object_type: &str, object_number: i64) -> i64 {
        self.store
            .ensure_object(image_id, object_type, object_number)
            .await
            .unwrap()
            .object_id
    }

    pub async fn set(&self, object_id: i64, measurement_id: i64, value: f64) {
        self.store
            .write_object_measurements(
                &[ObjectMeasurement {
                    object_id,
                    measurement_id,
                    value: Some(value),
                }],
                true,
            )
            .await
            .unwrap();
    }

    pub async fn relate(&self, relation_type: &str, parent: i64, child: i64) {
        let mut conn = self.store.pool().acquire().await.unwrap();
        insert_relation_on(
            &mut *conn,
            &ObjectRelation {
                relation_type: relation_type.to_string(),
                object_id_parent: parent,
                object_id_child: child,
            },
        )
        .await
        .unwrap();
    }

    /// Stored value of one (object, measurement), `None` when absent or NULL
    pub async fn stored_value(&self, object_id: i64, measurement_id: i64) -> Option<f64> {
        let value: Option<Option<f64>> = sqlx::query_scalar(
            "SELECT value FROM object_measurements WHERE object_id = ? AND measurement_id = ?",
        )
        .bind(object_id)
        .bind(measurement_id)
        .fetch_optional(self.store.pool())
        .await
        .unwrap();
        value.flatten()
    }

    pub async fn row_count(&self, measurement_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM object_measurements WHERE measurement_id = ?")
            .bind(measurement_id)
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }
}

/// Config for a two-channel barcode experiment on `cell` objects
pub fn experiment_config() -> Config {
    let mut config = Config::default();
    config.defaults.object_type = Some(OBJECT_TYPE.to_string());
    config.barcode.channels = vec!["Pd102".to_string(), "Pd104".to_string()];
    config.sphere.channel = Some("Ir191".to_string());
    config.sphere.other_channels = vec!["Ir193".to_string()];
    config
}
