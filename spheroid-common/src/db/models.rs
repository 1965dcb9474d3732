//! Database models

use serde::{Deserialize, Serialize};

/// One acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Image {
    pub image_id: i64,
    pub site_id: i64,
    pub plate_id: i64,
    pub sample_block: i64,
    pub condition_id: Option<i64>,
    pub bc_highest_count: Option<i64>,
    pub bc_second_count: Option<i64>,
    pub bc_invalid: Option<i64>,
    pub bc_valid: Option<i64>,
    pub bc_depth: Option<f64>,
    pub debarcoded_at: Option<String>,
}

/// Segmented entity within an image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObjectRecord {
    pub object_id: i64,
    pub image_id: i64,
    pub object_type: String,
    pub object_number: i64,
}

/// Measurement definition joined with its plane and stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MeasurementDefinition {
    pub measurement_id: i64,
    pub measurement_name: String,
    pub measurement_type: String,
    pub plane_id: Option<i64>,
    pub stack_name: Option<String>,
    pub channel_name: Option<String>,
    pub stack_scale: f64,
    pub plane_scale: f64,
}

impl MeasurementDefinition {
    /// Calibration factor applied when scaling values of this definition
    pub fn scale(&self) -> f64 {
        self.stack_scale * self.plane_scale
    }

    /// Human-readable label used in logs and error messages
    pub fn label(&self) -> String {
        match (&self.stack_name, &self.channel_name) {
            (Some(stack), Some(channel)) => format!(
                "{}/{} {} ({})",
                stack, channel, self.measurement_name, self.measurement_type
            ),
            _ => format!("{} ({})", self.measurement_name, self.measurement_type),
        }
    }
}

/// Value of one definition for one object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeasurement {
    pub object_id: i64,
    pub measurement_id: i64,
    pub value: Option<f64>,
}

/// Experimental condition (well)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Condition {
    pub condition_id: i64,
    pub condition_name: String,
    pub time_point: Option<String>,
    pub barcode: String,
    pub plate_id: i64,
    pub sample_block: i64,
    pub well_row: Option<i64>,
    pub well_col: Option<i64>,
}

/// Directed relation edge between two objects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObjectRelation {
    pub relation_type: String,
    pub object_id_parent: i64,
    pub object_id_child: i64,
}

/// One stored row of a named object filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFilterRow {
    pub object_id: i64,
    pub value: bool,
}

/// Entities with integer primary keys allocated by [`crate::db::TabularStore::next_ids`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Image,
    Object,
    Measurement,
    Condition,
    Stack,
    Plane,
}

impl Entity {
    pub(crate) fn table_and_key(self) -> (&'static str, &'static str) {
        match self {
            Entity::Image => ("images", "image_id"),
            Entity::Object => ("objects", "object_id"),
            Entity::Measurement => ("measurements", "measurement_id"),
            Entity::Condition => ("conditions", "condition_id"),
            Entity::Stack => ("stacks", "stack_id"),
            Entity::Plane => ("planes", "plane_id"),
        }
    }
}

/// Per-image debarcoding result written back to `images`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBarcodeStats {
    pub image_id: i64,
    pub condition_id: Option<i64>,
    pub bc_highest_count: i64,
    pub bc_second_count: i64,
    pub bc_invalid: i64,
    pub bc_valid: i64,
}

/// Per-condition aggregate over debarcoded images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConditionImageStats {
    pub condition_id: i64,
    pub condition_name: String,
    pub time_point: Option<String>,
    pub images: i64,
    pub mean_highest_count: Option<f64>,
    pub mean_second_count: Option<f64>,
    pub mean_invalid: Option<f64>,
    pub mean_valid: Option<f64>,
}
