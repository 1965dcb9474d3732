//! Condition-stratified summary of a debarcoded experiment

use serde::Serialize;
use spheroid_common::db::TabularStore;
use spheroid_common::{Error, Predicate, Result};
use std::collections::HashMap;
use tracing::info;

/// One resolved condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionSummary {
    pub condition_id: i64,
    pub condition_name: String,
    pub time_point: Option<String>,
    pub images: i64,
    /// Objects on the condition's images (after the object type and filter)
    pub objects: i64,
    pub mean_highest_count: Option<f64>,
    pub mean_second_count: Option<f64>,
    pub mean_invalid: Option<f64>,
    pub mean_valid: Option<f64>,
}

/// Per-condition image and object counts
///
/// Fails with `Precondition` until debarcoding has resolved at least one image.
pub async fn condition_summary(
    store: &TabularStore,
    object_type: Option<&str>,
    filter: Option<&str>,
) -> Result<Vec<ConditionSummary>> {
    if store.count_debarcoded_images().await? == 0 {
        return Err(Error::Precondition(
            "no image has a condition; run debarcoding first".to_string(),
        ));
    }

    let mut objects = Predicate::All;
    if let Some(object_type) = object_type {
        objects = objects.and(Predicate::object_type(object_type));
    }
    if let Some(filter) = filter {
        objects = objects.and(Predicate::filter(filter, true));
    }
    let counts: HashMap<i64, i64> = store
        .count_objects_by_condition(&objects)
        .await?
        .into_iter()
        .collect();

    let summary: Vec<ConditionSummary> = store
        .condition_image_stats()
        .await?
        .into_iter()
        .map(|s| ConditionSummary {
            objects: counts.get(&s.condition_id).copied().unwrap_or(0),
            condition_id: s.condition_id,
            condition_name: s.condition_name,
            time_point: s.time_point,
            images: s.images,
            mean_highest_count: s.mean_highest_count,
            mean_second_count: s.mean_second_count,
            mean_invalid: s.mean_invalid,
            mean_valid: s.mean_valid,
        })
        .collect();

    info!(conditions = summary.len(), filter = ?filter, "Condition summary");
    Ok(summary)
}
