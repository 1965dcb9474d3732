//! CSV ingest of segmentation pipeline exports
//!
//! Expected files in an export directory (each optional, loaded in this order):
//! - `conditions.csv`: condition_id, condition_name, time_point, barcode,
//!   plate_id, sample_block, well_row, well_col
//! - `images.csv`: image_id, site_id, plate_id, sample_block
//! - `measurements.csv` (long format): image_id, object_type, object_number,
//!   stack, channel, measurement_name, measurement_type, value, stack_scale,
//!   plane_scale
//! - `relations.csv`: relation_type, image_id, object_type,
//!   object_number_parent, object_number_child
//!
//! Each file is loaded in one transaction. Stacks, planes, objects and
//! measurement definitions are registered when absent; existing values are
//! overwritten, so loading the same export twice changes nothing.

use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use spheroid_common::db::images::{ensure_object_on, upsert_condition_on, upsert_image_on};
use spheroid_common::db::measurements::{ensure_plane_on, ensure_stack_on, register_definition_on, write_values_on};
use spheroid_common::db::relations::insert_relation_on;
use spheroid_common::db::{Condition, ObjectMeasurement, ObjectRelation, TabularStore};
use spheroid_common::{Error, Result};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

pub const CONDITIONS_FILE: &str = "conditions.csv";
pub const IMAGES_FILE: &str = "images.csv";
pub const MEASUREMENTS_FILE: &str = "measurements.csv";
pub const RELATIONS_FILE: &str = "relations.csv";

#[derive(Debug, Deserialize)]
struct ConditionRow {
    condition_id: i64,
    condition_name: String,
    #[serde(default)]
    time_point: Option<String>,
    barcode: String,
    #[serde(default)]
    plate_id: Option<i64>,
    #[serde(default)]
    sample_block: Option<i64>,
    #[serde(default)]
    well_row: Option<i64>,
    #[serde(default)]
    well_col: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    image_id: i64,
    #[serde(default)]
    site_id: Option<i64>,
    #[serde(default)]
    plate_id: Option<i64>,
    #[serde(default)]
    sample_block: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MeasurementRow {
    image_id: i64,
    object_type: String,
    object_number: i64,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    measurement_name: String,
    measurement_type: String,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    stack_scale: Option<f64>,
    #[serde(default)]
    plane_scale: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RelationRow {
    relation_type: String,
    image_id: i64,
    object_type: String,
    object_number_parent: i64,
    object_number_child: i64,
}

/// Rows loaded per file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub conditions: usize,
    pub images: usize,
    pub measurements: usize,
    pub relations: usize,
}

/// Load every known file present in `dir`
pub async fn ingest_directory(store: &TabularStore, dir: &Path) -> Result<IngestSummary> {
    if !dir.is_dir() {
        return Err(Error::InvalidInput(format!("{} is not a directory", dir.display())));
    }
    let mut summary = IngestSummary::default();

    if let Some(file) = open_optional(dir, CONDITIONS_FILE)? {
        summary.conditions = ingest_conditions(store, file).await?;
    }
    if let Some(file) = open_optional(dir, IMAGES_FILE)? {
        summary.images = ingest_images(store, file).await?;
    }
    if let Some(file) = open_optional(dir, MEASUREMENTS_FILE)? {
        summary.measurements = ingest_measurements(store, file).await?;
    }
    if let Some(file) = open_optional(dir, RELATIONS_FILE)? {
        summary.relations = ingest_relations(store, file).await?;
    }

    info!(
        dir = %dir.display(),
        conditions = summary.conditions,
        images = summary.images,
        measurements = summary.measurements,
        relations = summary.relations,
        "Ingest complete"
    );
    Ok(summary)
}

pub async fn ingest_conditions<R: Read>(store: &TabularStore, reader: R) -> Result<usize> {
    let rows: Vec<ConditionRow> = read_rows(reader)?;
    let mut tx = store.pool().begin().await?;
    for row in &rows {
        let condition = Condition {
            condition_id: row.condition_id,
            condition_name: row.condition_name.clone(),
            time_point: row.time_point.clone(),
            barcode: row.barcode.clone(),
            plate_id: row.plate_id.unwrap_or(0),
            sample_block: row.sample_block.unwrap_or(0),
            well_row: row.well_row,
            well_col: row.well_col,
        };
        upsert_condition_on(&mut *tx, &condition).await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}

pub async fn ingest_images<R: Read>(store: &TabularStore, reader: R) -> Result<usize> {
    let rows: Vec<ImageRow> = read_rows(reader)?;
    let mut tx = store.pool().begin().await?;
    for row in &rows {
        upsert_image_on(
            &mut *tx,
            row.image_id,
            row.site_id.unwrap_or(0),
            row.plate_id.unwrap_or(0),
            row.sample_block.unwrap_or(0),
        )
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}

pub async fn ingest_measurements<R: Read>(store: &TabularStore, reader: R) -> Result<usize> {
    let rows: Vec<MeasurementRow> = read_rows(reader)?;
    let mut tx = store.pool().begin().await?;
    let mut ids = IdCache::default();

    let mut values = Vec::with_capacity(rows.len());
    for row in &rows {
        let plane_id = match (&row.stack, &row.channel) {
            (Some(stack), Some(channel)) => Some(
                ids.plane(
                    &mut *tx,
                    stack,
                    channel,
                    row.stack_scale.unwrap_or(1.0),
                    row.plane_scale.unwrap_or(1.0),
                )
                .await?,
            ),
            (None, None) => None,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "measurement '{}' of image {} object {}: stack and channel must be given together",
                    row.measurement_name, row.image_id, row.object_number
                )))
            }
        };
        let measurement_id = ids
            .definition(&mut *tx, &row.measurement_name, &row.measurement_type, plane_id)
            .await?;
        let object_id = ids
            .object(&mut *tx, row.image_id, &row.object_type, row.object_number)
            .await?;
        values.push(ObjectMeasurement {
            object_id,
            measurement_id,
            value: row.value,
        });
    }

    write_values_on(&mut *tx, &values, true).await?;
    tx.commit().await?;
    Ok(rows.len())
}

pub async fn ingest_relations<R: Read>(store: &TabularStore, reader: R) -> Result<usize> {
    let rows: Vec<RelationRow> = read_rows(reader)?;
    let mut tx = store.pool().begin().await?;
    let mut ids = IdCache::default();

    for row in &rows {
        let parent = ids
            .object(&mut *tx, row.image_id, &row.object_type, row.object_number_parent)
            .await?;
        let child = ids
            .object(&mut *tx, row.image_id, &row.object_type, row.object_number_child)
            .await?;
        if parent == child {
            warn!(image_id = row.image_id, object_number = row.object_number_parent, "Skipping self relation");
            continue;
        }
        insert_relation_on(
            &mut *tx,
            &ObjectRelation {
                relation_type: row.relation_type.clone(),
                object_id_parent: parent,
                object_id_child: child,
            },
        )
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}

fn open_optional(dir: &Path, name: &str) -> Result<Option<File>> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    info!(file = %path.display(), "Loading");
    Ok(Some(File::open(path)?))
}

fn read_rows<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Ids registered within one ingest transaction
#[derive(Default)]
struct IdCache {
    stacks: HashMap<String, i64>,
    planes: HashMap<(i64, String), i64>,
    definitions: HashMap<(String, String, Option<i64>), i64>,
    objects: HashMap<(i64, String, i64), i64>,
}

impl IdCache {
    async fn plane(
        &mut self,
        conn: &mut SqliteConnection,
        stack: &str,
        channel: &str,
        stack_scale: f64,
        plane_scale: f64,
    ) -> Result<i64> {
        let stack_id = match self.stacks.get(stack) {
            Some(id) => *id,
            None => {
                let id = ensure_stack_on(&mut *conn, stack, stack_scale).await?;
                self.stacks.insert(stack.to_string(), id);
                id
            }
        };
        let key = (stack_id, channel.to_string());
        if let Some(id) = self.planes.get(&key) {
            return Ok(*id);
        }
        let id = ensure_plane_on(&mut *conn, stack_id, channel, plane_scale).await?;
        self.planes.insert(key, id);
        Ok(id)
    }

    async fn definition(
        &mut self,
        conn: &mut SqliteConnection,
        name: &str,
        measurement_type: &str,
        plane_id: Option<i64>,
    ) -> Result<i64> {
        let key = (name.to_string(), measurement_type.to_string(), plane_id);
        if let Some(id) = self.definitions.get(&key) {
            return Ok(*id);
        }
        let id = register_definition_on(&mut *conn, name, measurement_type, plane_id).await?;
        self.definitions.insert(key, id);
        Ok(id)
    }

    async fn object(
        &mut self,
        conn: &mut SqliteConnection,
        image_id: i64,
        object_type: &str,
        object_number: i64,
    ) -> Result<i64> {
        let key = (image_id, object_type.to_string(), object_number);
        if let Some(id) = self.objects.get(&key) {
            return Ok(*id);
        }
        let object = ensure_object_on(&mut *conn, image_id, object_type, object_number).await?;
        self.objects.insert(key, object.object_id);
        Ok(object.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spheroid_common::db::init_in_memory;
    use spheroid_common::{MeasurementSelector, Predicate};

    const IMAGES: &str = "image_id,site_id,plate_id,sample_block\n1,1,1,0\n2,1,1,0\n";
    const MEASUREMENTS: &str = "\
image_id,object_type,object_number,stack,channel,measurement_name,measurement_type,value,stack_scale,plane_scale
1,cell,1,FullStack,Pd102,MeanIntensity,Intensity,2.5,,2.0
1,cell,2,FullStack,Pd102,MeanIntensity,Intensity,,,2.0
2,cell,1,FullStack,Pd102,MeanIntensity,Intensity,4.0,,2.0
1,cell,1,,,Area,AreaShape,120,,
";

    #[tokio::test]
    async fn test_measurement_ingest_registers_definitions_and_is_idempotent() {
        let store = TabularStore::new(init_in_memory().await.unwrap());
        ingest_images(&store, IMAGES.as_bytes()).await.unwrap();
        assert_eq!(ingest_measurements(&store, MEASUREMENTS.as_bytes()).await.unwrap(), 4);
        ingest_measurements(&store, MEASUREMENTS.as_bytes()).await.unwrap();

        assert_eq!(store.count_objects(&Predicate::All).await.unwrap(), 3);
        let values: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM object_measurements")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(values, 4);

        let defs = store
            .find_measurement_definitions(&MeasurementSelector::new().channel("Pd102"))
            .await
            .unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].scale(), 2.0);

        let area = store
            .find_measurement_definitions(&MeasurementSelector::new().measurement_name("Area"))
            .await
            .unwrap();
        assert_eq!(area[0].plane_id, None);
    }

    #[tokio::test]
    async fn test_stack_without_channel_rejected() {
        let store = TabularStore::new(init_in_memory().await.unwrap());
        ingest_images(&store, IMAGES.as_bytes()).await.unwrap();
        let bad = "image_id,object_type,object_number,stack,channel,measurement_name,measurement_type,value\n\
                   1,cell,1,FullStack,,MeanIntensity,Intensity,1.0\n";
        assert!(matches!(
            ingest_measurements(&store, bad.as_bytes()).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(store.count_objects(&Predicate::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conditions_and_relations() {
        let store = TabularStore::new(init_in_memory().await.unwrap());
        ingest_images(&store, IMAGES.as_bytes()).await.unwrap();
        let conditions = "condition_id,condition_name,time_point,barcode,plate_id,sample_block,well_row,well_col\n\
                          1,ctrl,,10,1,0,1,1\n2,drug,24h,01,1,0,1,2\n";
        assert_eq!(ingest_conditions(&store, conditions.as_bytes()).await.unwrap(), 2);
        let listed = store.conditions_for_block(1, 0).await.unwrap();
        assert_eq!(listed[1].time_point.as_deref(), Some("24h"));
        assert_eq!(listed[0].time_point, None);

        let relations = "relation_type,image_id,object_type,object_number_parent,object_number_child\n\
                         neighbor,1,cell,1,2\nneighbor,1,cell,2,2\n";
        ingest_relations(&store, relations.as_bytes()).await.unwrap();
        assert_eq!(store.relations("neighbor", Some("cell")).await.unwrap().len(), 1);
    }
}
