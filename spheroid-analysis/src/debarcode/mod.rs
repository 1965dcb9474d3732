//! Barcode debarcoder
//!
//! Assigns each candidate object a condition from its thresholded on/off
//! pattern across the barcode channels, aggregates the votes per image, and
//! writes both back in one transaction. Reruns fully replace the previous
//! result: every image is reset before the new per-image fields are written,
//! and every row of the object-level `barcode` measurement is replaced.

pub mod barcode;
pub mod threshold;
pub mod votes;

pub use barcode::{parse_barcode, BarcodeLookup, DecodedBarcode};
pub use threshold::{GroupBy, ThresholdFn, ThresholdStrategy, Transform};
pub use votes::aggregate_votes;

use serde::Serialize;
use spheroid_common::cache::LruCache;
use spheroid_common::config::Config;
use spheroid_common::db::images::{reset_debarcoding_on, write_image_barcode_on};
use spheroid_common::db::measurements::{delete_values_on, register_definition_on, write_values_on};
use spheroid_common::db::{Image, ImageBarcodeStats, ObjectMeasurement, TabularStore};
use spheroid_common::{
    ColumnRef, CompareOp, Error, MeasurementIndex, MeasurementSelector, Predicate, Result,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Reserved object-level measurement holding the decoded condition id
pub const BARCODE_MEASUREMENT: &str = "barcode";
pub const BARCODE_MEASUREMENT_TYPE: &str = "object";

/// Parameters of one debarcoding run
#[derive(Debug, Default)]
pub struct DebarcodeParams {
    pub object_type: String,
    /// One selector per barcode channel, in barcode digit order
    pub barcode_channels: Vec<MeasurementSelector>,
    /// Raw distance to the rim of the enclosing spheroid
    pub rim_distance: MeasurementSelector,
    /// Candidates lie strictly deeper than this
    pub borderdist: f64,
    /// Candidates lie at most this deep; recorded as the image `bc_depth`
    pub dist: Option<f64>,
    pub transform: Transform,
    pub threshold: ThresholdStrategy,
    pub groupby: Option<GroupBy>,
}

impl DebarcodeParams {
    /// Channels, object type and transform from the config; gate and
    /// threshold strategy at their defaults
    pub fn from_config(config: &Config) -> Result<Self> {
        let barcode_channels = config
            .barcode_channels()?
            .iter()
            .map(|channel| {
                MeasurementSelector::new()
                    .stack(config.barcode_stack())
                    .channel(channel.as_str())
                    .measurement_name(config.barcode_measurement_name())
                    .measurement_type(config.barcode_measurement_type())
            })
            .collect();
        Ok(Self {
            object_type: config.object_type()?.to_string(),
            barcode_channels,
            rim_distance: MeasurementSelector::new()
                .stack(config.distance.stack.clone())
                .channel(config.distance.rim_channel.clone())
                .measurement_name(config.distance.measurement_name.clone())
                .measurement_type(config.distance.measurement_type.clone()),
            borderdist: 0.0,
            dist: None,
            transform: config.barcode.transform.into(),
            threshold: ThresholdStrategy::GroupMean,
            groupby: None,
        })
    }
}

/// Outcome of one debarcoding run
#[derive(Debug, Clone, Serialize)]
pub struct DebarcodeSummary {
    pub candidates: usize,
    pub valid_objects: i64,
    pub invalid_objects: i64,
    /// Images with a resolved condition
    pub images_debarcoded: usize,
    /// Images with candidates but no valid decode
    pub images_unresolved: usize,
    pub barcode_measurement_id: i64,
    pub images: Vec<ImageBarcodeStats>,
}

pub struct Debarcoder {
    index: MeasurementIndex,
    lookups: LruCache<(i64, i64), BarcodeLookup>,
}

impl Debarcoder {
    pub fn new(store: TabularStore, cache_capacity: usize) -> Self {
        Self {
            index: MeasurementIndex::new(store, cache_capacity),
            lookups: LruCache::new(cache_capacity),
        }
    }

    pub fn store(&self) -> &TabularStore {
        self.index.store()
    }

    /// Barcode lookup of one (plate, sample block), memoized
    pub async fn lookup(&mut self, plate_id: i64, sample_block: i64, n_channels: usize) -> Result<BarcodeLookup> {
        if let Some(hit) = self.lookups.get(&(plate_id, sample_block)) {
            if hit.n_channels() == n_channels {
                return Ok(hit);
            }
        }
        let conditions = self.store().conditions_for_block(plate_id, sample_block).await?;
        let lookup = BarcodeLookup::from_conditions(&conditions, n_channels)?;
        if lookup.is_empty() {
            warn!(plate_id, sample_block, "No conditions registered for this block");
        }
        self.lookups.put((plate_id, sample_block), lookup.clone());
        Ok(lookup)
    }

    /// Drop memoized barcode lookups and selector resolutions
    pub fn clear_caches(&mut self) {
        self.lookups.clear();
        self.index.clear_caches();
    }

    /// Debarcode every candidate object and persist the result
    pub async fn run(&mut self, params: &DebarcodeParams) -> Result<DebarcodeSummary> {
        if params.barcode_channels.is_empty() {
            return Err(Error::Config("no barcode channels given".to_string()));
        }
        let mut barcode_definitions = Vec::with_capacity(params.barcode_channels.len());
        for selector in &params.barcode_channels {
            barcode_definitions.push(self.index.resolve_one(selector).await?);
        }
        let rim = self.index.resolve_one(&params.rim_distance).await?;
        let n_channels = barcode_definitions.len();

        let candidates = Predicate::object_type(&params.object_type).and(rim_gate(
            rim.measurement_id,
            params.borderdist,
            params.dist,
        ));
        let matrix = self
            .index
            .get_scaled_measurements(&candidates, &barcode_definitions)
            .await?;
        info!(
            object_type = %params.object_type,
            candidates = matrix.n_rows(),
            channels = n_channels,
            "Selected debarcoding candidates"
        );

        let images: HashMap<i64, Image> = self
            .store()
            .list_images()
            .await?
            .into_iter()
            .map(|image| (image.image_id, image))
            .collect();

        // Transformed values, one row per candidate
        let values: Vec<Vec<Option<f64>>> = (0..matrix.n_rows())
            .map(|row| {
                matrix
                    .row(row)
                    .iter()
                    .map(|v| v.and_then(|v| params.transform.apply(v)))
                    .collect()
            })
            .collect();

        let mut image_of_row: Vec<&Image> = Vec::with_capacity(values.len());
        for object in matrix.objects() {
            let image = images
                .get(&object.image_id)
                .ok_or_else(|| Error::NotFound(format!("image {} of object {}", object.image_id, object.object_id)))?;
            image_of_row.push(image);
        }
        let group_of_row: Vec<i64> = image_of_row
            .iter()
            .map(|image| group_key(params.groupby, image))
            .collect();

        let mut group_values: BTreeMap<i64, Vec<Vec<f64>>> = BTreeMap::new();
        for (row, group) in group_of_row.iter().enumerate() {
            let channels = group_values
                .entry(*group)
                .or_insert_with(|| vec![Vec::new(); n_channels]);
            for (c, v) in values[row].iter().enumerate() {
                if let Some(v) = v {
                    channels[c].push(*v);
                }
            }
        }
        let mut thresholds: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for (group, channels) in &group_values {
            let t = params.threshold.thresholds(channels)?;
            debug!(group, thresholds = ?t, "Barcode thresholds");
            thresholds.insert(*group, t);
        }

        // Decode and group by image
        let mut decoded_rows: Vec<ObjectMeasurement> = Vec::with_capacity(values.len());
        let mut per_image: BTreeMap<i64, Vec<DecodedBarcode>> = BTreeMap::new();
        for (row, object) in matrix.objects().iter().enumerate() {
            let image = image_of_row[row];
            let decoded = match on_off(&values[row], thresholds.get(&group_of_row[row])) {
                Some(states) => self
                    .lookup(image.plate_id, image.sample_block, n_channels)
                    .await?
                    .decode(&states),
                None => DecodedBarcode::NotValid,
            };
            per_image.entry(object.image_id).or_default().push(decoded);
            decoded_rows.push(ObjectMeasurement {
                object_id: object.object_id,
                measurement_id: 0,
                value: decoded.condition_id().map(|id| id as f64),
            });
        }

        let stats: Vec<ImageBarcodeStats> = per_image
            .iter()
            .map(|(image_id, decoded)| aggregate_votes(*image_id, decoded))
            .collect();
        for s in stats.iter().filter(|s| s.condition_id.is_none()) {
            warn!(
                image_id = s.image_id,
                invalid = s.bc_invalid,
                "No object of this image decoded to a condition"
            );
        }

        let barcode_measurement_id = self.persist(&stats, &mut decoded_rows, params.dist).await?;
        self.index.clear_caches();

        let summary = DebarcodeSummary {
            candidates: matrix.n_rows(),
            valid_objects: stats.iter().map(|s| s.bc_valid).sum(),
            invalid_objects: stats.iter().map(|s| s.bc_invalid).sum(),
            images_debarcoded: stats.iter().filter(|s| s.condition_id.is_some()).count(),
            images_unresolved: stats.iter().filter(|s| s.condition_id.is_none()).count(),
            barcode_measurement_id,
            images: stats,
        };
        info!(
            candidates = summary.candidates,
            valid = summary.valid_objects,
            invalid = summary.invalid_objects,
            images = summary.images_debarcoded,
            unresolved = summary.images_unresolved,
            "Debarcoding complete"
        );
        Ok(summary)
    }

    /// Reset all images, write the new image fields and replace the barcode rows
    async fn persist(
        &self,
        stats: &[ImageBarcodeStats],
        rows: &mut [ObjectMeasurement],
        depth: Option<f64>,
    ) -> Result<i64> {
        let debarcoded_at = chrono::Utc::now().to_rfc3339();
        let mut tx = self.store().pool().begin().await?;

        let reset = reset_debarcoding_on(&mut *tx).await?;
        debug!(images = reset, "Reset previous debarcoding");
        for s in stats {
            write_image_barcode_on(&mut *tx, s, depth, &debarcoded_at).await?;
        }

        let barcode_id =
            register_definition_on(&mut *tx, BARCODE_MEASUREMENT, BARCODE_MEASUREMENT_TYPE, None).await?;
        let removed = delete_values_on(&mut *tx, &[barcode_id]).await?;
        debug!(removed, "Dropped previous barcode rows");
        for row in rows.iter_mut() {
            row.measurement_id = barcode_id;
        }
        write_values_on(&mut *tx, rows, false).await?;

        tx.commit().await?;
        Ok(barcode_id)
    }
}

/// Raw rim distance in `(borderdist, dist]`
fn rim_gate(rim_measurement_id: i64, borderdist: f64, dist: Option<f64>) -> Predicate {
    let mut condition = Predicate::compare(ColumnRef::Value, CompareOp::Gt, borderdist);
    if let Some(dist) = dist {
        condition = condition.and(Predicate::compare(ColumnRef::Value, CompareOp::Le, dist));
    }
    Predicate::Measurement {
        measurement_ids: vec![rim_measurement_id],
        condition: Box::new(condition),
    }
}

fn group_key(groupby: Option<GroupBy>, image: &Image) -> i64 {
    match groupby {
        None => 0,
        Some(GroupBy::Image) => image.image_id,
        Some(GroupBy::Site) => image.site_id,
        Some(GroupBy::Plate) => image.plate_id,
    }
}

/// On/off states; `None` when any channel value is missing
fn on_off(values: &[Option<f64>], thresholds: Option<&Vec<f64>>) -> Option<Vec<bool>> {
    let thresholds = thresholds?;
    values
        .iter()
        .zip(thresholds)
        .map(|(v, t)| v.map(|v| v - t > 0.0))
        .collect()
}
