//! Derived quality filters: sphere membership, ambiguity and HQ
//!
//! Each filter is evaluated into a `(object_id, Option<bool>)` table from
//! scaled measurements. Objects missing a needed value get `None` and are
//! never persisted.

use crate::filters::composer::{FilterComposer, FilterSource, FilterWriteSummary};
use serde::Serialize;
use spheroid_common::config::Config;
use spheroid_common::{AnnotatedMatrix, MeasurementSelector, Predicate, Result};
use std::collections::HashMap;
use tracing::{debug, info};

pub const SPHERE_FILTER: &str = "is-sphere";
pub const AMBIGUOUS_FILTER: &str = "is-ambiguous";
pub const HQ_FILTER: &str = "is-hq";

/// Filter table: one optional verdict per object
pub type FilterTable = Vec<(i64, Option<bool>)>;

/// Sphere-membership parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SphereParams {
    pub sphere: MeasurementSelector,
    pub others: Vec<MeasurementSelector>,
    pub minfrac: f64,
    /// Floor on the scaled sphere value; `minfrac` when `None`
    pub floor: Option<f64>,
    pub epsilon: f64,
}

impl SphereParams {
    pub fn from_config(config: &Config) -> Result<Self> {
        let intensity = |channel: &str| {
            MeasurementSelector::new()
                .stack(config.defaults.stack.clone())
                .channel(channel)
                .measurement_name(config.defaults.measurement_name.clone())
                .measurement_type(config.defaults.measurement_type.clone())
        };
        Ok(Self {
            sphere: intensity(config.sphere_channel()?),
            others: config.sphere.other_channels.iter().map(|c| intensity(c.as_str())).collect(),
            minfrac: config.sphere.minfrac,
            floor: config.sphere.floor,
            epsilon: config.sphere.epsilon,
        })
    }

    pub fn floor(&self) -> f64 {
        self.floor.unwrap_or(self.minfrac)
    }

    /// Verdict for one object from scaled values
    pub fn is_sphere(&self, sphere: f64, others: &[f64]) -> bool {
        let ratios_pass = others
            .iter()
            .all(|o| (sphere + self.epsilon) / (o + self.epsilon) > self.minfrac);
        ratios_pass && sphere > self.floor()
    }
}

/// Ambiguity parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguityParams {
    /// Distance to the nearest other spheroid
    pub distance: MeasurementSelector,
    pub floor: f64,
    pub ceiling: f64,
}

impl AmbiguityParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            distance: MeasurementSelector::new()
                .stack(config.distance.stack.clone())
                .channel(config.distance.other_channel.clone())
                .measurement_name(config.distance.measurement_name.clone())
                .measurement_type(config.distance.measurement_type.clone()),
            floor: config.ambiguity.floor,
            ceiling: config.ambiguity.ceiling,
        }
    }

    /// Strictly between floor and the unmeasured ceiling
    pub fn is_ambiguous(&self, scaled_distance: f64) -> bool {
        self.floor < scaled_distance && scaled_distance < self.ceiling
    }
}

/// Counts and filter writes of one quality run
#[derive(Debug, Clone, Serialize)]
pub struct QualitySummary {
    pub sphere: FilterWriteSummary,
    pub ambiguous: FilterWriteSummary,
    pub hq: Option<FilterWriteSummary>,
    pub hq_passing: u64,
}

/// Sphere-membership table for every object of the composer's type
pub async fn evaluate_sphere(composer: &mut FilterComposer, params: &SphereParams) -> Result<FilterTable> {
    let mut selectors = vec![params.sphere.clone()];
    selectors.extend(params.others.iter().cloned());
    let matrix = scaled_matrix(composer, &selectors).await?;

    let table: FilterTable = (0..matrix.n_rows())
        .map(|row| {
            let object_id = matrix.objects()[row].object_id;
            let values: Option<Vec<f64>> = matrix.row(row).iter().copied().collect();
            let verdict = values.map(|v| params.is_sphere(v[0], &v[1..]));
            (object_id, verdict)
        })
        .collect();

    debug!(
        objects = table.len(),
        minfrac = params.minfrac,
        floor = params.floor(),
        "Evaluated sphere membership"
    );
    Ok(table)
}

/// Ambiguity table for every object of the composer's type
pub async fn evaluate_ambiguity(composer: &mut FilterComposer, params: &AmbiguityParams) -> Result<FilterTable> {
    let matrix = scaled_matrix(composer, std::slice::from_ref(&params.distance)).await?;
    Ok((0..matrix.n_rows())
        .map(|row| {
            let object_id = matrix.objects()[row].object_id;
            (object_id, matrix.get(row, 0).map(|d| params.is_ambiguous(d)))
        })
        .collect())
}

/// HQ = sphere AND NOT ambiguous; objects missing either verdict get `None`
pub fn combine_hq(sphere: &FilterTable, ambiguous: &FilterTable) -> FilterTable {
    let ambiguous: HashMap<i64, Option<bool>> = ambiguous.iter().copied().collect();
    sphere
        .iter()
        .map(|&(object_id, is_sphere)| {
            let is_ambiguous = ambiguous.get(&object_id).copied().flatten();
            let hq = match (is_sphere, is_ambiguous) {
                (Some(s), Some(a)) => Some(s && !a),
                _ => None,
            };
            (object_id, hq)
        })
        .collect()
}

/// Evaluate and persist the sphere and ambiguity filters, plus HQ when named
pub async fn run_quality_filters(
    composer: &mut FilterComposer,
    sphere: &SphereParams,
    ambiguity: &AmbiguityParams,
    hq_name: Option<&str>,
    overwrite: bool,
) -> Result<QualitySummary> {
    let sphere_table = evaluate_sphere(composer, sphere).await?;
    let ambiguous_table = evaluate_ambiguity(composer, ambiguity).await?;
    let hq_table = combine_hq(&sphere_table, &ambiguous_table);
    let hq_passing = hq_table.iter().filter(|(_, v)| *v == Some(true)).count() as u64;

    let sphere_summary = composer
        .evaluate_and_store(FilterSource::Table(sphere_table), SPHERE_FILTER, overwrite)
        .await?;
    let ambiguous_summary = composer
        .evaluate_and_store(FilterSource::Table(ambiguous_table), AMBIGUOUS_FILTER, overwrite)
        .await?;
    let hq_summary = match hq_name {
        Some(name) => Some(
            composer
                .evaluate_and_store(FilterSource::Table(hq_table), name, overwrite)
                .await?,
        ),
        None => None,
    };

    info!(
        object_type = composer.object_type(),
        sphere = sphere_summary.passing,
        ambiguous = ambiguous_summary.passing,
        hq = hq_passing,
        "Quality filters complete"
    );
    Ok(QualitySummary {
        sphere: sphere_summary,
        ambiguous: ambiguous_summary,
        hq: hq_summary,
        hq_passing,
    })
}

/// Scaled matrix with one column per selector, each resolving to exactly one definition
async fn scaled_matrix(composer: &mut FilterComposer, selectors: &[MeasurementSelector]) -> Result<AnnotatedMatrix> {
    let object_type = composer.object_type().to_string();
    let mut definitions = Vec::with_capacity(selectors.len());
    for selector in selectors {
        definitions.push(composer.index().resolve_one(selector).await?);
    }
    composer
        .index()
        .get_scaled_measurements(&Predicate::object_type(&object_type), &definitions)
        .await
}
