//! Filter composer
//!
//! Builds object predicates from measurement selectors and thresholds,
//! materializes them into named 0/1 object filters, and combines persisted
//! filters with new predicates.

use serde::Serialize;
use spheroid_common::db::{ObjectFilterRow, TabularStore};
use spheroid_common::{CompareOp, MeasurementIndex, MeasurementSelector, Predicate, Result};
use std::collections::HashSet;
use tracing::{debug, info};

/// One `(selectors, op, threshold)` term of a combined filter
///
/// Several selectors name a union of channels for the same logical
/// measurement; the object passes when any of them satisfies the comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTriplet {
    pub selectors: Vec<MeasurementSelector>,
    pub op: CompareOp,
    pub threshold: f64,
}

impl FilterTriplet {
    pub fn new(selector: MeasurementSelector, op: CompareOp, threshold: f64) -> Self {
        Self {
            selectors: vec![selector],
            op,
            threshold,
        }
    }
}

/// What [`FilterComposer::evaluate_and_store`] materializes
#[derive(Debug, Clone)]
pub enum FilterSource {
    /// Evaluated over every object of the composer's object type
    Predicate(Predicate),
    /// Precomputed rows; rows without a value are skipped
    Table(Vec<(i64, Option<bool>)>),
}

/// Outcome of one filter write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterWriteSummary {
    pub filter_name: String,
    pub rows_written: u64,
    pub passing: u64,
}

pub struct FilterComposer {
    index: MeasurementIndex,
    object_type: String,
}

impl FilterComposer {
    pub fn new(index: MeasurementIndex, object_type: impl Into<String>) -> Self {
        Self {
            index,
            object_type: object_type.into(),
        }
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn index(&mut self) -> &mut MeasurementIndex {
        &mut self.index
    }

    pub fn store(&self) -> &TabularStore {
        self.index.store()
    }

    /// Ids of every definition the selectors resolve to (union)
    ///
    /// Selectors without an object type are narrowed to the composer's.
    pub async fn resolve_measurement_ids(&mut self, selectors: &[MeasurementSelector]) -> Result<Vec<i64>> {
        let narrowed: Vec<MeasurementSelector> = selectors
            .iter()
            .map(|s| {
                let mut s = s.clone();
                if s.object_type.is_none() {
                    s.object_type = Some(self.object_type.clone());
                }
                s
            })
            .collect();
        let definitions = self.index.resolve_any(&narrowed).await?;
        Ok(definitions.iter().map(|d| d.measurement_id).collect())
    }

    /// Objects having a value for any definition the selectors resolve to
    ///
    /// Fails with `NotFound` when the selectors resolve to nothing.
    pub async fn build_measurement_predicate(&mut self, selectors: &[MeasurementSelector]) -> Result<Predicate> {
        let ids = self.resolve_measurement_ids(selectors).await?;
        Ok(Predicate::object_type(&self.object_type).and(Predicate::has_measurement(ids)))
    }

    /// Conjunction of `base` with one scaled-value threshold per triplet
    pub async fn combine(&mut self, base: Predicate, triplets: &[FilterTriplet]) -> Result<Predicate> {
        let mut combined = Predicate::object_type(&self.object_type).and(base);
        for triplet in triplets {
            let ids = self.resolve_measurement_ids(&triplet.selectors).await?;
            debug!(
                measurement_ids = ?ids,
                op = %triplet.op,
                threshold = triplet.threshold,
                "Adding threshold term"
            );
            combined = combined.and(Predicate::measurement_threshold(ids, triplet.op, triplet.threshold));
        }
        Ok(combined)
    }

    /// Materialize `source` and persist it under `filter_name`
    ///
    /// `overwrite = true` replaces every prior row of the filter in the same
    /// transaction; otherwise prior rows stay and a duplicate object is a
    /// `Conflict`.
    pub async fn evaluate_and_store(
        &self,
        source: FilterSource,
        filter_name: &str,
        overwrite: bool,
    ) -> Result<FilterWriteSummary> {
        let rows = match source {
            FilterSource::Predicate(predicate) => self.evaluate(&predicate).await?,
            FilterSource::Table(table) => table
                .into_iter()
                .filter_map(|(object_id, value)| value.map(|value| ObjectFilterRow { object_id, value }))
                .collect(),
        };

        let passing = rows.iter().filter(|r| r.value).count() as u64;
        let rows_written = self
            .store()
            .write_object_filter(filter_name, &rows, overwrite)
            .await?;

        info!(
            filter = filter_name,
            rows = rows_written,
            passing,
            overwrite,
            "Stored object filter"
        );
        Ok(FilterWriteSummary {
            filter_name: filter_name.to_string(),
            rows_written,
            passing,
        })
    }

    /// 0/1 row per object of the composer's type
    pub async fn evaluate(&self, predicate: &Predicate) -> Result<Vec<ObjectFilterRow>> {
        let scope = Predicate::object_type(&self.object_type);
        let all = self.store().query_object_ids(&scope).await?;
        let matched: HashSet<i64> = self
            .store()
            .query_object_ids(&scope.and(predicate.clone()))
            .await?
            .into_iter()
            .collect();

        Ok(all
            .into_iter()
            .map(|object_id| ObjectFilterRow {
                object_id,
                value: matched.contains(&object_id),
            })
            .collect())
    }

    pub async fn read_filter(&self, filter_name: &str) -> Result<Vec<ObjectFilterRow>> {
        self.store().read_object_filter(filter_name).await
    }
}

/// `predicate` restricted to objects whose named filters are all set
pub fn and_filters<S: AsRef<str>>(predicate: Predicate, filter_names: &[S]) -> Predicate {
    filter_names
        .iter()
        .fold(predicate, |acc, name| acc.and(Predicate::filter(name.as_ref(), true)))
}
