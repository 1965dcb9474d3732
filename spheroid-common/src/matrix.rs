//! Annotated object × measurement matrix
//!
//! Rows are objects, columns are measurement definitions; both carry their
//! side metadata so stages never need a second lookup. Missing values are
//! `None` (an object without a stored value, or a NULL value).

use crate::db::models::{MeasurementDefinition, ObjectRecord};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotatedMatrix {
    objects: Vec<ObjectRecord>,
    measurements: Vec<MeasurementDefinition>,
    /// Row-major, `objects.len() * measurements.len()`
    values: Vec<Option<f64>>,
    row_index: HashMap<i64, usize>,
}

impl AnnotatedMatrix {
    /// Empty matrix with the given rows and columns
    pub fn new(objects: Vec<ObjectRecord>, measurements: Vec<MeasurementDefinition>) -> Self {
        let row_index = objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.object_id, i))
            .collect();
        let values = vec![None; objects.len() * measurements.len()];
        Self {
            objects,
            measurements,
            values,
            row_index,
        }
    }

    pub fn objects(&self) -> &[ObjectRecord] {
        &self.objects
    }

    pub fn measurements(&self) -> &[MeasurementDefinition] {
        &self.measurements
    }

    pub fn n_rows(&self) -> usize {
        self.objects.len()
    }

    pub fn n_cols(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn row_of(&self, object_id: i64) -> Option<usize> {
        self.row_index.get(&object_id).copied()
    }

    pub fn column_of(&self, measurement_id: i64) -> Option<usize> {
        self.measurements
            .iter()
            .position(|m| m.measurement_id == measurement_id)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get(row * self.n_cols() + col).copied().flatten()
    }

    /// Value by ids, `None` when either id is unknown or the value is missing
    pub fn value(&self, object_id: i64, measurement_id: i64) -> Option<f64> {
        let row = self.row_of(object_id)?;
        let col = self.column_of(measurement_id)?;
        self.get(row, col)
    }

    pub fn set(&mut self, row: usize, col: usize, value: Option<f64>) {
        let n_cols = self.n_cols();
        if let Some(slot) = self.values.get_mut(row * n_cols + col) {
            // NaN is stored as missing
            *slot = value.filter(|v| !v.is_nan());
        }
    }

    pub fn row(&self, row: usize) -> &[Option<f64>] {
        let n_cols = self.n_cols();
        &self.values[row * n_cols..(row + 1) * n_cols]
    }

    pub fn column(&self, col: usize) -> impl Iterator<Item = Option<f64>> + '_ {
        (0..self.n_rows()).map(move |row| self.get(row, col))
    }

    /// Copy with every column multiplied by its calibration factor
    pub fn scaled(&self) -> Self {
        let mut out = self.clone();
        let factors: Vec<f64> = self.measurements.iter().map(|m| m.scale()).collect();
        for row in 0..out.n_rows() {
            for (col, factor) in factors.iter().enumerate() {
                let v = out.get(row, col).map(|v| v * factor);
                out.set(row, col, v);
            }
        }
        out
    }
}
