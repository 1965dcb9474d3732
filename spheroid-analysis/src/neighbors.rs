//! Neighbor aggregation
//!
//! Reduces each object's neighbor values (per measurement) and stores the
//! results under new prefixed measurement definitions. Source measurements
//! are never written.

use serde::Serialize;
use spheroid_common::db::measurements::{delete_values_on, register_definition_on, write_values_on};
use spheroid_common::db::{ObjectMeasurement, TabularStore};
use spheroid_common::{Error, MeasurementIndex, MeasurementSelector, Predicate, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// What to aggregate over which relation
#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub relation_type: String,
    /// Keep only edges whose endpoints are both of this type
    pub object_type: Option<String>,
    pub selectors: Vec<MeasurementSelector>,
    /// Prepended to the source measurement name; must be non-empty
    pub prefix: String,
    /// Objects allowed in the aggregation
    pub filter: Option<Predicate>,
    /// With a filter: drop every edge touching a failing object (default).
    /// Otherwise failing objects get no output but still count as neighbors.
    pub drop_filtered_neighbors: bool,
}

impl AggregateRequest {
    pub fn new(relation_type: impl Into<String>, selectors: Vec<MeasurementSelector>, prefix: impl Into<String>) -> Self {
        Self {
            relation_type: relation_type.into(),
            object_type: None,
            selectors,
            prefix: prefix.into(),
            filter: None,
            drop_filtered_neighbors: true,
        }
    }
}

/// Stock reductions over neighbor values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reduction {
    Mean,
    Median,
    Min,
    Max,
    Sum,
}

impl Reduction {
    pub fn apply(self, values: &[f64]) -> Result<f64> {
        if values.is_empty() {
            return Err(Error::InvalidInput(format!("{} of no values", self)));
        }
        let out = match self {
            Reduction::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Reduction::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Reduction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reduction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reduction::Sum => values.iter().sum(),
        };
        Ok(out)
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reduction::Mean => "mean",
            Reduction::Median => "median",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Sum => "sum",
        };
        f.write_str(name)
    }
}

impl FromStr for Reduction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Reduction::Mean),
            "median" => Ok(Reduction::Median),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "sum" => Ok(Reduction::Sum),
            other => Err(format!("unknown reduction '{}'", other)),
        }
    }
}

/// Source → derived definition of one aggregated column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedMeasurement {
    pub source_measurement_id: i64,
    pub measurement_id: i64,
    pub measurement_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateSummary {
    pub edges: usize,
    pub objects_with_neighbors: usize,
    pub objects_written: usize,
    pub values_written: usize,
    pub derived: Vec<DerivedMeasurement>,
}

pub struct NeighborAggregator {
    index: MeasurementIndex,
}

impl NeighborAggregator {
    pub fn new(store: TabularStore, cache_capacity: usize) -> Self {
        Self {
            index: MeasurementIndex::new(store, cache_capacity),
        }
    }

    pub fn store(&self) -> &TabularStore {
        self.index.store()
    }

    pub fn clear_caches(&mut self) {
        self.index.clear_caches();
    }

    /// Aggregate neighbor values with `reduce_fn` and replace the derived values
    ///
    /// All or nothing: a `reduce_fn` error aborts before anything is written.
    pub async fn aggregate<F>(&mut self, request: &AggregateRequest, reduce_fn: F) -> Result<AggregateSummary>
    where
        F: Fn(&[f64]) -> Result<f64>,
    {
        if request.prefix.is_empty() {
            return Err(Error::InvalidInput(
                "aggregation prefix must not be empty".to_string(),
            ));
        }
        let definitions = self.index.resolve_any(&request.selectors).await?;

        let mut edges = self
            .store()
            .relations(&request.relation_type, request.object_type.as_deref())
            .await?;
        let passing: Option<HashSet<i64>> = match &request.filter {
            Some(filter) => Some(self.store().query_object_ids(filter).await?.into_iter().collect()),
            None => None,
        };
        if let (Some(passing), true) = (&passing, request.drop_filtered_neighbors) {
            let before = edges.len();
            edges.retain(|e| passing.contains(&e.object_id_parent) && passing.contains(&e.object_id_child));
            debug!(dropped = before - edges.len(), "Dropped edges touching filtered objects");
        }

        let adjacency = adjacency(edges.iter().map(|e| (e.object_id_parent, e.object_id_child)));

        let scope = match &request.object_type {
            Some(object_type) => Predicate::object_type(object_type),
            None => Predicate::All,
        };
        let matrix = self.index.get_measurements(&scope, &definitions).await?;

        // (object, column, value), computed in full before any write
        let mut results: Vec<(i64, usize, f64)> = Vec::new();
        let mut objects_written: BTreeSet<i64> = BTreeSet::new();
        for (object_id, neighbors) in &adjacency {
            if let Some(passing) = &passing {
                if !passing.contains(object_id) {
                    continue;
                }
            }
            for col in 0..definitions.len() {
                let values: Vec<f64> = neighbors
                    .iter()
                    .filter_map(|n| matrix.row_of(*n).and_then(|row| matrix.get(row, col)))
                    .collect();
                if values.is_empty() {
                    continue;
                }
                results.push((*object_id, col, reduce_fn(&values)?));
                objects_written.insert(*object_id);
            }
        }

        let derived = self.persist(&request.prefix, &definitions, &results).await?;
        self.index.clear_caches();

        let summary = AggregateSummary {
            edges: edges.len(),
            objects_with_neighbors: adjacency.len(),
            objects_written: objects_written.len(),
            values_written: results.len(),
            derived,
        };
        info!(
            relation = %request.relation_type,
            prefix = %request.prefix,
            objects = summary.objects_written,
            values = summary.values_written,
            "Neighbor aggregation complete"
        );
        Ok(summary)
    }

    async fn persist(
        &self,
        prefix: &str,
        definitions: &[spheroid_common::db::MeasurementDefinition],
        results: &[(i64, usize, f64)],
    ) -> Result<Vec<DerivedMeasurement>> {
        let mut tx = self.store().pool().begin().await?;

        let mut derived = Vec::with_capacity(definitions.len());
        for d in definitions {
            let name = format!("{}{}", prefix, d.measurement_name);
            let id = register_definition_on(&mut *tx, &name, &d.measurement_type, d.plane_id).await?;
            derived.push(DerivedMeasurement {
                source_measurement_id: d.measurement_id,
                measurement_id: id,
                measurement_name: name,
            });
        }

        let ids: Vec<i64> = derived.iter().map(|d| d.measurement_id).collect();
        if let Some(clash) = derived.iter().find(|d| definitions.iter().any(|s| s.measurement_id == d.measurement_id)) {
            // Dropping `tx` rolls back the registrations
            return Err(Error::InvalidInput(format!(
                "prefix '{}' maps onto source measurement '{}'",
                prefix, clash.measurement_name
            )));
        }
        delete_values_on(&mut *tx, &ids).await?;
        let rows: Vec<ObjectMeasurement> = results
            .iter()
            .map(|&(object_id, col, value)| ObjectMeasurement {
                object_id,
                measurement_id: ids[col],
                value: Some(value),
            })
            .collect();
        write_values_on(&mut *tx, &rows, false).await?;

        tx.commit().await?;
        Ok(derived)
    }
}

/// Undirected adjacency without self edges
pub fn adjacency(edges: impl IntoIterator<Item = (i64, i64)>) -> BTreeMap<i64, BTreeSet<i64>> {
    let mut map: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for (a, b) in edges {
        if a == b {
            continue;
        }
        map.entry(a).or_default().insert(b);
        map.entry(b).or_default().insert(a);
    }
    map
}
