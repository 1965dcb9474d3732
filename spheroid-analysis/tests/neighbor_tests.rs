//! Neighbor aggregation against an in-memory experiment
//!
//! Four cells with Pd102 = 1, 2, 3, 4 and neighbor edges 1-2, 2-3, 1-4,
//! a self edge on 3, and an edge from cell 1 to a spheroid object.

mod helpers;

use helpers::{Fixture, INTENSITY, OBJECT_TYPE};
use spheroid_analysis::neighbors::{AggregateRequest, NeighborAggregator, Reduction};
use spheroid_common::db::ObjectFilterRow;
use spheroid_common::{Error, MeasurementSelector, Predicate};

struct Neighborhood {
    fx: Fixture,
    cells: Vec<i64>,
    pd102: i64,
}

async fn neighborhood() -> Neighborhood {
    let fx = Fixture::new().await;
    fx.image(1, 1, 1, 0).await;
    let pd102 = fx.intensity("FullStack", 1.0, "Pd102", 1.0).await;

    let mut cells = Vec::new();
    for n in 1..=4 {
        let id = fx.object(1, n).await;
        fx.set(id, pd102, n as f64).await;
        cells.push(id);
    }
    let spheroid = fx.object_of_type(1, "sphere", 1).await;
    fx.set(spheroid, pd102, 100.0).await;

    fx.relate("neighbor", cells[0], cells[1]).await;
    fx.relate("neighbor", cells[1], cells[2]).await;
    fx.relate("neighbor", cells[0], cells[3]).await;
    fx.relate("neighbor", cells[2], cells[2]).await;
    fx.relate("neighbor", cells[0], spheroid).await;

    Neighborhood { fx, cells, pd102 }
}

fn request() -> AggregateRequest {
    let selector = MeasurementSelector::new()
        .stack("FullStack")
        .channel("Pd102")
        .measurement_name(INTENSITY);
    let mut request = AggregateRequest::new("neighbor", vec![selector], "Neighbors_");
    request.object_type = Some(OBJECT_TYPE.to_string());
    request
}

async fn derived_values(n: &Neighborhood, measurement_id: i64) -> Vec<Option<f64>> {
    let mut values = Vec::new();
    for cell in &n.cells {
        values.push(n.fx.stored_value(*cell, measurement_id).await);
    }
    values
}

#[tokio::test]
async fn test_mean_of_neighbors() {
    let n = neighborhood().await;
    let mut aggregator = NeighborAggregator::new(n.fx.store.clone(), 16);

    let summary = aggregator
        .aggregate(&request(), |v| Reduction::Mean.apply(v))
        .await
        .unwrap();
    assert_eq!(summary.edges, 4);
    assert_eq!(summary.objects_with_neighbors, 4);
    assert_eq!(summary.values_written, 4);
    assert_eq!(summary.derived.len(), 1);
    assert_eq!(summary.derived[0].measurement_name, "Neighbors_MeanIntensity");
    assert_eq!(summary.derived[0].source_measurement_id, n.pd102);

    let derived = summary.derived[0].measurement_id;
    assert_eq!(
        derived_values(&n, derived).await,
        vec![Some(3.0), Some(2.0), Some(2.0), Some(1.0)]
    );

    // Derived definition sits on the source plane
    let definitions = n.fx.store.measurement_definitions_by_id(&[derived]).await.unwrap();
    assert_eq!(definitions[0].channel_name.as_deref(), Some("Pd102"));

    // Source values untouched
    assert_eq!(n.fx.stored_value(n.cells[0], n.pd102).await, Some(1.0));
}

#[tokio::test]
async fn test_filtered_objects_drop_their_edges() {
    let n = neighborhood().await;
    let rows: Vec<ObjectFilterRow> = n
        .cells
        .iter()
        .map(|&object_id| ObjectFilterRow {
            object_id,
            value: object_id != n.cells[3],
        })
        .collect();
    n.fx.store.write_object_filter("keep", &rows, true).await.unwrap();

    let mut request = request();
    request.filter = Some(Predicate::filter("keep", true));
    let mut aggregator = NeighborAggregator::new(n.fx.store.clone(), 16);
    let summary = aggregator
        .aggregate(&request, |v| Reduction::Mean.apply(v))
        .await
        .unwrap();
    let derived = summary.derived[0].measurement_id;
    assert_eq!(
        derived_values(&n, derived).await,
        vec![Some(2.0), Some(2.0), Some(2.0), None]
    );

    // Kept edges: cell 4 still counts as a neighbor but gets no value
    request.drop_filtered_neighbors = false;
    aggregator
        .aggregate(&request, |v| Reduction::Mean.apply(v))
        .await
        .unwrap();
    assert_eq!(
        derived_values(&n, derived).await,
        vec![Some(3.0), Some(2.0), Some(2.0), None]
    );
}

#[tokio::test]
async fn test_rerun_replaces_previous_values() {
    let n = neighborhood().await;
    let mut aggregator = NeighborAggregator::new(n.fx.store.clone(), 16);

    let first = aggregator
        .aggregate(&request(), |v| Reduction::Mean.apply(v))
        .await
        .unwrap();
    let second = aggregator
        .aggregate(&request(), |v| Reduction::Max.apply(v))
        .await
        .unwrap();
    let derived = second.derived[0].measurement_id;
    assert_eq!(first.derived[0].measurement_id, derived);
    assert_eq!(
        derived_values(&n, derived).await,
        vec![Some(4.0), Some(3.0), Some(2.0), Some(1.0)]
    );
    assert_eq!(n.fx.row_count(derived).await, 4);
}

#[tokio::test]
async fn test_failing_reduction_writes_nothing() {
    let n = neighborhood().await;
    let mut aggregator = NeighborAggregator::new(n.fx.store.clone(), 16);

    let result = aggregator
        .aggregate(&request(), |_| Err(Error::InvalidInput("boom".to_string())))
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let registered = n
        .fx
        .store
        .find_measurement_definitions(&MeasurementSelector::new().measurement_name("Neighbors_MeanIntensity"))
        .await
        .unwrap();
    assert!(registered.is_empty());
}

#[tokio::test]
async fn test_prefix_rules() {
    let n = neighborhood().await;
    let mut aggregator = NeighborAggregator::new(n.fx.store.clone(), 16);

    let mut empty = request();
    empty.prefix = String::new();
    let result = aggregator.aggregate(&empty, |v| Reduction::Mean.apply(v)).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    aggregator
        .aggregate(&request(), |v| Reduction::Mean.apply(v))
        .await
        .unwrap();

    // Both MeanIntensity and Neighbors_MeanIntensity now match; the derived
    // name of the first is the second source
    let mut clash = request();
    clash.selectors = vec![MeasurementSelector::new().stack("FullStack").channel("Pd102")];
    let result = aggregator.aggregate(&clash, |v| Reduction::Mean.apply(v)).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let nested = n
        .fx
        .store
        .find_measurement_definitions(&MeasurementSelector::new().measurement_name("Neighbors_Neighbors_MeanIntensity"))
        .await
        .unwrap();
    assert!(nested.is_empty());
}
