//! Quality filters and filter composition against an in-memory experiment

mod helpers;

use helpers::{experiment_config, Fixture, OBJECT_TYPE};
use spheroid_analysis::filters::{
    and_filters, combine_hq, evaluate_ambiguity, evaluate_sphere, run_quality_filters, AmbiguityParams,
    FilterComposer, FilterSource, FilterTriplet, SphereParams, AMBIGUOUS_FILTER, HQ_FILTER, SPHERE_FILTER,
};
use spheroid_common::db::ObjectFilterRow;
use spheroid_common::{CompareOp, Error, MeasurementIndex, MeasurementSelector, Predicate};

/// Cells a..e with (sphere, other) intensities and distance to the nearest
/// other spheroid. Cell d has no other-channel value.
struct Cells {
    fx: Fixture,
    a: i64,
    b: i64,
    c: i64,
    d: i64,
    e: i64,
}

async fn cells() -> Cells {
    let fx = Fixture::new().await;
    fx.image(1, 1, 1, 0).await;
    let ir191 = fx.intensity("FullStack", 1.0, "Ir191", 1.0).await;
    let ir193 = fx.intensity("FullStack", 1.0, "Ir193", 1.0).await;
    let other = fx.intensity("DistStack", 1.0, "dist-other", 1.0).await;

    let rows = [
        (Some(5.0), Some(1.0), Some(3.0)),
        (Some(1.0), Some(5.0), Some(65534.0)),
        (Some(0.0), Some(0.0), Some(-10.0)),
        (Some(5.0), None, None),
        (Some(10.0), Some(2.0), Some(65534.0)),
    ];
    let mut ids = Vec::new();
    for (n, (sphere, rest, dist)) in rows.into_iter().enumerate() {
        let id = fx.object(1, n as i64 + 1).await;
        for (measurement, value) in [(ir191, sphere), (ir193, rest), (other, dist)] {
            if let Some(value) = value {
                fx.set(id, measurement, value).await;
            }
        }
        ids.push(id);
    }
    // A spheroid object must never appear in cell filters
    let spheroid = fx.object_of_type(1, "sphere", 1).await;
    fx.set(spheroid, ir191, 100.0).await;

    Cells {
        fx,
        a: ids[0],
        b: ids[1],
        c: ids[2],
        d: ids[3],
        e: ids[4],
    }
}

fn composer(fx: &Fixture) -> FilterComposer {
    FilterComposer::new(MeasurementIndex::new(fx.store.clone(), 16), OBJECT_TYPE)
}

fn verdict(table: &[(i64, Option<bool>)], object_id: i64) -> Option<bool> {
    table.iter().find(|(id, _)| *id == object_id).and_then(|(_, v)| *v)
}

#[tokio::test]
async fn test_sphere_membership() {
    let cells = cells().await;
    let mut composer = composer(&cells.fx);
    let params = SphereParams::from_config(&experiment_config()).unwrap();

    let table = evaluate_sphere(&mut composer, &params).await.unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(verdict(&table, cells.a), Some(true));
    assert_eq!(verdict(&table, cells.b), Some(false));
    assert_eq!(verdict(&table, cells.c), Some(false));
    assert_eq!(verdict(&table, cells.d), None);
    assert_eq!(verdict(&table, cells.e), Some(true));
}

#[tokio::test]
async fn test_raising_minfrac_never_adds_spheres() {
    let cells = cells().await;
    let mut composer = composer(&cells.fx);
    let mut params = SphereParams::from_config(&experiment_config()).unwrap();

    let loose = evaluate_sphere(&mut composer, &params).await.unwrap();
    params.minfrac = 4.9;
    params.floor = Some(0.5);
    let strict = evaluate_sphere(&mut composer, &params).await.unwrap();

    for (object_id, v) in &strict {
        if *v == Some(true) {
            assert_eq!(verdict(&loose, *object_id), Some(true));
        }
    }
    assert_eq!(verdict(&strict, cells.a), Some(true));
    assert_eq!(verdict(&strict, cells.e), Some(true));
    params.minfrac = 5.0;
    let stricter = evaluate_sphere(&mut composer, &params).await.unwrap();
    assert_eq!(verdict(&stricter, cells.a), Some(false));
}

#[tokio::test]
async fn test_ambiguity_bounds() {
    let cells = cells().await;
    let mut composer = composer(&cells.fx);
    let params = AmbiguityParams::from_config(&experiment_config());

    let table = evaluate_ambiguity(&mut composer, &params).await.unwrap();
    assert_eq!(verdict(&table, cells.a), Some(true));
    assert_eq!(verdict(&table, cells.b), Some(false));
    assert_eq!(verdict(&table, cells.c), Some(false));
    assert_eq!(verdict(&table, cells.d), None);

    let sphere_params = SphereParams::from_config(&experiment_config()).unwrap();
    let sphere = evaluate_sphere(&mut composer, &sphere_params).await.unwrap();
    let hq = combine_hq(&sphere, &table);
    assert_eq!(verdict(&hq, cells.a), Some(false));
    assert_eq!(verdict(&hq, cells.d), None);
    assert_eq!(verdict(&hq, cells.e), Some(true));
}

#[tokio::test]
async fn test_quality_filters_persist_and_rerun() {
    let cells = cells().await;
    let mut composer = composer(&cells.fx);
    let config = experiment_config();
    let sphere = SphereParams::from_config(&config).unwrap();
    let ambiguity = AmbiguityParams::from_config(&config);

    let summary = run_quality_filters(&mut composer, &sphere, &ambiguity, Some(HQ_FILTER), true)
        .await
        .unwrap();
    assert_eq!(summary.sphere.rows_written, 4);
    assert_eq!(summary.sphere.passing, 2);
    assert_eq!(summary.ambiguous.passing, 1);
    assert_eq!(summary.hq_passing, 1);

    let hq = composer.read_filter(HQ_FILTER).await.unwrap();
    assert_eq!(
        hq.iter().filter(|r| r.value).map(|r| r.object_id).collect::<Vec<_>>(),
        vec![cells.e]
    );
    assert!(hq.iter().all(|r| r.object_id != cells.d));

    // Overwriting reruns are idempotent
    let before: Vec<ObjectFilterRow> = composer.read_filter(SPHERE_FILTER).await.unwrap();
    run_quality_filters(&mut composer, &sphere, &ambiguity, Some(HQ_FILTER), true)
        .await
        .unwrap();
    assert_eq!(composer.read_filter(SPHERE_FILTER).await.unwrap(), before);

    // Without overwrite the existing rows collide
    let result = run_quality_filters(&mut composer, &sphere, &ambiguity, None, false).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
    assert_eq!(composer.read_filter(AMBIGUOUS_FILTER).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_threshold_predicate_and_filter_conjunction() {
    let cells = cells().await;
    let mut composer = composer(&cells.fx);

    let bright = FilterTriplet::new(
        MeasurementSelector::new().stack("FullStack").channel("Ir191"),
        CompareOp::Gt,
        2.0,
    );
    let predicate = composer.combine(Predicate::All, &[bright]).await.unwrap();
    let summary = composer
        .evaluate_and_store(FilterSource::Predicate(predicate), "is-bright", true)
        .await
        .unwrap();
    // Every cell gets a row; the spheroid object does not
    assert_eq!(summary.rows_written, 5);
    assert_eq!(summary.passing, 3);

    let params = SphereParams::from_config(&experiment_config()).unwrap();
    let table = evaluate_sphere(&mut composer, &params).await.unwrap();
    composer
        .evaluate_and_store(FilterSource::Table(table), SPHERE_FILTER, true)
        .await
        .unwrap();

    let both = and_filters(Predicate::object_type(OBJECT_TYPE), &["is-bright", SPHERE_FILTER]);
    let ids = cells.fx.store.query_object_ids(&both).await.unwrap();
    assert_eq!(ids, vec![cells.a, cells.e]);
}
