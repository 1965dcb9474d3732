//! Condition summary over debarcoded images

mod helpers;

use helpers::{Fixture, OBJECT_TYPE};
use spheroid_analysis::condition_summary;
use spheroid_common::db::images::write_image_barcode_on;
use spheroid_common::db::{ImageBarcodeStats, ObjectFilterRow};
use spheroid_common::Error;

async fn resolve(fx: &Fixture, image_id: i64, condition_id: i64, highest: i64, valid: i64) {
    let mut conn = fx.store.pool().acquire().await.unwrap();
    write_image_barcode_on(
        &mut *conn,
        &ImageBarcodeStats {
            image_id,
            condition_id: Some(condition_id),
            bc_highest_count: highest,
            bc_second_count: 0,
            bc_invalid: 0,
            bc_valid: valid,
        },
        None,
        "2026-01-01T00:00:00+00:00",
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_summary_requires_debarcoding() {
    let fx = Fixture::new().await;
    fx.condition(1, "ctrl", "10", 1, 0).await;
    fx.image(1, 1, 1, 0).await;
    fx.object(1, 1).await;

    let result = condition_summary(&fx.store, Some(OBJECT_TYPE), None).await;
    assert!(matches!(result, Err(Error::Precondition(_))));
}

#[tokio::test]
async fn test_summary_counts_per_condition() {
    let fx = Fixture::new().await;
    fx.condition(1, "ctrl", "10", 1, 0).await;
    fx.condition(2, "drug", "01", 1, 0).await;
    for image_id in 1..=4 {
        fx.image(image_id, image_id, 1, 0).await;
    }

    // (image, cells): image 4 is never debarcoded
    let mut cells = Vec::new();
    for (image_id, count) in [(1, 2), (2, 1), (3, 3), (4, 1)] {
        for n in 1..=count {
            cells.push((image_id, fx.object(image_id, n).await));
        }
    }
    fx.object_of_type(1, "sphere", 1).await;

    resolve(&fx, 1, 1, 2, 3).await;
    resolve(&fx, 2, 1, 4, 5).await;
    resolve(&fx, 3, 2, 3, 3).await;

    let summary = condition_summary(&fx.store, Some(OBJECT_TYPE), None).await.unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].condition_id, 1);
    assert_eq!(summary[0].condition_name, "ctrl");
    assert_eq!(summary[0].time_point.as_deref(), Some("24h"));
    assert_eq!(summary[0].images, 2);
    assert_eq!(summary[0].objects, 3);
    assert_eq!(summary[0].mean_highest_count, Some(3.0));
    assert_eq!(summary[0].mean_valid, Some(4.0));
    assert_eq!(summary[1].images, 1);
    assert_eq!(summary[1].objects, 3);

    // Every object type counts without a type restriction
    let all = condition_summary(&fx.store, None, None).await.unwrap();
    assert_eq!(all[0].objects, 4);

    // Only cells of image 3 pass the filter
    let rows: Vec<ObjectFilterRow> = cells
        .iter()
        .map(|&(image_id, object_id)| ObjectFilterRow {
            object_id,
            value: image_id == 3,
        })
        .collect();
    fx.store.write_object_filter("keep", &rows, true).await.unwrap();

    let filtered = condition_summary(&fx.store, Some(OBJECT_TYPE), Some("keep")).await.unwrap();
    assert_eq!(filtered[0].objects, 0);
    assert_eq!(filtered[0].images, 2);
    assert_eq!(filtered[1].objects, 3);
}
