//! Per-image vote aggregation

use crate::debarcode::barcode::DecodedBarcode;
use spheroid_common::db::ImageBarcodeStats;
use std::collections::BTreeMap;

/// Tally one image's decoded objects
///
/// The image condition is the most voted condition; equal counts go to the
/// lowest condition id. Not-valid objects only count toward `bc_invalid`.
pub fn aggregate_votes(image_id: i64, decoded: &[DecodedBarcode]) -> ImageBarcodeStats {
    let mut votes: BTreeMap<i64, i64> = BTreeMap::new();
    let mut invalid = 0;
    for d in decoded {
        match d {
            DecodedBarcode::Condition(id) => *votes.entry(*id).or_insert(0) += 1,
            DecodedBarcode::NotValid => invalid += 1,
        }
    }

    let mut ranked: Vec<(i64, i64)> = votes.into_iter().collect();
    ranked.sort_by(|(id_a, count_a), (id_b, count_b)| count_b.cmp(count_a).then(id_a.cmp(id_b)));

    ImageBarcodeStats {
        image_id,
        condition_id: ranked.first().map(|(id, _)| *id),
        bc_highest_count: ranked.first().map(|(_, c)| *c).unwrap_or(0),
        bc_second_count: ranked.get(1).map(|(_, c)| *c).unwrap_or(0),
        bc_invalid: invalid,
        bc_valid: ranked.iter().map(|(_, c)| c).sum(),
    }
}
