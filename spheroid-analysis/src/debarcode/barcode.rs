//! Barcode keys: parsing condition barcodes and decoding on/off vectors

use serde::Serialize;
use spheroid_common::db::Condition;
use spheroid_common::{Error, Result};

/// Outcome of decoding one object's thresholded vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DecodedBarcode {
    Condition(i64),
    /// Matched no condition, or a barcode channel value was missing
    NotValid,
}

impl DecodedBarcode {
    pub fn condition_id(self) -> Option<i64> {
        match self {
            DecodedBarcode::Condition(id) => Some(id),
            DecodedBarcode::NotValid => None,
        }
    }
}

/// Parse a stored barcode such as `"1,0,1"` or `"101"` into channel states
///
/// Separators (`,` `;` `-` `_` and whitespace) are ignored. The number of
/// digits must equal `n_channels`.
pub fn parse_barcode(barcode: &str, n_channels: usize) -> Result<Vec<bool>> {
    let mut states = Vec::with_capacity(n_channels);
    for c in barcode.chars() {
        match c {
            '0' => states.push(false),
            '1' => states.push(true),
            ',' | ';' | '-' | '_' => {}
            c if c.is_whitespace() => {}
            other => {
                return Err(Error::InvalidInput(format!(
                    "barcode '{}' contains '{}', expected only 0/1 digits",
                    barcode, other
                )))
            }
        }
    }
    if states.len() != n_channels {
        return Err(Error::InvalidInput(format!(
            "barcode '{}' has {} digits but {} barcode channels are configured",
            barcode,
            states.len(),
            n_channels
        )));
    }
    Ok(states)
}

/// Expected on/off vectors of the conditions sharing one (plate, sample block)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarcodeLookup {
    n_channels: usize,
    entries: Vec<(i64, Vec<bool>)>,
}

impl BarcodeLookup {
    /// Build from the conditions of one block
    ///
    /// Two conditions with the same barcode in one block cannot be told
    /// apart and are rejected.
    pub fn from_conditions(conditions: &[Condition], n_channels: usize) -> Result<Self> {
        let mut entries: Vec<(i64, Vec<bool>)> = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let states = parse_barcode(&condition.barcode, n_channels)?;
            if let Some((other, _)) = entries.iter().find(|(_, s)| *s == states) {
                return Err(Error::InvalidInput(format!(
                    "conditions {} and {} share barcode '{}' on plate {} block {}",
                    other, condition.condition_id, condition.barcode, condition.plate_id, condition.sample_block
                )));
            }
            entries.push((condition.condition_id, states));
        }
        entries.sort_by_key(|(id, _)| *id);
        Ok(Self { n_channels, entries })
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact-equality match of `states` against every condition
    pub fn decode(&self, states: &[bool]) -> DecodedBarcode {
        self.entries
            .iter()
            .find(|(_, expected)| expected.as_slice() == states)
            .map(|(id, _)| DecodedBarcode::Condition(*id))
            .unwrap_or(DecodedBarcode::NotValid)
    }
}
