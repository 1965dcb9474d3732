//! Intensity transforms and per-channel threshold strategies

use serde::Serialize;
use spheroid_common::config::TransformConfig;
use spheroid_common::{Error, Result};
use std::fmt;

/// Transform applied to scaled barcode intensities before thresholding
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub enum Transform {
    #[default]
    Identity,
    Log1p,
    Arcsinh { cofactor: f64 },
}

impl Transform {
    /// Transformed value; non-finite results count as missing
    pub fn apply(self, value: f64) -> Option<f64> {
        let out = match self {
            Transform::Identity => value,
            Transform::Log1p => value.ln_1p(),
            Transform::Arcsinh { cofactor } => (value / cofactor).asinh(),
        };
        out.is_finite().then_some(out)
    }
}

impl From<TransformConfig> for Transform {
    fn from(config: TransformConfig) -> Self {
        match config {
            TransformConfig::Identity => Transform::Identity,
            TransformConfig::Log1p => Transform::Log1p,
            TransformConfig::Arcsinh { cofactor } => Transform::Arcsinh { cofactor },
        }
    }
}

/// Threshold function over the present values of one channel in one group
pub type ThresholdFn = Box<dyn Fn(&[f64]) -> Result<f64> + Send + Sync>;

/// How per-channel thresholds are chosen
#[derive(Default)]
pub enum ThresholdStrategy {
    /// Mean of the channel over the group
    #[default]
    GroupMean,
    /// One fixed threshold per barcode channel, in channel order
    Explicit(Vec<f64>),
    /// Caller-supplied function; its errors abort debarcoding
    Custom(ThresholdFn),
}

impl fmt::Debug for ThresholdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdStrategy::GroupMean => f.write_str("GroupMean"),
            ThresholdStrategy::Explicit(values) => f.debug_tuple("Explicit").field(values).finish(),
            ThresholdStrategy::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl ThresholdStrategy {
    /// Thresholds for one group; `channels[c]` holds the present values of channel `c`
    pub fn thresholds(&self, channels: &[Vec<f64>]) -> Result<Vec<f64>> {
        match self {
            ThresholdStrategy::GroupMean => Ok(channels.iter().map(Vec::as_slice).map(mean).collect()),
            ThresholdStrategy::Explicit(thresholds) => {
                if thresholds.len() != channels.len() {
                    return Err(Error::InvalidInput(format!(
                        "{} explicit thresholds given for {} barcode channels",
                        thresholds.len(),
                        channels.len()
                    )));
                }
                Ok(thresholds.clone())
            }
            ThresholdStrategy::Custom(f) => channels.iter().map(|values| f(values)).collect(),
        }
    }
}

/// Subgroups receiving their own thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupBy {
    Image,
    Site,
    Plate,
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(GroupBy::Image),
            "site" => Ok(GroupBy::Site),
            "plate" => Ok(GroupBy::Plate),
            other => Err(format!("unknown groupby '{}' (image, site, plate)", other)),
        }
    }
}

/// Mean of the values, NaN when empty (every comparison against it is false)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
