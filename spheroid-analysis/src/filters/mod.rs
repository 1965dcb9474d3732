//! Object filters: predicate composition and derived quality flags

pub mod composer;
pub mod quality;

pub use composer::{and_filters, FilterComposer, FilterSource, FilterTriplet, FilterWriteSummary};
pub use quality::{
    combine_hq, evaluate_ambiguity, evaluate_sphere, run_quality_filters, AmbiguityParams, QualitySummary,
    SphereParams, AMBIGUOUS_FILTER, HQ_FILTER, SPHERE_FILTER,
};
