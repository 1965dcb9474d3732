//! # Spheroid Common Library
//!
//! Shared code for the spheroid analysis toolkit:
//! - Database schema, models and the typed tabular store
//! - Object predicates and their SQL lowering
//! - Measurement selector resolution and annotated matrices
//! - Configuration loading
//! - Error taxonomy

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod matrix;
pub mod measurement_index;
pub mod predicate;

pub use error::{Error, Result};
pub use matrix::AnnotatedMatrix;
pub use measurement_index::{MeasurementIndex, MeasurementSelector};
pub use predicate::{ColumnRef, CompareOp, Literal, Predicate};
