//! spheroid-analysis library interface
//!
//! Analysis stages over the experiment database: filter composition and
//! quality filters, barcode debarcoding, neighbor aggregation, condition
//! summaries and CSV ingest. The `spheroid-analysis` binary wires them to
//! the command line.

pub mod debarcode;
pub mod filters;
pub mod ingest;
pub mod neighbors;
pub mod summary;

pub use debarcode::{DebarcodeParams, DebarcodeSummary, Debarcoder};
pub use filters::FilterComposer;
pub use neighbors::{AggregateRequest, NeighborAggregator, Reduction};
pub use summary::{condition_summary, ConditionSummary};
