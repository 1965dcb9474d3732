//! Database schema and typed repository

pub mod filters;
pub mod images;
pub mod init;
pub mod measurements;
pub mod models;
pub mod predicate_sql;
pub mod relations;
pub mod store;

pub use init::*;
pub use models::*;
pub use store::TabularStore;
