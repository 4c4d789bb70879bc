//! Data ingestion module - functional pipeline from export files to validated records
//!
//! load -> registry (detect) -> normalize -> validate, one source at a time.

pub mod load;
pub mod normalize;
pub mod registry;
pub mod types;
pub mod utils;
pub mod validate;

pub use types::*;
