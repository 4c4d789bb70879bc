// Library for ads performance ingestion and reporting

pub mod analytics;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod pipeline;

pub use config::ReportConfig;
pub use error::{AggregateError, ConfigError, DetectError, LoadError, SourceError};
pub use pipeline::{run, RunReport};
