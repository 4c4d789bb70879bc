use thiserror::Error;

/// A source that could not be read at all
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {source_name}: {source}")]
    Io {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{source_name} is empty")]
    Empty { source_name: String },

    #[error("{source_name} has no header row")]
    MissingHeader { source_name: String },

    #[error("CSV error in {source_name}: {source}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },

    #[error("workbook error in {source_name}: {reason}")]
    Workbook { source_name: String, reason: String },
}

/// Header row matched no registered platform schema
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unknown platform for columns {headers:?}")]
    UnknownPlatform { headers: Vec<String> },
}

/// Why a whole source was skipped
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error("{source_name} exceeded the {limit:?} processing limit")]
    TimedOut {
        source_name: String,
        limit: std::time::Duration,
    },

    #[error("worker for {source_name} failed: {reason}")]
    Worker { source_name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("{var} must be between {min} and {max}, got {value}")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Sums that do not fit a decimal
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("totals overflowed for {group} ({period})")]
    Overflow { group: String, period: String },
}
