//! Run configuration loaded from environment variables
//!
//! Built once per run and passed by reference to every stage.

use crate::analytics::aggregate::{Grouping, TimeBucket};
use crate::analytics::alerts::{AlertThresholds, VolumeGates};
use crate::error::ConfigError;
use crate::ingestion::validate::ValidationLimits;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub thresholds: AlertThresholds,
    pub grouping: Grouping,
    pub bucket: TimeBucket,
    pub validation: ValidationLimits,
    pub source_timeout: Duration,
    pub max_parallel_sources: usize,
    pub log_level: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            grouping: Grouping::default(),
            bucket: TimeBucket::Week,
            validation: ValidationLimits::default(),
            source_timeout: Duration::from_secs(30),
            max_parallel_sources: 4,
            log_level: "info".to_string(),
        }
    }
}

impl ReportConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        build_config(|key| std::env::var(key))
    }

    /// Build from explicit key/value pairs instead of the process environment
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: std::collections::HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        build_config(|key| vars.get(key).cloned().ok_or(std::env::VarError::NotPresent))
    }
}

fn invalid(var: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

fn build_config<F>(lookup: F) -> Result<ReportConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    // Unset uses the default, empty disables
    let optional_decimal = |var: &str, default: &str| -> Result<Option<Decimal>, ConfigError> {
        let raw = or_default(var, default);
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        Decimal::from_str(raw)
            .map(Some)
            .map_err(|e| invalid(var, e))
    };

    let fraction = |var: &str, default: &str| -> Result<Option<Decimal>, ConfigError> {
        let value = optional_decimal(var, default)?;
        match value {
            Some(v) if v < Decimal::ZERO || v > Decimal::ONE => Err(ConfigError::OutOfRange {
                var: var.to_string(),
                value: v.to_string(),
                min: "0".to_string(),
                max: "1".to_string(),
            }),
            _ => Ok(value),
        }
    };

    let optional_date = |var: &str| -> Result<Option<NaiveDate>, ConfigError> {
        match lookup(var) {
            Ok(raw) if !raw.trim().is_empty() => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(Some)
                .map_err(|e| invalid(var, e)),
            _ => Ok(None),
        }
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(var, e))
    };

    let thresholds = AlertThresholds {
        target_roas: optional_decimal("ADS_TARGET_ROAS", "3.0")?,
        target_ctr: fraction("ADS_TARGET_CTR", "0.02")?,
        target_cvr: fraction("ADS_TARGET_CVR", "0.05")?,
        max_cpp: optional_decimal("ADS_MAX_CPP", "50.0")?,
        no_conversion_spend: optional_decimal("ADS_NO_CONVERSION_SPEND", "500")?,
        gates: VolumeGates {
            roas_min_spend: optional_decimal("ADS_ROAS_MIN_SPEND", "100")?,
            ctr_min_impressions: optional_decimal("ADS_CTR_MIN_IMPRESSIONS", "1000")?,
            cvr_min_clicks: optional_decimal("ADS_CVR_MIN_CLICKS", "100")?,
            cpp_min_conversions: optional_decimal("ADS_CPP_MIN_CONVERSIONS", "0")?,
        },
    };

    let grouping = Grouping::parse(&or_default("ADS_DEFAULT_GROUPING", "campaign"))
        .map_err(|reason| invalid("ADS_DEFAULT_GROUPING", reason))?;

    let bucket_name = or_default("ADS_DEFAULT_BUCKET", "week");
    let bucket = TimeBucket::from_name(&bucket_name)
        .ok_or_else(|| invalid("ADS_DEFAULT_BUCKET", format!("unknown bucket '{}'", bucket_name)))?;

    let validation = ValidationLimits {
        max_cpc: optional_decimal("ADS_MAX_CPC", "100")?,
        max_row_cpp: optional_decimal("ADS_MAX_ROW_CPP", "500")?,
        min_date: optional_date("ADS_MIN_DATE")?,
        max_date: optional_date("ADS_MAX_DATE")?,
    };

    if let (Some(min), Some(max)) = (validation.min_date, validation.max_date) {
        if min > max {
            return Err(ConfigError::OutOfRange {
                var: "ADS_MIN_DATE".to_string(),
                value: min.to_string(),
                min: "-".to_string(),
                max: max.to_string(),
            });
        }
    }

    let timeout_secs = parse_u64("ADS_SOURCE_TIMEOUT_SECS", "30")?;
    if timeout_secs == 0 {
        return Err(ConfigError::OutOfRange {
            var: "ADS_SOURCE_TIMEOUT_SECS".to_string(),
            value: "0".to_string(),
            min: "1".to_string(),
            max: u64::MAX.to_string(),
        });
    }
    let source_timeout = Duration::from_secs(timeout_secs);

    let max_parallel_sources = parse_u64("ADS_MAX_PARALLEL_SOURCES", "4")?;
    if max_parallel_sources == 0 {
        return Err(ConfigError::OutOfRange {
            var: "ADS_MAX_PARALLEL_SOURCES".to_string(),
            value: "0".to_string(),
            min: "1".to_string(),
            max: usize::MAX.to_string(),
        });
    }

    Ok(ReportConfig {
        thresholds,
        grouping,
        bucket,
        validation,
        source_timeout,
        max_parallel_sources: max_parallel_sources as usize,
        log_level: or_default("ADS_LOG_LEVEL", "info"),
    })
}
