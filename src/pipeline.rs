//! Pipeline functions - run every source through load, detect, normalize and
//! validate, then merge the results into one run report
//!
//! Sources are independent: each runs on its own blocking worker with a time
//! bound, and a failing source is reported without affecting the others. The
//! merge happens in input order, so the report does not depend on which
//! worker finished first.

use crate::analytics::aggregate::{aggregate, AggregatedGroup, AggregationRequest};
use crate::analytics::alerts::{evaluate_alerts, Alert};
use crate::config::ReportConfig;
use crate::error::{AggregateError, LoadError, SourceError};
use crate::ingestion::load::{load_source, Source};
use crate::ingestion::normalize::{normalize_rows, NormalizeContext};
use crate::ingestion::registry::SchemaRegistry;
use crate::ingestion::types::{CanonicalField, CanonicalRecord, Platform, ValidationIssue};
use crate::ingestion::utils::implied_date_from_name;
use crate::ingestion::validate::{find_duplicate_positions, ValidationSummary, Validator};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A record together with the issues found for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckedRecord {
    pub record: CanonicalRecord,
    pub issues: Vec<ValidationIssue>,
}

impl CheckedRecord {
    pub fn has_error(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }
}

/// Result of one source's worker
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub name: String,
    pub platform: Platform,
    pub records: Vec<CheckedRecord>,
    /// Warnings for rows that could not be read
    pub skipped: Vec<ValidationIssue>,
}

/// Run one source through the per-source stages
///
/// A header that misses only the date column is still accepted when the
/// source name carries a reporting date range; its midpoint dates every row.
pub fn process_source(
    source: Source,
    registry: &SchemaRegistry,
    validator: &Validator,
) -> Result<SourceOutcome, SourceError> {
    let name = source.name.clone();
    let loaded = load_source(source)?;

    let (schema, implied_date) = match registry.detect(&loaded.headers) {
        Ok(schema) => (schema, None),
        Err(err) => {
            let implied = implied_date_from_name(&name).and_then(|date| {
                registry
                    .detect_allowing(&loaded.headers, &[CanonicalField::Date])
                    .ok()
                    .map(|schema| (schema, Some(date)))
            });
            match implied {
                Some(found) => {
                    info!("{} has no date column, using date implied by its name", name);
                    found
                }
                None => return Err(err.into()),
            }
        }
    };
    info!("Detected {} as {} export", name, schema.platform);
    debug!("Resolved columns for {}: {:?}", name, schema.columns);

    let platform = schema.platform.clone();
    let ctx = NormalizeContext {
        source: loaded.name.clone(),
        schema,
        implied_date,
    };
    let normalized = normalize_rows(loaded.rows, &ctx);

    if normalized.rows_seen() == 0 {
        return Err(LoadError::Empty { source_name: name }.into());
    }

    let records: Vec<CheckedRecord> = normalized
        .records
        .into_iter()
        .map(|record| CheckedRecord {
            issues: validator.validate(&record),
            record,
        })
        .collect();

    let summary = ValidationSummary::from_issues(records.iter().flat_map(|r| &r.issues));
    info!("Validated {} records from {}: {}", records.len(), name, summary);

    Ok(SourceOutcome {
        name,
        platform,
        records,
        skipped: normalized.skipped,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Processed {
        platform: Platform,
        records: usize,
        skipped_rows: usize,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub name: String,
    #[serde(flatten)]
    pub status: SourceStatus,
}

impl SourceReport {
    pub fn is_processed(&self) -> bool {
        matches!(self.status, SourceStatus::Processed { .. })
    }
}

/// Consolidated result of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    /// Records with no ERROR issue; these are aggregated
    pub valid: Vec<CanonicalRecord>,
    /// Records kept out of aggregation, with everything found for them
    pub excluded: Vec<CheckedRecord>,
    /// Every issue of the run: skipped rows, per-record findings, duplicates
    pub issues: Vec<ValidationIssue>,
    pub summary: ValidationSummary,
}

impl RunReport {
    /// Merge per-source results, in input order
    pub fn merge(results: Vec<(String, Result<SourceOutcome, SourceError>)>) -> Self {
        let mut report = RunReport::default();
        let mut checked: Vec<CheckedRecord> = Vec::new();

        for (name, result) in results {
            match result {
                Ok(outcome) => {
                    report.sources.push(SourceReport {
                        name,
                        status: SourceStatus::Processed {
                            platform: outcome.platform,
                            records: outcome.records.len(),
                            skipped_rows: outcome.skipped.len(),
                        },
                    });
                    report.issues.extend(outcome.skipped);
                    checked.extend(outcome.records);
                }
                Err(e) => {
                    error!("Source {} failed: {}", name, e);
                    report.sources.push(SourceReport {
                        name,
                        status: SourceStatus::Failed {
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        // Same rule as within one file, applied across every source
        let duplicates = find_duplicate_positions(checked.iter().map(|c| &c.record));
        if !duplicates.is_empty() {
            warn!("Found {} duplicate records", duplicates.len());
        }
        for (idx, issue) in duplicates {
            checked[idx].issues.push(issue);
        }

        for item in checked {
            report.issues.extend(item.issues.iter().cloned());
            if item.has_error() {
                report.excluded.push(item);
            } else {
                report.valid.push(item.record);
            }
        }
        report.summary = ValidationSummary::from_issues(&report.issues);

        report
    }

    pub fn groups(&self, request: &AggregationRequest) -> Result<Vec<AggregatedGroup>, AggregateError> {
        let groups = aggregate(&self.valid, request).map_err(|e| {
            error!("Aggregation failed: {}", e);
            e
        })?;
        info!("Aggregated {} valid records into {} groups", self.valid.len(), groups.len());
        Ok(groups)
    }

    pub fn alerts(&self, groups: &[AggregatedGroup], config: &ReportConfig) -> Vec<Alert> {
        let alerts = evaluate_alerts(groups, &config.thresholds);
        info!("Raised {} alerts", alerts.len());
        alerts
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let processed = self.sources.iter().filter(|s| s.is_processed()).count();
        write!(
            f,
            "{} sources ({} processed, {} failed), {} valid records, {} excluded, {}",
            self.sources.len(),
            processed,
            self.sources.len() - processed,
            self.valid.len(),
            self.excluded.len(),
            self.summary
        )
    }
}

/// Run blocking work for one source once a permit is free, bounded by `limit`
///
/// The limit starts counting when the work starts, not while it waits for a
/// permit.
async fn run_worker<F>(
    name: String,
    work: F,
    semaphore: Arc<Semaphore>,
    limit: Duration,
) -> Result<SourceOutcome, SourceError>
where
    F: FnOnce() -> Result<SourceOutcome, SourceError> + Send + 'static,
{
    let worker_error = |reason: String| SourceError::Worker {
        source_name: name.clone(),
        reason,
    };

    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| worker_error(e.to_string()))?;

    let work = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(limit, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(worker_error(join_error.to_string())),
        Err(_) => Err(SourceError::TimedOut {
            source_name: name.clone(),
            limit,
        }),
    }
}

/// Process every source with the built-in platform schemas
pub async fn run(sources: Vec<Source>, config: &ReportConfig) -> RunReport {
    run_with_registry(sources, config, SchemaRegistry::builtin()).await
}

/// Read sources from disk and process them; unreadable files are reported
/// like any other failed source
pub async fn run_paths(paths: &[PathBuf], config: &ReportConfig) -> RunReport {
    let inputs = paths
        .iter()
        .map(|path| {
            Source::from_path(path).map_err(|e| (path.display().to_string(), SourceError::from(e)))
        })
        .collect();
    run_inputs(inputs, config, SchemaRegistry::builtin()).await
}

pub async fn run_with_registry(
    sources: Vec<Source>,
    config: &ReportConfig,
    registry: SchemaRegistry,
) -> RunReport {
    run_inputs(sources.into_iter().map(Ok).collect(), config, registry).await
}

type Input = Result<Source, (String, SourceError)>;

enum Pending {
    Running(String, JoinHandle<Result<SourceOutcome, SourceError>>),
    Failed(String, SourceError),
}

async fn run_inputs(inputs: Vec<Input>, config: &ReportConfig, registry: SchemaRegistry) -> RunReport {
    info!("Processing {} sources", inputs.len());

    let registry = Arc::new(registry);
    let validator = Arc::new(Validator::new(&config.validation));
    let semaphore = Arc::new(Semaphore::new(config.max_parallel_sources.max(1)));

    let pending: Vec<Pending> = inputs
        .into_iter()
        .map(|input| match input {
            Ok(source) => {
                let name = source.name.clone();
                let registry = registry.clone();
                let validator = validator.clone();
                let handle = tokio::spawn(run_worker(
                    name.clone(),
                    move || process_source(source, &registry, &validator),
                    semaphore.clone(),
                    config.source_timeout,
                ));
                Pending::Running(name, handle)
            }
            Err((name, e)) => Pending::Failed(name, e),
        })
        .collect();

    let mut results = Vec::with_capacity(pending.len());
    for item in pending {
        match item {
            Pending::Running(name, handle) => {
                let result = handle.await.unwrap_or_else(|e| {
                    Err(SourceError::Worker {
                        source_name: name.clone(),
                        reason: e.to_string(),
                    })
                });
                results.push((name, result));
            }
            Pending::Failed(name, e) => results.push((name, Err(e))),
        }
    }

    let report = RunReport::merge(results);
    info!("Run complete: {}", report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectError;
    use crate::ingestion::types::Severity;

    const TIKTOK: &str = "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n\
        2024-01-01,Spring,$100.00,10000,500,25,$400.00\n\
        2024-01-02,Spring,$100.00,10000,500,25,$400.00\n";

    fn mock_source(name: &str, text: &str) -> Source {
        Source::from_bytes(name, text.as_bytes().to_vec())
    }

    fn process(name: &str, text: &str) -> Result<SourceOutcome, SourceError> {
        process_source(
            mock_source(name, text),
            &SchemaRegistry::builtin(),
            &Validator::default(),
        )
    }

    #[test]
    fn test_process_source() {
        let outcome = process("tiktok.csv", TIKTOK).unwrap();
        assert_eq!(outcome.platform, Platform::TikTok);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.issues.is_empty()));
    }

    #[test]
    fn test_unknown_platform() {
        let err = process("mystery.csv", "foo,bar\n1,2\n").unwrap_err();
        assert!(matches!(err, SourceError::Detect(DetectError::UnknownPlatform { .. })));
    }

    #[test]
    fn test_header_only_source_is_empty() {
        let err = process(
            "tiktok.csv",
            "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n",
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Load(LoadError::Empty { .. })));
    }

    #[test]
    fn test_date_from_source_name() {
        let outcome = process(
            "tiktok (2025-09-27 to 2025-10-27).csv",
            "Ad name,Ad group name,Cost,Impressions,Clicks (destination),Conversions,Revenue\n\
             clip.mp4,Group A,10,1000,20,1,30\n",
        )
        .unwrap();

        assert_eq!(
            outcome.records[0].record.date.get(),
            chrono::NaiveDate::from_ymd_opt(2025, 10, 12)
        );
    }

    #[test]
    fn test_merge_splits_valid_and_excluded() {
        let bad = "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n\
            2024-01-03,Spring,abc,10000,500,25,400\n\
            2024-01-04,Spring,100,10,500,25,400\n";

        let report = RunReport::merge(vec![
            ("tiktok.csv".to_string(), process("tiktok.csv", TIKTOK)),
            ("bad.csv".to_string(), process("bad.csv", bad)),
            ("mystery.csv".to_string(), process("mystery.csv", "foo\n1\n")),
        ]);

        assert_eq!(report.sources.len(), 3);
        assert!(!report.sources[2].is_processed());
        assert_eq!(report.valid.len(), 3);
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].record.origin.line, 2);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 1);
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.field == Some(CanonicalField::Clicks)));
    }

    #[test]
    fn test_duplicates_across_sources() {
        let report = RunReport::merge(vec![
            ("a.csv".to_string(), process("a.csv", TIKTOK)),
            ("b.csv".to_string(), process("b.csv", TIKTOK)),
        ]);

        assert_eq!(report.valid.len(), 4);
        assert_eq!(report.summary.warnings, 2);
        assert!(report.issues.iter().all(|i| &*i.record.source == "b.csv"));
    }

    #[tokio::test]
    async fn test_run_reports_each_source() {
        let config = ReportConfig::default();
        let report = run(
            vec![
                mock_source("tiktok.csv", TIKTOK),
                mock_source("empty.csv", ""),
            ],
            &config,
        )
        .await;

        assert_eq!(report.sources[0].name, "tiktok.csv");
        assert!(report.sources[0].is_processed());
        assert!(matches!(report.sources[1].status, SourceStatus::Failed { .. }));
        assert_eq!(report.valid.len(), 2);
        assert_eq!(
            report.to_string(),
            "2 sources (1 processed, 1 failed), 2 valid records, 0 excluded, 0 errors, 0 warnings"
        );
    }

    #[tokio::test]
    async fn test_run_paths_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("tiktok.csv");
        std::fs::write(&good, TIKTOK).unwrap();
        let missing = dir.path().join("missing.csv");

        let report = run_paths(&[good, missing], &ReportConfig::default()).await;

        assert_eq!(report.sources.len(), 2);
        assert!(report.sources[0].is_processed());
        match &report.sources[1].status {
            SourceStatus::Failed { reason } => assert!(reason.contains("missing.csv")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(report.valid.len(), 2);
    }

    #[tokio::test]
    async fn test_huge_cost_ratio_stays_a_row_warning() {
        let text = "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n\
            2024-01-01,Spring,79228162514264337593543950335,1000,0.5,0,0\n\
            2024-01-02,Spring,$100.00,10000,500,25,$400.00\n";

        let report = run(vec![mock_source("tiktok.csv", text)], &ReportConfig::default()).await;

        assert!(report.sources[0].is_processed());
        assert_eq!(report.valid.len(), 2);
        assert_eq!(report.summary.errors, 0);
        assert!(report
            .issues
            .iter()
            .any(|i| i.record.line == 2 && i.message.contains("Cost per click")));
    }

    #[test]
    fn test_overflowing_groups_are_an_error() {
        let text = "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n\
            2024-01-01,Spring,50000000000000000000000000000,1000,10,0,0\n\
            2024-01-02,Spring,50000000000000000000000000000,1000,10,0,0\n";
        let report = RunReport::merge(vec![("tiktok.csv".to_string(), process("tiktok.csv", text))]);
        assert_eq!(report.valid.len(), 2);

        let request = AggregationRequest::new(
            crate::analytics::aggregate::Grouping::default(),
            crate::analytics::aggregate::TimeBucket::AllTime,
        );
        assert!(matches!(
            report.groups(&request),
            Err(AggregateError::Overflow { .. })
        ));
    }

    #[test]
    fn test_duplicate_warning_kept_on_excluded_record() {
        let negative = "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n\
            2024-01-01,Spring,-5,10000,500,25,400\n";

        let report = RunReport::merge(vec![
            ("a.csv".to_string(), process("a.csv", negative)),
            ("b.csv".to_string(), process("b.csv", negative)),
        ]);

        assert_eq!(report.excluded.len(), 2);
        let repeat = &report.excluded[1];
        assert_eq!(&*repeat.record.origin.source, "b.csv");
        assert!(repeat.issues.iter().any(|i| i.message.starts_with("Duplicate record")));
        assert!(!report.excluded[0]
            .issues
            .iter()
            .any(|i| i.message.starts_with("Duplicate record")));
        assert_eq!(report.summary, ValidationSummary { errors: 2, warnings: 1 });
    }

    #[tokio::test]
    async fn test_slow_source_times_out_while_others_finish() {
        let semaphore = Arc::new(Semaphore::new(2));
        let limit = Duration::from_millis(200);

        let slow = tokio::spawn(run_worker(
            "slow.csv".to_string(),
            || {
                std::thread::sleep(Duration::from_secs(1));
                process("slow.csv", TIKTOK)
            },
            semaphore.clone(),
            limit,
        ));
        let fast = tokio::spawn(run_worker(
            "fast.csv".to_string(),
            || process("fast.csv", TIKTOK),
            semaphore.clone(),
            limit,
        ));

        let slow = slow.await.unwrap();
        let fast = fast.await.unwrap();
        assert!(matches!(
            slow,
            Err(SourceError::TimedOut { ref source_name, .. }) if source_name == "slow.csv"
        ));

        let report = RunReport::merge(vec![
            ("slow.csv".to_string(), slow),
            ("fast.csv".to_string(), fast),
        ]);
        match &report.sources[0].status {
            SourceStatus::Failed { reason } => {
                assert_eq!(reason, "slow.csv exceeded the 200ms processing limit")
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(report.sources[1].is_processed());
        assert_eq!(report.valid.len(), 2);
    }
}
