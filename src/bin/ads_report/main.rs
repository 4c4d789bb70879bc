//! Ads report orchestrator - runs load, normalize, validate, aggregate and alert
//! over the export files named on the command line
//!
//! Logs go to stderr; the collaborator outputs (valid records, excluded
//! records, aggregated groups, alerts, creator and video summaries) are
//! written to stdout as JSON.

use ads_reporting::analytics::compare::top_groups;
use ads_reporting::analytics::creators::{creator_summaries, video_summaries};
use ads_reporting::analytics::{AggregationRequest, Grouping, Metric, TimeBucket};
use ads_reporting::pipeline::run_paths;
use ads_reporting::ReportConfig;
use anyhow::{bail, Context, Result};
use serde_json::json;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TOP_GROUPS: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = ReportConfig::from_env().context("Invalid configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse(env::args().skip(1))?;
    info!("Starting ads report for {} sources", args.paths.len());

    let request = AggregationRequest::new(
        args.grouping.unwrap_or_else(|| config.grouping.clone()),
        args.bucket.unwrap_or(config.bucket),
    );

    // Step 1: per-source load, detect, normalize, validate
    info!("Step 1/3: Processing sources...");
    let report = run_paths(&args.paths, &config).await;
    info!("✓ {}", report);

    // Step 2: aggregate the valid records
    info!("Step 2/3: Aggregating...");
    let groups = report.groups(&request).context("Aggregation failed")?;
    info!("✓ {} groups", groups.len());

    // Step 3: alerts
    info!("Step 3/3: Evaluating alerts...");
    let alerts = report.alerts(&groups, &config);
    info!("✓ {} alerts", alerts.len());

    let top_by_roas = top_groups(&groups, Metric::Roas, TOP_GROUPS);
    let creators = creator_summaries(&report.valid).context("Creator summaries failed")?;
    let videos = video_summaries(&report.valid).context("Video summaries failed")?;

    let output = json!({
        "sources": report.sources,
        "summary": {
            "valid_records": report.valid.len(),
            "excluded_records": report.excluded.len(),
            "errors": report.summary.errors,
            "warnings": report.summary.warnings,
        },
        "valid": report.valid,
        "excluded": report.excluded,
        "issues": report.issues,
        "groups": groups,
        "top_by_roas": top_by_roas,
        "alerts": alerts,
        "creators": creators,
        "videos": videos,
    });

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &output).context("Failed to write report")?;
    writeln!(stdout)?;

    Ok(())
}

/// Command line: export paths, plus optional `--group-by` and `--bucket`
#[derive(Debug)]
struct Args {
    paths: Vec<PathBuf>,
    grouping: Option<Grouping>,
    bucket: Option<TimeBucket>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args {
            paths: Vec::new(),
            grouping: None,
            bucket: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--group-by" => {
                    let value = args.next().context("--group-by needs a value")?;
                    parsed.grouping = Some(Grouping::parse(&value).map_err(anyhow::Error::msg)?);
                }
                "--bucket" => {
                    let value = args.next().context("--bucket needs a value")?;
                    parsed.bucket = Some(
                        TimeBucket::from_name(&value)
                            .with_context(|| format!("Unknown bucket '{}'", value))?,
                    );
                }
                _ => parsed.paths.push(PathBuf::from(arg)),
            }
        }

        if parsed.paths.is_empty() {
            bail!("Usage: ads-report [--group-by DIMS] [--bucket day|week|month|quarter|all] <export>...");
        }

        Ok(parsed)
    }
}
