//! Ranking and period-over-period comparison

use crate::analytics::aggregate::{total_within, AggregatedGroup, DateRange};
use crate::analytics::kpi::{Metric, Totals};
use crate::error::AggregateError;
use crate::ingestion::types::CanonicalRecord;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Best `limit` groups by a metric, highest first
///
/// Groups where the metric is undefined are left out rather than ranked as
/// zero. Equal values keep their input order.
pub fn top_groups(groups: &[AggregatedGroup], metric: Metric, limit: usize) -> Vec<&AggregatedGroup> {
    let mut ranked: Vec<(Decimal, &AggregatedGroup)> = groups
        .iter()
        .filter_map(|g| g.totals.metric(metric).map(|value| (value, g)))
        .collect();

    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().take(limit).map(|(_, g)| g).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricChange {
    pub current: Option<Decimal>,
    pub previous: Option<Decimal>,
    /// (current - previous) / previous; `None` when previous is 0 or undefined
    pub change: Option<Decimal>,
}

impl MetricChange {
    fn between(current: Option<Decimal>, previous: Option<Decimal>) -> Self {
        let change = match (current, previous) {
            (Some(cur), Some(prev)) => cur.checked_sub(prev).and_then(|diff| diff.checked_div(prev)),
            _ => None,
        };
        Self {
            current,
            previous,
            change,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodComparison {
    pub current: Totals,
    pub previous: Totals,
    pub changes: BTreeMap<Metric, MetricChange>,
}

pub fn compare_totals(current: Totals, previous: Totals) -> PeriodComparison {
    let changes = Metric::ALL
        .into_iter()
        .map(|metric| {
            (
                metric,
                MetricChange::between(current.metric(metric), previous.metric(metric)),
            )
        })
        .collect();

    PeriodComparison {
        current,
        previous,
        changes,
    }
}

/// Compare the same record set over two date ranges, e.g. week over week
pub fn compare_periods(
    records: &[CanonicalRecord],
    current: &DateRange,
    previous: &DateRange,
) -> Result<PeriodComparison, AggregateError> {
    Ok(compare_totals(
        total_within(records, current)?,
        total_within(records, previous)?,
    ))
}
