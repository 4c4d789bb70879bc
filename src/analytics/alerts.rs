//! Alert functions - compare aggregated groups against performance thresholds

use crate::analytics::aggregate::{AggregatedGroup, GroupKey, Period};
use crate::analytics::kpi::{Metric, Totals};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Relative deviation above which an alert is HIGH
const HIGH_DEVIATION: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
/// Relative deviation from which an alert is at least MEDIUM
const MEDIUM_DEVIATION: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Alert bounds; `None` disables that alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertThresholds {
    pub target_roas: Option<Decimal>,
    pub target_ctr: Option<Decimal>,
    pub target_cvr: Option<Decimal>,
    pub max_cpp: Option<Decimal>,
    /// Spend above which a group without conversions is flagged
    pub no_conversion_spend: Option<Decimal>,
    pub gates: VolumeGates,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            target_roas: Some(Decimal::new(3, 0)),
            target_ctr: Some(Decimal::new(2, 2)),
            target_cvr: Some(Decimal::new(5, 2)),
            max_cpp: Some(Decimal::new(50, 0)),
            no_conversion_spend: Some(Decimal::new(500, 0)),
            gates: VolumeGates::default(),
        }
    }
}

/// Minimum volume a group must exceed before a KPI alert is raised on it;
/// `None` removes the gate
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGates {
    /// ROAS alerts need spend above this
    pub roas_min_spend: Option<Decimal>,
    /// CTR alerts need impressions above this
    pub ctr_min_impressions: Option<Decimal>,
    /// CVR alerts need clicks above this
    pub cvr_min_clicks: Option<Decimal>,
    /// CPP alerts need conversions above this
    pub cpp_min_conversions: Option<Decimal>,
}

impl Default for VolumeGates {
    fn default() -> Self {
        Self {
            roas_min_spend: Some(Decimal::new(100, 0)),
            ctr_min_impressions: Some(Decimal::new(1000, 0)),
            cvr_min_clicks: Some(Decimal::new(100, 0)),
            cpp_min_conversions: Some(Decimal::ZERO),
        }
    }
}

impl VolumeGates {
    /// No gates at all
    pub fn none() -> Self {
        Self {
            roas_min_spend: None,
            ctr_min_impressions: None,
            cvr_min_clicks: None,
            cpp_min_conversions: None,
        }
    }

    /// Whether a group has enough volume for an alert on `metric`
    fn admits(&self, metric: Metric, totals: &Totals) -> bool {
        let (gate, volume) = match metric {
            Metric::Roas => (self.roas_min_spend, totals.spend),
            Metric::Ctr => (self.ctr_min_impressions, totals.impressions),
            Metric::Cvr => (self.cvr_min_clicks, totals.clicks),
            Metric::Cpp => (self.cpp_min_conversions, totals.conversions),
            _ => return true,
        };
        gate.map_or(true, |min| volume > min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

impl AlertSeverity {
    /// Tier for a relative deviation from the threshold
    pub fn from_deviation(deviation: Decimal) -> Self {
        if deviation > HIGH_DEVIATION {
            AlertSeverity::High
        } else if deviation >= MEDIUM_DEVIATION {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::High => write!(f, "HIGH"),
            AlertSeverity::Medium => write!(f, "MEDIUM"),
            AlertSeverity::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub subject: GroupKey,
    pub period: Period,
    pub metric: Metric,
    pub observed: Decimal,
    pub threshold: Decimal,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Alert when observed < threshold
    Floor,
    /// Alert when observed > threshold
    Ceiling,
}

fn check(
    group: &AggregatedGroup,
    metric: Metric,
    threshold: Decimal,
    direction: Direction,
) -> Option<Alert> {
    let Some(observed) = group.totals.metric(metric) else {
        debug!("Skipping {} alert for {}: undefined", metric, group.key);
        return None;
    };

    let (breached, gap) = match direction {
        Direction::Floor => (observed < threshold, threshold.checked_sub(observed)),
        Direction::Ceiling => (observed > threshold, observed.checked_sub(threshold)),
    };
    if !breached {
        return None;
    }

    // A zero bound leaves the deviation undefined; any breach of it is HIGH
    let severity = gap
        .and_then(|gap| gap.checked_div(threshold.abs()))
        .map(AlertSeverity::from_deviation)
        .unwrap_or(AlertSeverity::High);

    let relation = match direction {
        Direction::Floor => "below target",
        Direction::Ceiling => "above maximum",
    };

    Some(Alert {
        severity,
        subject: group.key.clone(),
        period: group.period,
        metric,
        observed,
        threshold,
        message: format!(
            "{} {} {} for {} ({}): {} vs {}",
            metric.name().to_uppercase(),
            relation,
            severity,
            group.key,
            group.period,
            observed.round_dp(4),
            threshold
        ),
    })
}

fn no_conversion_check(group: &AggregatedGroup, limit: Decimal) -> Option<Alert> {
    let totals = &group.totals;
    if !(totals.conversions.is_zero() && totals.spend > limit) {
        return None;
    }

    Some(Alert {
        severity: AlertSeverity::High,
        subject: group.key.clone(),
        period: group.period,
        metric: Metric::Spend,
        observed: totals.spend,
        threshold: limit,
        message: format!(
            "Spent {} with no conversions for {} ({})",
            totals.spend, group.key, group.period
        ),
    })
}

/// Alerts for every group and configured threshold
///
/// KPI alerts are only raised on groups past the volume gates. Ordered by
/// severity, then subject, period and metric.
pub fn evaluate_alerts(groups: &[AggregatedGroup], thresholds: &AlertThresholds) -> Vec<Alert> {
    let checks = [
        (Metric::Roas, thresholds.target_roas, Direction::Floor),
        (Metric::Ctr, thresholds.target_ctr, Direction::Floor),
        (Metric::Cvr, thresholds.target_cvr, Direction::Floor),
        (Metric::Cpp, thresholds.max_cpp, Direction::Ceiling),
    ];

    let mut alerts: Vec<Alert> = groups
        .iter()
        .flat_map(|group| {
            checks
                .iter()
                .filter(|(metric, _, _)| {
                    let admitted = thresholds.gates.admits(*metric, &group.totals);
                    if !admitted {
                        debug!("Skipping {} alert for {}: volume below gate", metric, group.key);
                    }
                    admitted
                })
                .filter_map(|(metric, threshold, direction)| {
                    check(group, *metric, (*threshold)?, *direction)
                })
                .chain(
                    thresholds
                        .no_conversion_spend
                        .and_then(|limit| no_conversion_check(group, limit)),
                )
        })
        .collect();

    alerts.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.period.cmp(&b.period))
            .then_with(|| a.metric.cmp(&b.metric))
    });

    alerts
}
