//! Validate functions - turn canonical records into structured issues
//!
//! Validation never mutates or drops records. The pipeline decides inclusion
//! from the severity of what comes back: any ERROR excludes a record from
//! aggregation, WARNINGs are advisory.

use crate::ingestion::types::{
    CanonicalField, CanonicalRecord, FieldValue, Severity, ValidationIssue,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Row-level anomaly limits; `None` disables a check
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationLimits {
    pub max_cpc: Option<Decimal>,
    pub max_row_cpp: Option<Decimal>,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_cpc: Some(Decimal::from(100)),
            max_row_cpp: Some(Decimal::from(500)),
            min_date: None,
            max_date: None,
        }
    }
}

/// A single, independent check over one record
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    RequiredFields,
    NonNegative,
    ClicksWithinImpressions,
    ConversionsWithinClicks,
    ZeroSpendActivity,
    CpcCeiling(Decimal),
    CppCeiling(Decimal),
    DateWindow {
        min: Option<NaiveDate>,
        max: Option<NaiveDate>,
    },
}

const METRICS: [CanonicalField; 5] = [
    CanonicalField::Spend,
    CanonicalField::Impressions,
    CanonicalField::Clicks,
    CanonicalField::Conversions,
    CanonicalField::Revenue,
];

fn outcome_issue<T>(
    record: &CanonicalRecord,
    field: CanonicalField,
    value: &FieldValue<T>,
) -> Option<ValidationIssue> {
    match value {
        FieldValue::Present(_) => None,
        FieldValue::Missing => Some(ValidationIssue::error(
            &record.origin,
            Some(field),
            format!("Missing required field '{}'", field),
        )),
        FieldValue::Unparsable(raw) => Some(ValidationIssue::error(
            &record.origin,
            Some(field),
            format!("Could not parse {} from '{}'", field, raw),
        )),
    }
}

fn required_fields(record: &CanonicalRecord) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    issues.extend(outcome_issue(record, CanonicalField::Date, &record.date));
    issues.extend(outcome_issue(record, CanonicalField::Campaign, &record.campaign));
    for field in METRICS {
        if let Some(value) = record.metric(field) {
            issues.extend(outcome_issue(record, field, value));
        }
    }
    issues
}

fn non_negative(record: &CanonicalRecord) -> Vec<ValidationIssue> {
    METRICS
        .iter()
        .filter_map(|&field| {
            let value = record.metric(field)?.get()?;
            (value < Decimal::ZERO).then(|| {
                ValidationIssue::error(
                    &record.origin,
                    Some(field),
                    format!("Negative {}: {}", field, value),
                )
            })
        })
        .collect()
}

/// WARNING when spend per unit is above `max`
///
/// A ratio too large for a decimal is above any ceiling.
fn ceiling(
    record: &CanonicalRecord,
    label: &str,
    spend: Option<Decimal>,
    units: Option<Decimal>,
    max: Decimal,
) -> Vec<ValidationIssue> {
    let (Some(spend), Some(units)) = (spend, units) else {
        return Vec::new();
    };
    if units <= Decimal::ZERO {
        return Vec::new();
    }

    let message = match spend.checked_div(units) {
        Some(ratio) if ratio > max => format!("{} {} above {}", label, ratio.round_dp(2), max),
        Some(_) => return Vec::new(),
        None => format!("{} too large to represent, above {}", label, max),
    };
    vec![ValidationIssue::warning(
        &record.origin,
        Some(CanonicalField::Spend),
        message,
    )]
}

impl Rule {
    pub fn check(&self, record: &CanonicalRecord) -> Vec<ValidationIssue> {
        let spend = record.spend.get();
        let impressions = record.impressions.get();
        let clicks = record.clicks.get();
        let conversions = record.conversions.get();

        match self {
            Rule::RequiredFields => required_fields(record),
            Rule::NonNegative => non_negative(record),
            Rule::ClicksWithinImpressions => match (clicks, impressions) {
                (Some(c), Some(i)) if c > i => vec![ValidationIssue::warning(
                    &record.origin,
                    Some(CanonicalField::Clicks),
                    format!("Clicks ({}) exceed impressions ({})", c, i),
                )],
                _ => Vec::new(),
            },
            Rule::ConversionsWithinClicks => match (conversions, clicks) {
                (Some(conv), Some(c)) if conv > c => vec![ValidationIssue::warning(
                    &record.origin,
                    Some(CanonicalField::Conversions),
                    format!("Conversions ({}) exceed clicks ({})", conv, c),
                )],
                _ => Vec::new(),
            },
            Rule::ZeroSpendActivity => {
                let active = impressions.map_or(false, |i| i > Decimal::ZERO)
                    || clicks.map_or(false, |c| c > Decimal::ZERO);
                if spend == Some(Decimal::ZERO) && active {
                    vec![ValidationIssue::warning(
                        &record.origin,
                        Some(CanonicalField::Spend),
                        "Zero spend with recorded impressions or clicks".to_string(),
                    )]
                } else {
                    Vec::new()
                }
            }
            Rule::CpcCeiling(max) => ceiling(record, "Cost per click", spend, clicks, *max),
            Rule::CppCeiling(max) => ceiling(record, "Cost per conversion", spend, conversions, *max),
            Rule::DateWindow { min, max } => {
                let Some(date) = record.date.get() else {
                    return Vec::new();
                };
                let too_early = min.map_or(false, |m| date < m);
                let too_late = max.map_or(false, |m| date > m);
                if too_early || too_late {
                    vec![ValidationIssue::warning(
                        &record.origin,
                        Some(CanonicalField::Date),
                        format!("Date {} outside the accepted window", date),
                    )]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    /// Standard rule set with the given anomaly limits
    pub fn new(limits: &ValidationLimits) -> Self {
        let mut rules = vec![
            Rule::RequiredFields,
            Rule::NonNegative,
            Rule::ClicksWithinImpressions,
            Rule::ConversionsWithinClicks,
            Rule::ZeroSpendActivity,
        ];
        rules.extend(limits.max_cpc.map(Rule::CpcCeiling));
        rules.extend(limits.max_row_cpp.map(Rule::CppCeiling));
        if limits.min_date.is_some() || limits.max_date.is_some() {
            rules.push(Rule::DateWindow {
                min: limits.min_date,
                max: limits.max_date,
            });
        }
        Self { rules }
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Issues for one record, in rule order
    pub fn validate(&self, record: &CanonicalRecord) -> Vec<ValidationIssue> {
        self.rules.iter().flat_map(|rule| rule.check(record)).collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(&ValidationLimits::default())
    }
}

/// WARNING for every occurrence of a natural key after the first
///
/// Records whose key cannot be formed already carry a required-field ERROR
/// and are not considered.
pub fn find_duplicates<'a, I>(records: I) -> Vec<ValidationIssue>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    find_duplicate_positions(records)
        .into_iter()
        .map(|(_, issue)| issue)
        .collect()
}

/// Same as `find_duplicates`, with the position of each repeat in the input
pub fn find_duplicate_positions<'a, I>(records: I) -> Vec<(usize, ValidationIssue)>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut seen = HashSet::new();
    let mut issues = Vec::new();

    for (idx, record) in records.into_iter().enumerate() {
        let Some(key) = record.natural_key() else {
            continue;
        };
        if !seen.insert(key.clone()) {
            issues.push((
                idx,
                ValidationIssue::warning(
                    &record.origin,
                    None,
                    format!("Duplicate record for {}", key),
                ),
            ));
        }
    }

    issues
}

/// ERROR / WARNING counts over a set of issues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub errors: usize,
    pub warnings: usize,
}

impl ValidationSummary {
    pub fn from_issues<'a, I>(issues: I) -> Self
    where
        I: IntoIterator<Item = &'a ValidationIssue>,
    {
        issues
            .into_iter()
            .fold(Self::default(), |mut acc, issue| {
                match issue.severity {
                    Severity::Error => acc.errors += 1,
                    Severity::Warning => acc.warnings += 1,
                }
                acc
            })
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors, {} warnings", self.errors, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::types::{Platform, RecordRef};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn mock_record(line: u64) -> CanonicalRecord {
        CanonicalRecord {
            origin: RecordRef {
                source: "tiktok.csv".into(),
                line,
            },
            date: FieldValue::Present(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            platform: Platform::TikTok,
            campaign: FieldValue::Present("Spring".to_string()),
            spend: FieldValue::Present(dec("100")),
            impressions: FieldValue::Present(dec("10000")),
            clicks: FieldValue::Present(dec("500")),
            conversions: FieldValue::Present(dec("25")),
            revenue: FieldValue::Present(dec("400")),
            creator_name: None,
            video_id: None,
            video_name: None,
            ad_set_name: None,
            creative_type: None,
        }
    }

    #[test]
    fn test_clean_record_has_no_issues() {
        assert!(Validator::default().validate(&mock_record(2)).is_empty());
    }

    #[test]
    fn test_missing_and_unparsable_fields_are_errors() {
        let mut record = mock_record(2);
        record.date = FieldValue::Unparsable("yesterday".to_string());
        record.revenue = FieldValue::Missing;

        let issues = Validator::default().validate(&record);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.is_error()));
        assert_eq!(issues[0].field, Some(CanonicalField::Date));
        assert!(issues[0].message.contains("yesterday"));
        assert_eq!(issues[1].field, Some(CanonicalField::Revenue));
    }

    #[test]
    fn test_negative_metric_is_error() {
        let mut record = mock_record(2);
        record.spend = FieldValue::Present(dec("-12.50"));

        let issues = Validator::default().validate(&record);
        assert!(issues
            .iter()
            .any(|i| i.is_error() && i.field == Some(CanonicalField::Spend)));
    }

    #[test]
    fn test_clicks_above_impressions_is_warning_only() {
        let mut record = mock_record(2);
        record.impressions = FieldValue::Present(dec("100"));

        let issues = Validator::default().validate(&record);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].field, Some(CanonicalField::Clicks));
    }

    #[test]
    fn test_anomaly_heuristics() {
        let mut zero_spend = mock_record(2);
        zero_spend.spend = FieldValue::Present(Decimal::ZERO);
        let issues = Validator::default().validate(&zero_spend);
        assert!(issues.iter().any(|i| i.message.contains("Zero spend")));

        let mut pricey = mock_record(3);
        pricey.spend = FieldValue::Present(dec("60000"));
        let issues = Validator::default().validate(&pricey);
        // 120 per click and 2400 per conversion
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| !i.is_error()));
    }

    #[test]
    fn test_unrepresentable_cost_ratio_is_warning() {
        let mut record = mock_record(2);
        record.spend = FieldValue::Present(Decimal::MAX);
        record.clicks = FieldValue::Present(dec("0.5"));
        record.conversions = FieldValue::Present(dec("0.5"));
        record.impressions = FieldValue::Present(dec("1"));

        let issues = Validator::default().validate(&record);
        let ceilings: Vec<_> = issues
            .iter()
            .filter(|i| i.message.contains("too large to represent"))
            .collect();
        assert_eq!(ceilings.len(), 2);
        assert!(issues.iter().all(|i| !i.is_error()));
    }

    #[test]
    fn test_disabled_limits_and_date_window() {
        let limits = ValidationLimits {
            max_cpc: None,
            max_row_cpp: None,
            min_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            max_date: None,
        };
        let validator = Validator::new(&limits);

        let mut record = mock_record(2);
        record.spend = FieldValue::Present(dec("60000"));
        let issues = validator.validate(&record);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, Some(CanonicalField::Date));
    }

    #[test]
    fn test_duplicates_warn_after_first() {
        let records = vec![mock_record(2), mock_record(3), mock_record(4)];
        let mut other_video = mock_record(5);
        other_video.video_id = Some("v1".to_string());

        let issues = find_duplicates(records.iter().chain([&other_video]));
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].record.line, 3);
        assert_eq!(issues[1].record.line, 4);
        assert!(issues.iter().all(|i| i.severity == Severity::Warning));

        let positions: Vec<_> = find_duplicate_positions(&records)
            .into_iter()
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_summary_counts() {
        let mut record = mock_record(2);
        record.campaign = FieldValue::Missing;
        record.impressions = FieldValue::Present(dec("10"));

        let issues = Validator::default().validate(&record);
        let summary = ValidationSummary::from_issues(&issues);
        assert_eq!(summary, ValidationSummary { errors: 1, warnings: 1 });
        assert_eq!(summary.to_string(), "1 errors, 1 warnings");
    }
}
