//! Aggregate functions - group valid records by dimension and time bucket
//!
//! Output is sorted by (key, period) and built from exact decimal sums, so
//! aggregating the same records twice gives identical groups, and merging the
//! groups of disjoint record sets equals aggregating their union. Sums that
//! overflow a decimal fail the aggregation instead of wrapping or panicking.

use crate::analytics::kpi::{Kpis, Totals};
use crate::error::AggregateError;
use crate::ingestion::types::CanonicalRecord;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Campaign,
    Platform,
    Creator,
    Video,
    AdSet,
    CreativeType,
}

impl Dimension {
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Campaign => "campaign",
            Dimension::Platform => "platform",
            Dimension::Creator => "creator",
            Dimension::Video => "video",
            Dimension::AdSet => "ad_set",
            Dimension::CreativeType => "creative_type",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "campaign" => Some(Dimension::Campaign),
            "platform" => Some(Dimension::Platform),
            "creator" | "creator_name" => Some(Dimension::Creator),
            "video" | "video_id" => Some(Dimension::Video),
            "ad_set" | "ad_set_name" | "adset" => Some(Dimension::AdSet),
            "creative_type" => Some(Dimension::CreativeType),
            _ => None,
        }
    }

    /// Key value of a record; `None` is the "no attribution" bucket
    pub fn value_of(&self, record: &CanonicalRecord) -> Option<String> {
        match self {
            Dimension::Campaign => record.campaign.value().cloned(),
            Dimension::Platform => Some(record.platform.to_string()),
            Dimension::Creator => record.creator_name.clone(),
            Dimension::Video => record.video_id.clone().or_else(|| record.video_name.clone()),
            Dimension::AdSet => record.ad_set_name.clone(),
            Dimension::CreativeType => record.creative_type.clone(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One dimension or a composite of several, in key order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grouping(Vec<Dimension>);

impl Grouping {
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self(dimensions)
    }

    pub fn single(dimension: Dimension) -> Self {
        Self(vec![dimension])
    }

    /// Parse a comma-separated list such as `platform,campaign`
    pub fn parse(list: &str) -> Result<Self, String> {
        let dimensions = list
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                Dimension::from_name(part).ok_or_else(|| format!("unknown dimension '{}'", part.trim()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if dimensions.is_empty() {
            return Err("no grouping dimension given".to_string());
        }
        Ok(Self(dimensions))
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.0
    }

    pub fn key_of(&self, record: &CanonicalRecord) -> GroupKey {
        GroupKey(
            self.0
                .iter()
                .map(|dimension| KeyPart {
                    dimension: *dimension,
                    value: dimension.value_of(record),
                })
                .collect(),
        )
    }
}

impl Default for Grouping {
    fn default() -> Self {
        Self::single(Dimension::Campaign)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct KeyPart {
    pub dimension: Dimension,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupKey(Vec<KeyPart>);

impl GroupKey {
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn value(&self, dimension: Dimension) -> Option<&str> {
        self.0
            .iter()
            .find(|part| part.dimension == dimension)
            .and_then(|part| part.value.as_deref())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, " / ")?;
            }
            match &part.value {
                Some(value) => write!(f, "{}={}", part.dimension, value)?,
                None => write!(f, "{}=(none)", part.dimension)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Day,
    Week,
    Month,
    Quarter,
    AllTime,
}

impl TimeBucket {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "day" | "d" => Some(TimeBucket::Day),
            "week" | "w" => Some(TimeBucket::Week),
            "month" | "m" => Some(TimeBucket::Month),
            "quarter" | "q" => Some(TimeBucket::Quarter),
            "all" | "all_time" => Some(TimeBucket::AllTime),
            _ => None,
        }
    }

    /// Bucket containing a date; weeks start on Monday
    pub fn period_of(&self, date: NaiveDate) -> Period {
        match self {
            TimeBucket::Day => Period::Span {
                start: date,
                end: date,
            },
            TimeBucket::Week => {
                let start = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                Period::Span {
                    start,
                    end: start + Duration::days(6),
                }
            }
            TimeBucket::Month => month_span(date.year(), date.month(), 1),
            TimeBucket::Quarter => {
                let first_month = (date.month0() / 3) * 3 + 1;
                month_span(date.year(), first_month, 3)
            }
            TimeBucket::AllTime => Period::AllTime,
        }
    }
}

fn month_span(year: i32, month: u32, months: u32) -> Period {
    let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
    let next = month + months;
    let (next_year, next_month) = if next > 12 {
        (year + 1, next - 12)
    } else {
        (year, next)
    };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX);
    Period::Span { start, end }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Span { start: NaiveDate, end: NaiveDate },
    AllTime,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Span { start, end } if start == end => write!(f, "{}", start),
            Period::Span { start, end } => write!(f, "{}..{}", start, end),
            Period::AllTime => write!(f, "all time"),
        }
    }
}

/// Inclusive date filter; open on either side when `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            Some(start) => write!(f, "{}..", start)?,
            None => write!(f, "..")?,
        }
        match self.end {
            Some(end) => write!(f, "{}", end),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRequest {
    pub grouping: Grouping,
    pub bucket: TimeBucket,
    pub date_range: Option<DateRange>,
}

impl AggregationRequest {
    pub fn new(grouping: Grouping, bucket: TimeBucket) -> Self {
        Self {
            grouping,
            bucket,
            date_range: None,
        }
    }

    pub fn within(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }
}

/// Sums and KPIs for one key over one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedGroup {
    pub key: GroupKey,
    pub period: Period,
    pub totals: Totals,
    pub kpis: Kpis,
    pub record_count: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    totals: Totals,
    record_count: usize,
    first_date: NaiveDate,
    last_date: NaiveDate,
}

impl Accumulator {
    /// Leaves `self` untouched when the sums overflow
    fn absorb(&mut self, other: &Accumulator) -> Option<()> {
        self.totals = self.totals.checked_add(&other.totals)?;
        self.record_count += other.record_count;
        self.first_date = self.first_date.min(other.first_date);
        self.last_date = self.last_date.max(other.last_date);
        Some(())
    }
}

type GroupMap = BTreeMap<(GroupKey, Period), Accumulator>;

fn insert(map: &mut GroupMap, key: GroupKey, period: Period, acc: Accumulator) -> Result<(), AggregateError> {
    match map.entry((key, period)) {
        Entry::Occupied(mut entry) => {
            if entry.get_mut().absorb(&acc).is_none() {
                let (key, period) = entry.key();
                return Err(AggregateError::Overflow {
                    group: key.to_string(),
                    period: period.to_string(),
                });
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(acc);
        }
    }
    Ok(())
}

fn into_groups(map: GroupMap) -> Vec<AggregatedGroup> {
    map.into_iter()
        .map(|((key, period), acc)| AggregatedGroup {
            key,
            period,
            kpis: acc.totals.kpis(),
            totals: acc.totals,
            record_count: acc.record_count,
            first_date: acc.first_date,
            last_date: acc.last_date,
        })
        .collect()
}

/// Group valid records and sum them
///
/// Records without a parsed date or metrics cannot be placed and are ignored;
/// validation keeps them out of the valid set in the first place.
pub fn aggregate<'a, I>(
    records: I,
    request: &AggregationRequest,
) -> Result<Vec<AggregatedGroup>, AggregateError>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut map = GroupMap::new();

    for record in records {
        let (Some(date), Some(totals)) = (record.date.get(), Totals::from_record(record)) else {
            continue;
        };
        if let Some(range) = &request.date_range {
            if !range.contains(date) {
                continue;
            }
        }

        insert(
            &mut map,
            request.grouping.key_of(record),
            request.bucket.period_of(date),
            Accumulator {
                totals,
                record_count: 1,
                first_date: date,
                last_date: date,
            },
        )?;
    }

    Ok(into_groups(map))
}

/// Combine groups computed over disjoint record sets
pub fn merge_aggregates<I>(parts: I) -> Result<Vec<AggregatedGroup>, AggregateError>
where
    I: IntoIterator<Item = Vec<AggregatedGroup>>,
{
    let mut map = GroupMap::new();

    for group in parts.into_iter().flatten() {
        insert(
            &mut map,
            group.key,
            group.period,
            Accumulator {
                totals: group.totals,
                record_count: group.record_count,
                first_date: group.first_date,
                last_date: group.last_date,
            },
        )?;
    }

    Ok(into_groups(map))
}

/// Sum of every record in the range, ignoring grouping
pub fn total_within<'a, I>(records: I, range: &DateRange) -> Result<Totals, AggregateError>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let totals: Vec<Totals> = records
        .into_iter()
        .filter(|r| r.date.get().map_or(false, |d| range.contains(d)))
        .filter_map(Totals::from_record)
        .collect();

    Totals::checked_sum(&totals).ok_or_else(|| AggregateError::Overflow {
        group: "all records".to_string(),
        period: range.to_string(),
    })
}
