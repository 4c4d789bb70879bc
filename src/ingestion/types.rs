//! Core data types for the ingestion pipeline
//! Pure data structures with no behavior

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// One source line, keyed by the source's own column names
#[derive(Debug, Clone)]
pub struct RawRow {
    pub line: u64,
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self {
            line,
            headers,
            values,
        }
    }

    /// Value of a column, matched exactly as it appears in the header
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|idx| self.value_at(idx))
    }

    pub fn value_at(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).map(String::as_str)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// (column, value) pairs in source order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Advertising platforms
///
/// `Other` carries the tag of a platform registered at runtime, so adding a
/// platform is a registry table and never a new variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    TikTok,
    Meta,
    Google,
    Other(String),
}

impl Platform {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "tiktok" => Platform::TikTok,
            "meta" | "facebook" => Platform::Meta,
            "google" => Platform::Google,
            other => Platform::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Meta => "meta",
            Platform::Google => "google",
            Platform::Other(tag) => tag,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Platform-independent column names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Date,
    Campaign,
    Spend,
    Impressions,
    Clicks,
    Conversions,
    Revenue,
    CreatorName,
    VideoId,
    VideoName,
    AdSetName,
    CreativeType,
}

impl CanonicalField {
    /// Columns every source must resolve (platform comes from detection)
    pub const REQUIRED: [CanonicalField; 7] = [
        CanonicalField::Date,
        CanonicalField::Campaign,
        CanonicalField::Spend,
        CanonicalField::Impressions,
        CanonicalField::Clicks,
        CanonicalField::Conversions,
        CanonicalField::Revenue,
    ];

    pub const OPTIONAL: [CanonicalField; 5] = [
        CanonicalField::CreatorName,
        CanonicalField::VideoId,
        CanonicalField::VideoName,
        CanonicalField::AdSetName,
        CanonicalField::CreativeType,
    ];

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::Date => "date",
            CanonicalField::Campaign => "campaign",
            CanonicalField::Spend => "spend",
            CanonicalField::Impressions => "impressions",
            CanonicalField::Clicks => "clicks",
            CanonicalField::Conversions => "conversions",
            CanonicalField::Revenue => "revenue",
            CanonicalField::CreatorName => "creator_name",
            CanonicalField::VideoId => "video_id",
            CanonicalField::VideoName => "video_name",
            CanonicalField::AdSetName => "ad_set_name",
            CanonicalField::CreativeType => "creative_type",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of parsing one required field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FieldValue<T> {
    Present(T),
    Missing,
    /// Raw text that could not be parsed
    Unparsable(String),
}

impl<T> FieldValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FieldValue::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }
}

impl<T: Copy> FieldValue<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

/// Where a record came from: source name + 1-based line number
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordRef {
    pub source: Arc<str>,
    pub line: u64,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line)
    }
}

/// Canonical performance record
///
/// Required fields keep their parse outcome so validation can report them;
/// attribution fields are `None` when the column is absent from the source,
/// which is distinct from `Some("")`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub origin: RecordRef,
    pub date: FieldValue<NaiveDate>,
    pub platform: Platform,
    pub campaign: FieldValue<String>,
    pub spend: FieldValue<Decimal>,
    pub impressions: FieldValue<Decimal>,
    pub clicks: FieldValue<Decimal>,
    pub conversions: FieldValue<Decimal>,
    pub revenue: FieldValue<Decimal>,
    pub creator_name: Option<String>,
    pub video_id: Option<String>,
    pub video_name: Option<String>,
    pub ad_set_name: Option<String>,
    pub creative_type: Option<String>,
}

impl CanonicalRecord {
    /// (date, platform, campaign, video) identity, if date and campaign parsed
    pub fn natural_key(&self) -> Option<NaturalKey> {
        Some(NaturalKey {
            date: self.date.get()?,
            platform: self.platform.clone(),
            campaign: self.campaign.value()?.clone(),
            video_id: self.video_id.clone(),
        })
    }

    /// Parse outcome of a numeric metric column
    pub fn metric(&self, field: CanonicalField) -> Option<&FieldValue<Decimal>> {
        match field {
            CanonicalField::Spend => Some(&self.spend),
            CanonicalField::Impressions => Some(&self.impressions),
            CanonicalField::Clicks => Some(&self.clicks),
            CanonicalField::Conversions => Some(&self.conversions),
            CanonicalField::Revenue => Some(&self.revenue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NaturalKey {
    pub date: NaiveDate,
    pub platform: Platform,
    pub campaign: String,
    pub video_id: Option<String>,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.date, self.platform, self.campaign)?;
        if let Some(video) = &self.video_id {
            write!(f, " / {}", video)?;
        }
        Ok(())
    }
}

/// ERROR excludes a record from aggregation, WARNING does not
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub record: RecordRef,
    pub field: Option<CanonicalField>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(record: &RecordRef, field: Option<CanonicalField>, message: String) -> Self {
        Self {
            severity: Severity::Error,
            record: record.clone(),
            field,
            message,
        }
    }

    pub fn warning(record: &RecordRef, field: Option<CanonicalField>, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            record: record.clone(),
            field,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({}", self.severity, self.message, self.record)?;
        if let Some(field) = self.field {
            write!(f, ", field '{}'", field)?;
        }
        write!(f, ")")
    }
}
