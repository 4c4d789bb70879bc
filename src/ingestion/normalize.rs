//! Normalize functions - transform raw rows into CanonicalRecord structs

use crate::ingestion::load::RawRows;
use crate::ingestion::registry::ResolvedSchema;
use crate::ingestion::types::{
    CanonicalField, CanonicalRecord, FieldValue, RawRow, RecordRef, ValidationIssue,
};
use crate::ingestion::utils::{clean_text, parse_amount, parse_date};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

/// Only the first few problems per source are logged, the rest are counted
const LOGGED_PROBLEMS: usize = 10;

/// Everything the normalizer needs to know about one source
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub source: Arc<str>,
    pub schema: ResolvedSchema,
    /// Date applied to every row when the export has no date column
    pub implied_date: Option<NaiveDate>,
}

impl NormalizeContext {
    fn cell<'r>(&self, row: &'r RawRow, field: CanonicalField) -> Option<&'r str> {
        self.schema
            .column(field)
            .and_then(|col| row.value_at(col.index))
    }

    fn amount(&self, row: &RawRow, field: CanonicalField) -> FieldValue<rust_decimal::Decimal> {
        self.cell(row, field)
            .map(parse_amount)
            .unwrap_or(FieldValue::Missing)
    }

    fn attribution(&self, row: &RawRow, field: CanonicalField) -> Option<String> {
        self.cell(row, field).map(clean_text)
    }
}

/// Normalize a single row
///
/// Never fails: fields that are absent or unparsable are recorded as such and
/// reported later by the validator.
pub fn normalize_row(row: &RawRow, ctx: &NormalizeContext) -> CanonicalRecord {
    let date = match ctx.cell(row, CanonicalField::Date) {
        Some(raw) => parse_date(raw),
        None => ctx
            .implied_date
            .map(FieldValue::Present)
            .unwrap_or(FieldValue::Missing),
    };

    let campaign = match ctx.cell(row, CanonicalField::Campaign).map(str::trim) {
        Some(name) if !name.is_empty() => FieldValue::Present(name.to_string()),
        _ => FieldValue::Missing,
    };

    CanonicalRecord {
        origin: RecordRef {
            source: ctx.source.clone(),
            line: row.line,
        },
        date,
        platform: ctx.schema.platform.clone(),
        campaign,
        spend: ctx.amount(row, CanonicalField::Spend),
        impressions: ctx.amount(row, CanonicalField::Impressions),
        clicks: ctx.amount(row, CanonicalField::Clicks),
        conversions: ctx.amount(row, CanonicalField::Conversions),
        revenue: ctx.amount(row, CanonicalField::Revenue),
        creator_name: ctx.attribution(row, CanonicalField::CreatorName),
        video_id: ctx.attribution(row, CanonicalField::VideoId),
        video_name: ctx.attribution(row, CanonicalField::VideoName),
        ad_set_name: ctx.attribution(row, CanonicalField::AdSetName),
        creative_type: ctx.attribution(row, CanonicalField::CreativeType),
    }
}

fn has_parse_failure(record: &CanonicalRecord) -> bool {
    let metric_failed = [
        CanonicalField::Spend,
        CanonicalField::Impressions,
        CanonicalField::Clicks,
        CanonicalField::Conversions,
        CanonicalField::Revenue,
    ]
    .iter()
    .filter_map(|f| record.metric(*f))
    .any(|v| !v.is_present());

    metric_failed || !record.date.is_present() || !record.campaign.is_present()
}

/// Records of one source plus the rows that could not be read
#[derive(Debug, Default)]
pub struct NormalizedSource {
    pub records: Vec<CanonicalRecord>,
    /// WARNING issues for skipped, structurally malformed rows
    pub skipped: Vec<ValidationIssue>,
}

impl NormalizedSource {
    pub fn rows_seen(&self) -> usize {
        self.records.len() + self.skipped.len()
    }
}

/// Normalize every row of a source
pub fn normalize_rows(rows: RawRows, ctx: &NormalizeContext) -> NormalizedSource {
    let mut out = NormalizedSource::default();
    let mut problems = 0;

    for result in rows {
        match result {
            Ok(row) => {
                let record = normalize_row(&row, ctx);
                if has_parse_failure(&record) {
                    problems += 1;
                    if problems <= LOGGED_PROBLEMS {
                        warn!("Row {} of {} has unparsable fields", row.line, ctx.source);
                    }
                }
                out.records.push(record);
            }
            Err(malformed) => {
                problems += 1;
                if problems <= LOGGED_PROBLEMS {
                    warn!(
                        "Skipping row {} of {}: {}",
                        malformed.line, ctx.source, malformed.reason
                    );
                }
                let origin = RecordRef {
                    source: ctx.source.clone(),
                    line: malformed.line,
                };
                out.skipped.push(ValidationIssue::warning(
                    &origin,
                    None,
                    format!("Row skipped: {}", malformed.reason),
                ));
            }
        }
    }

    info!(
        "Normalized {} records from {} ({} problems, {} skipped)",
        out.records.len(),
        ctx.source,
        problems,
        out.skipped.len()
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::load::{load_source, Source};
    use crate::ingestion::registry::SchemaRegistry;
    use crate::ingestion::types::Platform;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn normalize_csv(name: &str, text: &str) -> NormalizedSource {
        let loaded = load_source(Source::from_bytes(name, text.as_bytes().to_vec()))
            .ok()
            .unwrap();
        let schema = SchemaRegistry::builtin().detect(&loaded.headers).unwrap();
        let ctx = NormalizeContext {
            source: loaded.name.clone(),
            schema,
            implied_date: None,
        };
        normalize_rows(loaded.rows, &ctx)
    }

    #[test]
    fn test_normalize_tiktok_row() {
        let out = normalize_csv(
            "tiktok.csv",
            "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue\n\
             2024-01-01, Campaign A ,$150.50,\"10,000\",500,25,$500.00\n",
        );

        assert_eq!(out.records.len(), 1);
        let record = &out.records[0];
        assert_eq!(record.platform, Platform::TikTok);
        assert_eq!(record.date, FieldValue::Present(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(record.campaign, FieldValue::Present("Campaign A".to_string()));
        assert_eq!(record.spend, FieldValue::Present(dec("150.50")));
        assert_eq!(record.impressions, FieldValue::Present(dec("10000")));
        assert_eq!(record.revenue, FieldValue::Present(dec("500.00")));
        assert_eq!(record.origin.line, 2);
        assert_eq!(&*record.origin.source, "tiktok.csv");
    }

    #[test]
    fn test_normalize_keeps_unparsable_fields() {
        let out = normalize_csv(
            "google.csv",
            "Day,Campaign,Cost,Impr.,Clicks,Conv.,Conv. value\n\
             not-a-date,Brand,12abc,100,5,,30\n",
        );

        let record = &out.records[0];
        assert_eq!(record.date, FieldValue::Unparsable("not-a-date".to_string()));
        assert_eq!(record.spend, FieldValue::Unparsable("12abc".to_string()));
        assert_eq!(record.conversions, FieldValue::Missing);
        assert_eq!(record.clicks, FieldValue::Present(dec("5")));
    }

    #[test]
    fn test_attribution_absent_vs_empty() {
        let out = normalize_csv(
            "tiktok.csv",
            "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue,Creator Name\n\
             2024-01-01,A,1,10,1,0,0,  Alice \n\
             2024-01-02,A,1,10,1,0,0,\n",
        );

        assert_eq!(out.records[0].creator_name, Some("Alice".to_string()));
        assert_eq!(out.records[1].creator_name, Some(String::new()));
        // Column not in the export at all
        assert_eq!(out.records[0].video_id, None);
    }

    #[test]
    fn test_malformed_row_becomes_warning() {
        let out = normalize_csv(
            "meta.csv",
            "reporting_starts,campaign_name,spend,impressions,link_clicks,purchases,purchases_conversion_value\n\
             2024-01-01,M1,200,20000,800,40,1200\n\
             2024-01-02,M1,200\n",
        );

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.rows_seen(), 2);
        let issue = &out.skipped[0];
        assert!(!issue.is_error());
        assert_eq!(issue.record.line, 3);
    }

    #[test]
    fn test_implied_date_fills_missing_column() {
        let loaded = load_source(Source::from_bytes(
            "ads_2025-09-27_to_2025-10-27.csv",
            b"Ad name,Ad group name,Cost,Impressions,Clicks (destination),Conversions,Revenue\n\
              clip-01.mp4,Group A,10,1000,20,1,30\n"
                .to_vec(),
        ))
        .ok()
        .unwrap();
        let schema = SchemaRegistry::builtin()
            .detect_allowing(&loaded.headers, &[CanonicalField::Date])
            .unwrap();
        let ctx = NormalizeContext {
            source: loaded.name.clone(),
            schema,
            implied_date: NaiveDate::from_ymd_opt(2025, 10, 12),
        };

        let out = normalize_rows(loaded.rows, &ctx);
        let record = &out.records[0];
        assert_eq!(record.date, FieldValue::Present(NaiveDate::from_ymd_opt(2025, 10, 12).unwrap()));
        assert_eq!(record.campaign, FieldValue::Present("Group A".to_string()));
        assert_eq!(record.video_name, Some("clip-01.mp4".to_string()));
    }
}
