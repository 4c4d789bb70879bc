//! Platform schema registry - column synonym tables and header detection
//!
//! Each platform is described by a table of canonical field -> accepted
//! column names. Detection scores a header row against every table with
//! [`resolve`]; supporting a new export format means registering a table,
//! nothing in the pipeline changes.

use crate::error::DetectError;
use crate::ingestion::types::{CanonicalField, Platform};
use std::collections::BTreeMap;
use tracing::debug;

type SynonymTable = &'static [(CanonicalField, &'static [&'static str])];

/// Built-in export formats, in registration (tie-break) order
const BUILTIN_SCHEMAS: &[(&str, SynonymTable)] = &[
    (
        "tiktok",
        &[
            (CanonicalField::Date, &["Date", "Stat time day", "By Day"]),
            (CanonicalField::Campaign, &["Campaign Name", "Ad group name"]),
            (CanonicalField::Spend, &["Cost", "Spend", "Total cost"]),
            (CanonicalField::Impressions, &["Impressions"]),
            (CanonicalField::Clicks, &["Clicks", "Clicks (destination)"]),
            (CanonicalField::Conversions, &["Conversions", "Complete payment"]),
            (
                CanonicalField::Revenue,
                &["Revenue", "Total complete payment value", "Purchase value"],
            ),
            (CanonicalField::VideoName, &["Ad name"]),
            (CanonicalField::AdSetName, &["Ad group name"]),
        ],
    ),
    (
        "meta",
        &[
            (CanonicalField::Date, &["reporting_starts", "Reporting starts"]),
            (CanonicalField::Campaign, &["campaign_name", "Campaign name"]),
            (CanonicalField::Spend, &["spend", "Amount spent (USD)", "Amount spent"]),
            (CanonicalField::Impressions, &["impressions"]),
            (CanonicalField::Clicks, &["link_clicks", "Link clicks", "clicks"]),
            (
                CanonicalField::Conversions,
                &[
                    "actions:offsite_conversion.fb_pixel_purchase",
                    "purchases",
                    "Results",
                ],
            ),
            (
                CanonicalField::Revenue,
                &[
                    "action_values:offsite_conversion.fb_pixel_purchase",
                    "purchases_conversion_value",
                    "Purchases conversion value",
                ],
            ),
            (CanonicalField::AdSetName, &["adset_name", "Ad set name"]),
        ],
    ),
    (
        "google",
        &[
            (CanonicalField::Date, &["Day", "Date"]),
            (CanonicalField::Campaign, &["Campaign"]),
            (CanonicalField::Spend, &["Cost"]),
            (CanonicalField::Impressions, &["Impr.", "Impressions"]),
            (CanonicalField::Clicks, &["Clicks"]),
            (CanonicalField::Conversions, &["Conv.", "Conversions"]),
            (
                CanonicalField::Revenue,
                &["Conv. value", "Conversion value", "Total conv. value"],
            ),
            (CanonicalField::AdSetName, &["Ad group"]),
        ],
    ),
];

/// Attribution columns accepted by every built-in platform
const ATTRIBUTION_SYNONYMS: SynonymTable = &[
    (CanonicalField::CreatorName, &["creator_name", "Creator Name", "Creator"]),
    (CanonicalField::VideoId, &["video_id", "Video ID"]),
    (CanonicalField::VideoName, &["video_name", "Video Name"]),
    (CanonicalField::AdSetName, &["ad_set_name", "Ad Set Name"]),
    (CanonicalField::CreativeType, &["creative_type", "Creative Type"]),
];

/// One platform's column synonym table
#[derive(Debug, Clone)]
pub struct PlatformSchema {
    pub platform: Platform,
    synonyms: BTreeMap<CanonicalField, Vec<String>>,
}

impl PlatformSchema {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            synonyms: BTreeMap::new(),
        }
    }

    /// Append accepted column names for a field; earlier names take priority
    pub fn with_synonyms(mut self, field: CanonicalField, names: &[&str]) -> Self {
        self.synonyms
            .entry(field)
            .or_default()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn synonyms(&self, field: CanonicalField) -> &[String] {
        self.synonyms.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A source column chosen for a canonical field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub header: String,
    pub index: usize,
}

/// A platform schema applied to one concrete header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub platform: Platform,
    pub columns: BTreeMap<CanonicalField, ResolvedColumn>,
}

impl ResolvedSchema {
    pub fn column(&self, field: CanonicalField) -> Option<&ResolvedColumn> {
        self.columns.get(&field)
    }

    /// Number of resolved columns, used to rank candidate platforms
    pub fn score(&self) -> usize {
        self.columns.len()
    }

    /// Required fields with no matching column
    pub fn missing_required(&self) -> Vec<CanonicalField> {
        CanonicalField::REQUIRED
            .iter()
            .copied()
            .filter(|f| !self.columns.contains_key(f))
            .collect()
    }
}

fn header_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Match a header row against one schema
///
/// Case-insensitive, order-independent; unknown headers are ignored. For each
/// field the first listed synonym present in the header wins.
pub fn resolve(schema: &PlatformSchema, headers: &[String]) -> ResolvedSchema {
    let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();

    let columns = schema
        .synonyms
        .iter()
        .filter_map(|(field, names)| {
            names.iter().find_map(|name| {
                let wanted = header_key(name);
                keys.iter()
                    .position(|k| *k == wanted)
                    .map(|index| {
                        (
                            *field,
                            ResolvedColumn {
                                header: headers[index].clone(),
                                index,
                            },
                        )
                    })
            })
        })
        .collect();

    ResolvedSchema {
        platform: schema.platform.clone(),
        columns,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Vec<PlatformSchema>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// TikTok, Meta and Google export formats
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (tag, table) in BUILTIN_SCHEMAS {
            let mut schema = PlatformSchema::new(Platform::from_tag(tag));
            for (field, names) in table.iter().chain(ATTRIBUTION_SYNONYMS) {
                schema = schema.with_synonyms(*field, names);
            }
            registry.register(schema);
        }
        registry
    }

    pub fn register(&mut self, schema: PlatformSchema) {
        self.schemas.push(schema);
    }

    pub fn schemas(&self) -> &[PlatformSchema] {
        &self.schemas
    }

    /// Best-matching platform for a header row
    ///
    /// A schema qualifies only if every required field resolves. Among
    /// qualifying schemas the highest score wins; ties go to the schema
    /// registered first.
    pub fn detect(&self, headers: &[String]) -> Result<ResolvedSchema, DetectError> {
        self.detect_allowing(headers, &[])
    }

    /// Like [`detect`](Self::detect), but `implied` required fields may be
    /// absent because the caller supplies them some other way
    pub fn detect_allowing(
        &self,
        headers: &[String],
        implied: &[CanonicalField],
    ) -> Result<ResolvedSchema, DetectError> {
        let mut best: Option<ResolvedSchema> = None;

        for schema in &self.schemas {
            let resolved = resolve(schema, headers);
            let missing: Vec<_> = resolved
                .missing_required()
                .into_iter()
                .filter(|f| !implied.contains(f))
                .collect();

            if !missing.is_empty() {
                debug!(
                    "Schema {} rejected, unresolved: {:?}",
                    schema.platform, missing
                );
                continue;
            }

            let better = best
                .as_ref()
                .map_or(true, |current| resolved.score() > current.score());
            if better {
                best = Some(resolved);
            }
        }

        best.ok_or_else(|| DetectError::UnknownPlatform {
            headers: headers.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(line: &str) -> Vec<String> {
        line.split(',').map(str::to_string).collect()
    }

    #[test]
    fn test_detect_tiktok() {
        let registry = SchemaRegistry::builtin();
        let resolved = registry
            .detect(&headers(
                "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue",
            ))
            .unwrap();

        assert_eq!(resolved.platform, Platform::TikTok);
        assert_eq!(resolved.column(CanonicalField::Spend).unwrap().header, "Cost");
        assert_eq!(resolved.column(CanonicalField::Revenue).unwrap().index, 6);
    }

    #[test]
    fn test_detect_meta() {
        let registry = SchemaRegistry::builtin();
        let resolved = registry
            .detect(&headers(
                "reporting_starts,campaign_name,spend,impressions,link_clicks,\
                 actions:offsite_conversion.fb_pixel_purchase,\
                 action_values:offsite_conversion.fb_pixel_purchase",
            ))
            .unwrap();

        assert_eq!(resolved.platform, Platform::Meta);
        assert_eq!(
            resolved.column(CanonicalField::Clicks).unwrap().header,
            "link_clicks"
        );
    }

    #[test]
    fn test_detect_google() {
        let registry = SchemaRegistry::builtin();
        let resolved = registry
            .detect(&headers("Day,Campaign,Cost,Impr.,Clicks,Conv.,Conv. value"))
            .unwrap();

        assert_eq!(resolved.platform, Platform::Google);
        assert_eq!(
            resolved.column(CanonicalField::Impressions).unwrap().header,
            "Impr."
        );
    }

    #[test]
    fn test_detect_is_case_and_order_insensitive() {
        let registry = SchemaRegistry::builtin();
        let resolved = registry
            .detect(&headers(
                "REVENUE,clicks,Extra Column,date,campaign name,cost,impressions,conversions",
            ))
            .unwrap();

        assert_eq!(resolved.platform, Platform::TikTok);
        assert_eq!(resolved.column(CanonicalField::Date).unwrap().index, 3);
    }

    #[test]
    fn test_detect_picks_up_attribution_columns() {
        let registry = SchemaRegistry::builtin();
        let resolved = registry
            .detect(&headers(
                "Date,Campaign Name,Cost,Impressions,Clicks,Conversions,Revenue,Creator Name,video_id",
            ))
            .unwrap();

        assert!(resolved.column(CanonicalField::CreatorName).is_some());
        assert!(resolved.column(CanonicalField::VideoId).is_some());
        assert!(resolved.column(CanonicalField::CreativeType).is_none());
    }

    #[test]
    fn test_detect_unknown_platform() {
        let registry = SchemaRegistry::builtin();
        let err = registry
            .detect(&headers("when,what,how much"))
            .unwrap_err();

        match err {
            DetectError::UnknownPlatform { headers } => assert_eq!(headers.len(), 3),
        }
    }

    #[test]
    fn test_detect_requires_every_required_field() {
        let registry = SchemaRegistry::builtin();
        // No revenue column
        let result = registry.detect(&headers(
            "Date,Campaign Name,Cost,Impressions,Clicks,Conversions",
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_detect_allowing_implied_date() {
        let registry = SchemaRegistry::builtin();
        let cols = headers("Ad name,Ad group name,Cost,Impressions,Clicks (destination),Conversions,Revenue");

        assert!(registry.detect(&cols).is_err());

        let resolved = registry
            .detect_allowing(&cols, &[CanonicalField::Date])
            .unwrap();
        assert_eq!(resolved.platform, Platform::TikTok);
        assert_eq!(
            resolved.column(CanonicalField::Campaign).unwrap().header,
            "Ad group name"
        );
        assert_eq!(
            resolved.column(CanonicalField::VideoName).unwrap().header,
            "Ad name"
        );
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let mut registry = SchemaRegistry::empty();
        let table = |tag: &str| {
            let mut schema = PlatformSchema::new(Platform::from_tag(tag));
            for field in CanonicalField::REQUIRED {
                schema = schema.with_synonyms(field, &[field.name()]);
            }
            schema
        };
        registry.register(table("alpha"));
        registry.register(table("beta"));

        let resolved = registry
            .detect(&headers(
                "date,campaign,spend,impressions,clicks,conversions,revenue",
            ))
            .unwrap();
        assert_eq!(resolved.platform, Platform::Other("alpha".to_string()));
    }

    #[test]
    fn test_higher_overlap_beats_registration_order() {
        let mut registry = SchemaRegistry::empty();
        let mut plain = PlatformSchema::new(Platform::from_tag("plain"));
        let mut rich = PlatformSchema::new(Platform::from_tag("rich"));
        for field in CanonicalField::REQUIRED {
            plain = plain.with_synonyms(field, &[field.name()]);
            rich = rich.with_synonyms(field, &[field.name()]);
        }
        rich = rich.with_synonyms(CanonicalField::CreatorName, &["creator"]);
        registry.register(plain);
        registry.register(rich);

        let resolved = registry
            .detect(&headers(
                "date,campaign,spend,impressions,clicks,conversions,revenue,creator",
            ))
            .unwrap();
        assert_eq!(resolved.platform, Platform::Other("rich".to_string()));
    }
}
