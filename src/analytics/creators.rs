//! Creator and video summaries over valid records
//!
//! Both are views over `aggregate`: a creator summary is the all-time creator
//! group plus what its (creator, video) and (creator, platform) groups say,
//! a video summary is the all-time (video, creator) group plus its day count.

use crate::analytics::aggregate::{
    aggregate, AggregatedGroup, AggregationRequest, Dimension, GroupKey, Grouping, TimeBucket,
};
use crate::analytics::compare::top_groups;
use crate::analytics::kpi::{Kpis, Metric, Totals};
use crate::error::AggregateError;
use crate::ingestion::types::{CanonicalRecord, Platform};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BestVideo {
    pub video: String,
    pub roas: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatorSummary {
    pub creator: String,
    pub totals: Totals,
    pub kpis: Kpis,
    /// Distinct attributed videos; unattributed rows are not counted
    pub videos: usize,
    /// Platform tags, sorted
    pub platforms: Vec<String>,
    /// Highest-ROAS video; `None` when no video has a defined ROAS
    pub best_video: Option<BestVideo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSummary {
    /// `video_id`, or `video_name` when the export has no id
    pub video: String,
    pub video_name: Option<String>,
    pub creator: Option<String>,
    /// Platform and campaign of the first record seen for the video
    pub platform: Platform,
    pub campaign: Option<String>,
    pub totals: Totals,
    pub kpis: Kpis,
    pub days_active: usize,
}

fn all_time(records: &[CanonicalRecord], dimensions: Vec<Dimension>) -> Result<Vec<AggregatedGroup>, AggregateError> {
    aggregate(records, &AggregationRequest::new(Grouping::new(dimensions), TimeBucket::AllTime))
}

/// Creators with a non-empty name, ordered by name
pub fn creator_summaries(records: &[CanonicalRecord]) -> Result<Vec<CreatorSummary>, AggregateError> {
    let named = |key: &GroupKey| {
        key.value(Dimension::Creator)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    };

    let mut videos: BTreeMap<String, Vec<AggregatedGroup>> = BTreeMap::new();
    for group in all_time(records, vec![Dimension::Creator, Dimension::Video])? {
        if group.key.value(Dimension::Video).is_none() {
            continue;
        }
        if let Some(creator) = named(&group.key) {
            videos.entry(creator).or_default().push(group);
        }
    }

    let mut platforms: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for group in all_time(records, vec![Dimension::Creator, Dimension::Platform])? {
        if let (Some(creator), Some(platform)) = (named(&group.key), group.key.value(Dimension::Platform)) {
            platforms.entry(creator).or_default().insert(platform.to_string());
        }
    }

    let summaries = all_time(records, vec![Dimension::Creator])?
        .into_iter()
        .filter_map(|group| {
            let creator = named(&group.key)?;
            let creator_videos = videos.remove(&creator).unwrap_or_default();

            let best_video = top_groups(&creator_videos, Metric::Roas, 1)
                .first()
                .and_then(|best| {
                    Some(BestVideo {
                        video: best.key.value(Dimension::Video)?.to_string(),
                        roas: best.kpis.roas?,
                    })
                });

            Some(CreatorSummary {
                videos: creator_videos.len(),
                platforms: platforms
                    .remove(&creator)
                    .map(|set| set.into_iter().collect())
                    .unwrap_or_default(),
                best_video,
                creator,
                totals: group.totals,
                kpis: group.kpis,
            })
        })
        .collect();

    Ok(summaries)
}

/// Attributed videos, ordered by video then creator
pub fn video_summaries(records: &[CanonicalRecord]) -> Result<Vec<VideoSummary>, AggregateError> {
    type VideoKey = (String, Option<String>);

    let key_of = |record: &CanonicalRecord| -> Option<VideoKey> {
        Some((
            Dimension::Video.value_of(record)?,
            Dimension::Creator.value_of(record),
        ))
    };

    let mut first_seen: HashMap<VideoKey, &CanonicalRecord> = HashMap::new();
    for record in records {
        if let Some(key) = key_of(record) {
            first_seen.entry(key).or_insert(record);
        }
    }

    let daily = aggregate(
        records,
        &AggregationRequest::new(
            Grouping::new(vec![Dimension::Video, Dimension::Creator]),
            TimeBucket::Day,
        ),
    )?;
    let mut days: HashMap<VideoKey, usize> = HashMap::new();
    for group in &daily {
        if let Some(video) = group.key.value(Dimension::Video) {
            let creator = group.key.value(Dimension::Creator).map(str::to_string);
            *days.entry((video.to_string(), creator)).or_default() += 1;
        }
    }

    let summaries = all_time(records, vec![Dimension::Video, Dimension::Creator])?
        .into_iter()
        .filter_map(|group| {
            let key: VideoKey = (
                group.key.value(Dimension::Video)?.to_string(),
                group.key.value(Dimension::Creator).map(str::to_string),
            );
            let first = first_seen.get(&key)?;

            Some(VideoSummary {
                video_name: first.video_name.clone(),
                platform: first.platform.clone(),
                campaign: first.campaign.value().cloned(),
                days_active: days.get(&key).copied().unwrap_or(0),
                totals: group.totals,
                kpis: group.kpis,
                creator: key.1,
                video: key.0,
            })
        })
        .collect();

    Ok(summaries)
}
