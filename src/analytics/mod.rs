//! Analytics module - KPIs, aggregation, alerts and comparisons over valid records

pub mod aggregate;
pub mod alerts;
pub mod compare;
pub mod creators;
pub mod kpi;

pub use aggregate::{
    aggregate, merge_aggregates, AggregatedGroup, AggregationRequest, DateRange, Dimension,
    GroupKey, Grouping, Period, TimeBucket,
};
pub use alerts::{evaluate_alerts, Alert, AlertSeverity, AlertThresholds, VolumeGates};
pub use creators::{creator_summaries, video_summaries, CreatorSummary, VideoSummary};
pub use kpi::{Kpis, Metric, Totals};
