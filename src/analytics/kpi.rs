//! KPI functions - summed totals and the ratios derived from them
//!
//! Every ratio is `None` when its denominator is zero. KPIs are only ever
//! derived from summed totals, never averaged from per-row ratios.

use crate::ingestion::types::CanonicalRecord;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Summed raw metrics of one or more records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub spend: Decimal,
    pub impressions: Decimal,
    pub clicks: Decimal,
    pub conversions: Decimal,
    pub revenue: Decimal,
}

impl Totals {
    /// Totals of a single record; `None` if any metric did not parse
    pub fn from_record(record: &CanonicalRecord) -> Option<Self> {
        Some(Self {
            spend: record.spend.get()?,
            impressions: record.impressions.get()?,
            clicks: record.clicks.get()?,
            conversions: record.conversions.get()?,
            revenue: record.revenue.get()?,
        })
    }

    pub fn roas(&self) -> Option<Decimal> {
        self.revenue.checked_div(self.spend)
    }

    pub fn cpc(&self) -> Option<Decimal> {
        self.spend.checked_div(self.clicks)
    }

    pub fn cpm(&self) -> Option<Decimal> {
        self.spend
            .checked_div(self.impressions)?
            .checked_mul(Decimal::ONE_THOUSAND)
    }

    pub fn cpp(&self) -> Option<Decimal> {
        self.spend.checked_div(self.conversions)
    }

    pub fn ctr(&self) -> Option<Decimal> {
        self.clicks.checked_div(self.impressions)
    }

    pub fn cvr(&self) -> Option<Decimal> {
        self.conversions.checked_div(self.clicks)
    }

    pub fn kpis(&self) -> Kpis {
        Kpis {
            roas: self.roas(),
            cpc: self.cpc(),
            cpm: self.cpm(),
            cpp: self.cpp(),
            ctr: self.ctr(),
            cvr: self.cvr(),
        }
    }

    /// Value of a raw metric or KPI
    pub fn metric(&self, metric: Metric) -> Option<Decimal> {
        match metric {
            Metric::Spend => Some(self.spend),
            Metric::Impressions => Some(self.impressions),
            Metric::Clicks => Some(self.clicks),
            Metric::Conversions => Some(self.conversions),
            Metric::Revenue => Some(self.revenue),
            Metric::Roas => self.roas(),
            Metric::Cpc => self.cpc(),
            Metric::Cpm => self.cpm(),
            Metric::Cpp => self.cpp(),
            Metric::Ctr => self.ctr(),
            Metric::Cvr => self.cvr(),
        }
    }

    /// Field-wise sum of two totals; `None` when any field overflows
    pub fn checked_add(&self, rhs: &Totals) -> Option<Totals> {
        Some(Totals {
            spend: self.spend.checked_add(rhs.spend)?,
            impressions: self.impressions.checked_add(rhs.impressions)?,
            clicks: self.clicks.checked_add(rhs.clicks)?,
            conversions: self.conversions.checked_add(rhs.conversions)?,
            revenue: self.revenue.checked_add(rhs.revenue)?,
        })
    }

    pub fn checked_sum<'a, I>(items: I) -> Option<Totals>
    where
        I: IntoIterator<Item = &'a Totals>,
    {
        items
            .into_iter()
            .try_fold(Totals::default(), |acc, t| acc.checked_add(t))
    }
}

/// Derived ratios; `None` serializes as `null`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Kpis {
    pub roas: Option<Decimal>,
    pub cpc: Option<Decimal>,
    pub cpm: Option<Decimal>,
    pub cpp: Option<Decimal>,
    pub ctr: Option<Decimal>,
    pub cvr: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Spend,
    Impressions,
    Clicks,
    Conversions,
    Revenue,
    Roas,
    Cpc,
    Cpm,
    Cpp,
    Ctr,
    Cvr,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Spend,
        Metric::Impressions,
        Metric::Clicks,
        Metric::Conversions,
        Metric::Revenue,
        Metric::Roas,
        Metric::Cpc,
        Metric::Cpm,
        Metric::Cpp,
        Metric::Ctr,
        Metric::Cvr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Spend => "spend",
            Metric::Impressions => "impressions",
            Metric::Clicks => "clicks",
            Metric::Conversions => "conversions",
            Metric::Revenue => "revenue",
            Metric::Roas => "roas",
            Metric::Cpc => "cpc",
            Metric::Cpm => "cpm",
            Metric::Cpp => "cpp",
            Metric::Ctr => "ctr",
            Metric::Cvr => "cvr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|m| m.name() == wanted)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
