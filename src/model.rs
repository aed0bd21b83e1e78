use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::number::Value;
use crate::period::Period;

/// The fixed set of indicators tracked on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Cpi,
    HousePrices,
    Unemployment,
    GdpMainland,
    KeyAggregates,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Cpi,
        Category::HousePrices,
        Category::Unemployment,
        Category::GdpMainland,
        Category::KeyAggregates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpi => "cpi",
            Self::HousePrices => "house-prices",
            Self::Unemployment => "unemployment",
            Self::GdpMainland => "gdp-mainland",
            Self::KeyAggregates => "key-aggregates",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("unknown category: {s:?}"))
    }
}

/// Identifies one figure. Rendered as `category/series/period`, which is
/// also the `data-ppr` attribute value of its region in the published page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub category: Category,
    pub series: String,
    pub period: Period,
}

impl RecordKey {
    pub fn new(category: Category, series: impl Into<String>, period: Period) -> Self {
        Self {
            category,
            series: series.into(),
            period,
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.trim().split('/');
        let (Some(category), Some(series), Some(period), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            anyhow::bail!("expected category/series/period");
        };
        if series.is_empty() {
            anyhow::bail!("series is empty");
        }
        let period = Period::parse_canonical(period)
            .ok_or_else(|| anyhow::anyhow!("invalid period: {period:?}"))?;
        Ok(Self::new(category.parse()?, series, period))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.series, self.period)
    }
}

impl Serialize for RecordKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub key: RecordKey,
    pub value: Value,
    /// The cell as printed in the report, before normalisation.
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    /// Located and parsed, but an optional row was absent.
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub category: Category,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    pub records: Vec<ExtractedRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_rows: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<TableError>,
}

impl TableOutcome {
    pub fn failed(category: Category, error: TableError) -> Self {
        Self {
            category,
            status: TableStatus::Failed,
            page: None,
            records: Vec::new(),
            missing_rows: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status != TableStatus::Failed
    }
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<TableError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serde_json::json!({ "kind": error.kind(), "message": error.to_string() })
            .serialize(serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    Available {
        #[serde(skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
    Unavailable { reason: String },
}

/// Everything one run learned from one report. Never persisted; it only
/// reaches the published page through the publisher.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    pub rules_version: String,
    pub source: SourceStatus,
    pub tables: BTreeMap<Category, TableOutcome>,
}

impl ExtractionResult {
    pub fn source_unavailable(release: Option<String>, rules_version: &str, reason: &str) -> Self {
        Self {
            release,
            rules_version: rules_version.to_owned(),
            source: SourceStatus::Unavailable {
                reason: reason.to_owned(),
            },
            tables: BTreeMap::new(),
        }
    }

    pub fn is_source_unavailable(&self) -> bool {
        matches!(self.source, SourceStatus::Unavailable { .. })
    }

    /// Records from every table that was not marked failed.
    pub fn usable_records(&self) -> impl Iterator<Item = &ExtractedRecord> {
        self.tables
            .values()
            .filter(|t| t.is_usable())
            .flat_map(|t| t.records.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableError> {
        self.tables.values().filter_map(|t| t.error.as_ref())
    }

    pub fn all_failed(&self) -> bool {
        !self.tables.is_empty() && self.tables.values().all(|t| !t.is_usable())
    }

    pub fn is_full_success(&self) -> bool {
        !self.is_source_unavailable()
            && !self.tables.is_empty()
            && self
                .tables
                .values()
                .all(|t| t.status == TableStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_parses_its_display_form() -> anyhow::Result<()> {
        let key = RecordKey::new(
            Category::GdpMainland,
            "forecast",
            Period::Quarter {
                year: 2026,
                quarter: 1,
            },
        );
        assert_eq!(key.to_string(), "gdp-mainland/forecast/2026Q1");
        assert_eq!(RecordKey::parse("gdp-mainland/forecast/2026Q1")?, key);
        Ok(())
    }

    #[test]
    fn record_key_rejects_malformed_keys() {
        for raw in [
            "cpi/actual",
            "cpi//2026-01",
            "gas/actual/2026-01",
            "cpi/actual/2026-13",
            "cpi/actual/2026-01/extra",
        ] {
            assert!(RecordKey::parse(raw).is_err(), "raw={raw}");
        }
    }
}
