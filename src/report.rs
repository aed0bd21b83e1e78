//! Machine-readable summary of one run, written with `run --report`.

use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use sha2::Digest as _;

use crate::model::{Category, ExtractionResult, RecordKey, SourceStatus, TableStatus};
use crate::publish::Change;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Updated,
    Unchanged,
    SourceUnavailable,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    pub rules_version: String,
    pub source: SourceReport,
    pub output: OutputReport,
    pub tables: Vec<TableReport>,
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unplaced: Vec<RecordKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(flatten)]
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputReport {
    pub path: String,
    pub sha256_before: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256_after: Option<String>,
    pub written: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub category: Category,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    pub records: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_rows: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(
        status: ReportStatus,
        result: &ExtractionResult,
        origin: Option<String>,
        output: OutputReport,
    ) -> Self {
        let tables = result
            .tables
            .values()
            .map(|t| TableReport {
                category: t.category,
                status: t.status,
                page: t.page,
                records: t.records.len(),
                missing_rows: t.missing_rows.clone(),
                error_kind: t.error.as_ref().map(|e| e.kind()),
                error: t.error.as_ref().map(ToString::to_string),
            })
            .collect();

        Self {
            generated_at: chrono::Utc::now(),
            status,
            message: None,
            release: result.release.clone(),
            rules_version: result.rules_version.clone(),
            source: SourceReport {
                origin,
                status: result.source.clone(),
            },
            output,
            tables,
            changes: Vec::new(),
            unplaced: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create report dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize run report")?;
        std::fs::write(path, format!("{json}\n"))
            .with_context(|| format!("write run report: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote run report");
        Ok(())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::model::TableOutcome;

    #[test]
    fn report_serializes_tables_and_source_state() -> anyhow::Result<()> {
        let mut result =
            ExtractionResult::source_unavailable(Some("1/26".to_owned()), "ppr-2025", "404");
        result.tables.insert(
            Category::Cpi,
            TableOutcome::failed(
                Category::Cpi,
                TableError::NotFound {
                    category: Category::Cpi,
                    heading: "Tabell 2a".to_owned(),
                },
            ),
        );
        let report = RunReport::new(
            ReportStatus::SourceUnavailable,
            &result,
            None,
            OutputReport {
                path: "index.html".to_owned(),
                sha256_before: sha256_hex(b""),
                sha256_after: None,
                written: false,
                dry_run: false,
                backup: None,
            },
        );

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["status"], "source_unavailable");
        assert_eq!(json["source"]["state"], "unavailable");
        assert_eq!(json["source"]["reason"], "404");
        assert_eq!(json["tables"][0]["error_kind"], "table_not_found");
        assert_eq!(
            json["output"]["sha256_before"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        Ok(())
    }
}
