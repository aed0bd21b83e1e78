//! One scheduled run: resolve the report, extract it, publish the result.

use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

use crate::cli::RunArgs;
use crate::config::{FetchConfig, OutputConfig};
use crate::document::SourceDocument;
use crate::error::FetchError;
use crate::model::ExtractionResult;
use crate::number::CellStyle;
use crate::publish::{PublishOptions, PublishedDocument};
use crate::release::Release;
use crate::report::{OutputReport, ReportStatus, RunReport};
use crate::rules::MatcherRules;

pub const EXIT_UPDATED: u8 = 0;
pub const EXIT_HARD_FAILURE: u8 = 1;
pub const EXIT_NO_OP: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Updated,
    Unchanged,
    SourceUnavailable,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Updated => EXIT_UPDATED,
            Self::Unchanged | Self::SourceUnavailable => EXIT_NO_OP,
        }
    }
}

impl From<RunOutcome> for ReportStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Updated => Self::Updated,
            RunOutcome::Unchanged => Self::Unchanged,
            RunOutcome::SourceUnavailable => Self::SourceUnavailable,
        }
    }
}

/// The report a run works on, once resolved.
enum Resolved {
    Document {
        release: Option<Release>,
        document: SourceDocument,
    },
    Unavailable {
        release: Release,
        reason: String,
    },
}

pub async fn run(args: RunArgs) -> anyhow::Result<RunOutcome> {
    let output = OutputConfig {
        html: args.html.clone(),
        backup_dir: args.backup_dir.clone(),
        dry_run: args.dry_run,
    };
    let options = PublishOptions {
        default_style: CellStyle::with_decimal(args.decimal_separator),
    };

    let rules = MatcherRules::load_or_builtin(args.rules.as_deref()).context("load rules")?;

    // The page is read before anything is fetched so that a missing or
    // broken page fails fast.
    let current_html = crate::store::read_document(&output.html)?;
    let current = PublishedDocument::parse(current_html.clone())
        .with_context(|| format!("parse published document: {}", output.html.display()))?;
    tracing::info!(
        path = %output.html.display(),
        regions = current.regions().len(),
        "loaded published document"
    );

    let explicit_release = args
        .release
        .as_deref()
        .map(Release::parse)
        .transpose()
        .context("parse --release")?;

    let resolved = match args.source.as_deref() {
        Some(path) => Resolved::Document {
            release: explicit_release.or_else(|| Release::from_file_name(path)),
            document: SourceDocument::load(path)?,
        },
        None => {
            let release = explicit_release.unwrap_or_else(|| {
                crate::release::latest_expected_release(chrono::Local::now().date_naive())
            });
            fetch_source(release, args.download_dir.as_deref()).await?
        }
    };

    let (result, origin) = match resolved {
        Resolved::Unavailable { release, reason } => {
            tracing::info!(%release, %reason, "report not published yet; nothing to do");
            (
                ExtractionResult::source_unavailable(
                    Some(release.to_string()),
                    &rules.format_version,
                    &reason,
                ),
                None,
            )
        }
        Resolved::Document { release, document } => {
            let compiled = rules.compile(release.as_ref()).context("compile rules")?;
            let result = crate::extract::extract(
                &document,
                &compiled,
                release.map(|r| r.to_string()),
            );
            (result, Some(document.origin))
        }
    };

    let mut output_report = OutputReport {
        path: output.html.display().to_string(),
        sha256_before: crate::report::sha256_hex(current_html.as_bytes()),
        sha256_after: None,
        written: false,
        dry_run: output.dry_run,
        backup: None,
    };

    if let Err(err) = check_result(&result, args.strict) {
        if let Some(path) = args.report.as_deref() {
            let mut report = RunReport::new(ReportStatus::Failed, &result, origin, output_report);
            report.message = Some(format!("{err:#}"));
            report.write(path)?;
        }
        return Err(err);
    }

    let published = crate::publish::publish(&result, &current, &options);
    let outcome = if result.is_source_unavailable() {
        RunOutcome::SourceUnavailable
    } else if published.updated {
        RunOutcome::Updated
    } else {
        RunOutcome::Unchanged
    };

    if published.updated {
        output_report.sha256_after = Some(crate::report::sha256_hex(published.document.as_bytes()));
        if output.dry_run {
            tracing::info!(changes = published.changes.len(), "dry run; not writing");
        } else {
            if let Some(dir) = output.backup_dir.as_deref() {
                let backup = crate::store::backup_document(
                    &output.html,
                    &current_html,
                    dir,
                    chrono::Local::now(),
                )?;
                output_report.backup = Some(backup.display().to_string());
            }
            crate::store::write_document(&output.html, &published.document)?;
            output_report.written = true;
        }
    }

    tracing::info!(
        outcome = ?outcome,
        changes = published.changes.len(),
        unplaced = published.unplaced.len(),
        "run finished"
    );

    if let Some(path) = args.report.as_deref() {
        let mut report = RunReport::new(outcome.into(), &result, origin, output_report);
        report.changes = published.changes;
        report.unplaced = published.unplaced;
        report.write(path)?;
    }

    Ok(outcome)
}

async fn fetch_source(release: Release, download_dir: Option<&Path>) -> anyhow::Result<Resolved> {
    let config = FetchConfig::from_env().context("read fetch config")?;
    match crate::fetch::fetch_release(&release, &config, download_dir).await {
        Ok(fetched) => {
            let document = SourceDocument::from_bytes(&fetched.bytes, &fetched.origin)?;
            Ok(Resolved::Document {
                release: Some(fetched.release),
                document,
            })
        }
        Err(FetchError::Unavailable { reason, .. }) => Ok(Resolved::Unavailable { release, reason }),
        Err(err) => Err(err).with_context(|| format!("fetch report {release}")),
    }
}

/// A run that would publish nothing useful is a hard failure.
fn check_result(result: &ExtractionResult, strict: bool) -> anyhow::Result<()> {
    if result.is_source_unavailable() {
        return Ok(());
    }
    if result.all_failed() {
        let failures = describe_failures(result);
        anyhow::bail!("no table could be extracted ({failures}); check the matcher rules");
    }
    if strict && result.failures().next().is_some() {
        let failures = describe_failures(result);
        anyhow::bail!("--strict: some tables failed ({failures})");
    }
    Ok(())
}

fn describe_failures(result: &ExtractionResult) -> String {
    result
        .failures()
        .map(|e| format!("{}: {}", e.category(), e.kind()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const REPORT: &str = include_str!("../tests/fixtures/ppr_4_2025.txt");
    const DASHBOARD: &str = include_str!("../tests/fixtures/dashboard.html");

    struct Workspace {
        dir: tempfile::TempDir,
        source: PathBuf,
        html: PathBuf,
    }

    fn workspace(report: &str) -> anyhow::Result<Workspace> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("ppr_4_2025.txt");
        let html = dir.path().join("index.html");
        std::fs::write(&source, report)?;
        std::fs::write(&html, DASHBOARD)?;
        Ok(Workspace { dir, source, html })
    }

    fn args(ws: &Workspace) -> RunArgs {
        RunArgs {
            source: Some(ws.source.clone()),
            html: ws.html.clone(),
            rules: None,
            release: None,
            download_dir: None,
            backup_dir: None,
            report: None,
            dry_run: false,
            strict: false,
            decimal_separator: ',',
        }
    }

    #[tokio::test]
    async fn second_run_over_same_report_is_a_no_op() -> anyhow::Result<()> {
        let ws = workspace(REPORT)?;

        assert_eq!(run(args(&ws)).await?, RunOutcome::Updated);
        let first = std::fs::read_to_string(&ws.html)?;
        assert!(first.contains(r#"<td data-ppr="cpi/actual/2025-11">3,0</td>"#));
        assert!(first.contains(r#"<td data-ppr="cpi/forecast/2026-01">2,8</td>"#));
        assert!(first.contains(r#"<span data-ppr-meta="release">4/25</span>"#));
        assert!(first.contains(r#"<span data-ppr="house-prices/actual/2025-12">5,1</span>"#));
        assert!(first.contains(r#"<span data-ppr="key-aggregates/styringsrente/2026">3,8</span>"#));

        assert_eq!(run(args(&ws)).await?, RunOutcome::Unchanged);
        assert_eq!(std::fs::read_to_string(&ws.html)?, first);
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_reports_changes_without_writing() -> anyhow::Result<()> {
        let ws = workspace(REPORT)?;
        let report_path = ws.dir.path().join("out").join("report.json");
        let mut run_args = args(&ws);
        run_args.dry_run = true;
        run_args.report = Some(report_path.clone());

        assert_eq!(run(run_args).await?, RunOutcome::Updated);
        assert_eq!(std::fs::read_to_string(&ws.html)?, DASHBOARD);

        let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report_path)?)?;
        assert_eq!(report["status"], "updated");
        assert_eq!(report["output"]["written"], false);
        assert_eq!(report["changes"].as_array().map(Vec::len), Some(4));
        assert_eq!(report["release"], "4/25");
        Ok(())
    }

    #[tokio::test]
    async fn backup_is_taken_before_replacing() -> anyhow::Result<()> {
        let ws = workspace(REPORT)?;
        let backups = ws.dir.path().join("backups");
        let mut run_args = args(&ws);
        run_args.backup_dir = Some(backups.clone());

        run(run_args).await?;

        let saved = std::fs::read_dir(&backups)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(saved.len(), 1);
        assert!(saved[0].file_name().to_string_lossy().starts_with("index_backup_"));
        assert_eq!(std::fs::read_to_string(saved[0].path())?, DASHBOARD);
        Ok(())
    }

    #[tokio::test]
    async fn failed_table_keeps_its_published_values() -> anyhow::Result<()> {
        let broken = REPORT.replace("Tabell 2a Konsumpriser", "Figur 2a Noe annet");
        let ws = workspace(&broken)?;

        assert_eq!(run(args(&ws)).await?, RunOutcome::Updated);
        let html = std::fs::read_to_string(&ws.html)?;
        assert!(html.contains(r#"<td data-ppr="cpi/actual/2025-11">2,9</td>"#));
        assert!(html.contains(r#"<td data-ppr="cpi/forecast/2026-01">2,7</td>"#));
        Ok(())
    }

    #[tokio::test]
    async fn strict_run_fails_on_any_failed_table() -> anyhow::Result<()> {
        let broken = REPORT.replace("Tabell 2b Boligpriser", "Tabell 9 Annet");
        let ws = workspace(&broken)?;
        let mut run_args = args(&ws);
        run_args.strict = true;

        assert!(run(run_args).await.is_err());
        assert_eq!(std::fs::read_to_string(&ws.html)?, DASHBOARD);
        Ok(())
    }

    #[tokio::test]
    async fn unrecognised_report_is_a_hard_failure() -> anyhow::Result<()> {
        let ws = workspace("Årsrapport 2025\nIngen tabeller her\n")?;
        let report_path = ws.dir.path().join("report.json");
        let mut run_args = args(&ws);
        run_args.report = Some(report_path.clone());

        let err = run(run_args).await.unwrap_err();
        assert!(format!("{err:#}").contains("no table could be extracted"));
        assert_eq!(std::fs::read_to_string(&ws.html)?, DASHBOARD);

        let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report_path)?)?;
        assert_eq!(report["status"], "failed");
        Ok(())
    }

    #[tokio::test]
    async fn missing_page_fails_before_reading_the_source() -> anyhow::Result<()> {
        let ws = workspace(REPORT)?;
        std::fs::remove_file(&ws.html)?;
        assert!(run(args(&ws)).await.is_err());
        assert!(!ws.html.exists());
        Ok(())
    }

    #[test]
    fn exit_codes_separate_updated_from_no_op() {
        assert_eq!(RunOutcome::Updated.exit_code(), 0);
        assert_eq!(RunOutcome::Unchanged.exit_code(), 3);
        assert_eq!(RunOutcome::SourceUnavailable.exit_code(), 3);
    }
}
