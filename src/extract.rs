use std::collections::{BTreeMap, HashSet};
use std::io::Write as _;

use anyhow::Context as _;
use regex::Regex;

use crate::cli::ExtractArgs;
use crate::document::{self, Cell, Line, Page, SourceDocument};
use crate::error::TableError;
use crate::model::{
    Category, ExtractedRecord, ExtractionResult, RecordKey, SourceStatus, TableOutcome,
    TableStatus,
};
use crate::number;
use crate::period::{Period, PeriodKind};
use crate::release::Release;
use crate::rules::{CompiledRules, CompiledTable, MatcherRules, Occurrence};

pub fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let release = args
        .release
        .as_deref()
        .map(Release::parse)
        .transpose()
        .context("parse --release")?
        .or_else(|| Release::from_file_name(&args.source));
    let rules = MatcherRules::load_or_builtin(args.rules.as_deref()).context("load rules")?;
    let compiled = rules.compile(release.as_ref()).context("compile rules")?;
    let source = SourceDocument::load(&args.source)?;

    let result = extract(&source, &compiled, release.map(|r| r.to_string()));

    let mut out = std::io::stdout().lock();
    if args.json {
        let json = serde_json::to_string_pretty(&result).context("serialize extraction result")?;
        writeln!(out, "{json}").context("write stdout")?;
        return Ok(());
    }

    for table in result.tables.values() {
        let status = match table.status {
            TableStatus::Success => "ok",
            TableStatus::Partial => "partial",
            TableStatus::Failed => "failed",
        };
        let page = table.page.map_or_else(|| "-".to_owned(), |p| p.to_string());
        writeln!(
            out,
            "{:<15} {status:<8} page {page:<4} {} record(s)",
            table.category,
            table.records.len()
        )
        .context("write stdout")?;
        if let Some(err) = &table.error {
            writeln!(out, "    {err}").context("write stdout")?;
        }
        for record in &table.records {
            writeln!(out, "    {} = {}", record.key, record.value).context("write stdout")?;
        }
    }
    Ok(())
}

/// Runs every table rule against the document. A table that cannot be read
/// is recorded as failed; the others are unaffected.
pub fn extract(
    source: &SourceDocument,
    rules: &CompiledRules,
    release: Option<String>,
) -> ExtractionResult {
    let page_texts = source
        .pages
        .iter()
        .map(Page::normalized_text)
        .collect::<Vec<_>>();

    let mut tables = BTreeMap::new();
    for table in &rules.tables {
        let outcome = extract_table(source, &page_texts, table, &rules.stop);
        match (&outcome.status, &outcome.error) {
            (TableStatus::Failed, Some(err)) => tracing::warn!(
                category = %table.category,
                kind = err.kind(),
                error = %err,
                "table extraction failed"
            ),
            _ => tracing::info!(
                category = %table.category,
                page = ?outcome.page,
                records = outcome.records.len(),
                status = ?outcome.status,
                missing_rows = ?outcome.missing_rows,
                "table extracted"
            ),
        }
        tables.insert(table.category, outcome);
    }

    let result = ExtractionResult {
        release,
        rules_version: rules.format_version.clone(),
        source: SourceStatus::Available {
            sha256: (!source.sha256.is_empty()).then(|| source.sha256.clone()),
        },
        tables,
    };

    for category in uncovered_categories(&result) {
        tracing::warn!(category = %category, "no matcher rule for category");
    }

    let failed = result.failures().collect::<Vec<_>>();
    tracing::info!(
        origin = %source.origin,
        tables = result.tables.len(),
        failed = failed.len(),
        records = result.usable_records().count(),
        "extraction finished"
    );
    if !failed.is_empty() {
        let summary = failed
            .iter()
            .map(|e| format!("{}: {}", e.category(), e.kind()))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::warn!(failures = %summary, "some tables were skipped; their published values are kept");
    }

    result
}

fn extract_table(
    source: &SourceDocument,
    page_texts: &[String],
    table: &CompiledTable,
    stop: &Regex,
) -> TableOutcome {
    let mut first_error = None;
    let mut candidates = 0usize;

    for (page, text) in source.pages.iter().zip(page_texts) {
        let Some(heading) = table.matching_heading(text) else {
            continue;
        };
        candidates += 1;

        match read_table(page, heading, table, stop) {
            Ok(read) => {
                let status = if read.missing_rows.is_empty() {
                    TableStatus::Success
                } else {
                    TableStatus::Partial
                };
                return TableOutcome {
                    category: table.category,
                    status,
                    page: Some(page.number),
                    records: read.records,
                    missing_rows: read.missing_rows,
                    error: None,
                };
            }
            // The heading matched and the rows were found, so this is the
            // table; a bad cell is not a reason to look elsewhere.
            Err(err @ TableError::Parse { .. }) => {
                let mut outcome = TableOutcome::failed(table.category, err);
                outcome.page = Some(page.number);
                return outcome;
            }
            Err(err) => {
                tracing::debug!(
                    category = %table.category,
                    page = page.number,
                    error = %err,
                    "heading matched but table could not be read; trying next page"
                );
                first_error.get_or_insert(err);
            }
        }
    }

    let error = match first_error {
        Some(err) => err,
        None => TableError::NotFound {
            category: table.category,
            heading: table.heading_display.clone(),
        },
    };
    tracing::debug!(category = %table.category, candidates, "no readable table");
    TableOutcome::failed(table.category, error)
}

#[derive(Debug)]
struct TableRead {
    records: Vec<ExtractedRecord>,
    missing_rows: Vec<String>,
}

#[derive(Debug)]
struct DataRow {
    label: String,
    label_words: Vec<Cell>,
    values: Vec<Cell>,
    gapped: bool,
}

#[derive(Debug, Clone, Copy)]
struct PeriodColumn {
    period: Period,
    center: usize,
}

fn read_table(
    page: &Page,
    heading: &[Regex],
    table: &CompiledTable,
    stop: &Regex,
) -> Result<TableRead, TableError> {
    let category = table.category;
    let structural = |details: String| TableError::StructuralChange { category, details };

    let anchor = heading
        .iter()
        .find_map(|re| page.lines.iter().position(|l| re.is_match(&l.text)))
        .unwrap_or(0);

    let window_end = (anchor + table.max_rows).min(page.lines.len());
    let (header_idx, columns) = page.lines[anchor..window_end]
        .iter()
        .enumerate()
        .map(|(offset, line)| (anchor + offset, scan_periods(line, table.period)))
        .find(|(_, cols)| cols.len() >= table.min_periods)
        .ok_or_else(|| {
            structural(format!(
                "no header row with at least {} {} columns below the heading",
                table.min_periods,
                kind_name(table.period)
            ))
        })?;

    let mut seen = HashSet::new();
    if let Some(dup) = columns.iter().find(|c| !seen.insert(c.period)) {
        return Err(structural(format!("period {} appears twice in header", dup.period)));
    }
    let header_gapped = page.lines[header_idx].gapped;

    let rows = collect_rows(&page.lines[header_idx + 1..], stop, table.max_rows);
    if rows.is_empty() {
        return Err(structural("header row is not followed by any data rows".to_owned()));
    }

    let mut selected: Vec<(String, &DataRow, Vec<Cell>)> = Vec::new();
    let mut claimed = HashSet::new();
    let mut missing_rows = Vec::new();

    for rule in &table.rows {
        let mut matches = rows.iter().enumerate().filter_map(|(idx, row)| {
            rule.match_label(&row.label).map(|tail| (idx, row, tail))
        });
        let found = match rule.occurrence {
            Occurrence::First => matches.next(),
            Occurrence::Last => matches.last(),
        };

        match found {
            Some((idx, row, tail)) => {
                claimed.insert(idx);
                let mut values = tail_cells(row, tail);
                values.extend(row.values.iter().cloned());
                selected.push((rule.series.clone(), row, values));
            }
            None if rule.required => {
                return Err(structural(format!(
                    "required row {:?} ({}) not found",
                    rule.series,
                    rule.label.as_str()
                )));
            }
            None => missing_rows.push(rule.series.clone()),
        }
    }

    if table.any_row {
        let mut series_seen = selected
            .iter()
            .map(|(series, _, _)| series.clone())
            .collect::<HashSet<_>>();
        for (idx, row) in rows.iter().enumerate() {
            if claimed.contains(&idx) {
                continue;
            }
            let (label_words, tail_words) = split_numeric_tail(&row.label_words);
            let series = slug(
                &label_words
                    .iter()
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
            if series.is_empty() {
                tracing::debug!(category = %category, row = %row.label, "skipping row without label");
                continue;
            }
            if !series_seen.insert(series.clone()) {
                tracing::warn!(category = %category, series = %series, "duplicate row label; keeping first");
                continue;
            }
            let mut values = document::glue_suffixes(tail_words);
            values.extend(row.values.iter().cloned());
            selected.push((series, row, values));
        }
    }

    let mut records = Vec::new();
    for (series, row, values) in selected {
        // Values pulled out of the label have no usable column position.
        let by_position = header_gapped && row.gapped && values.len() == row.values.len();
        let assigned = align(&columns, &values, by_position).map_err(|details| {
            structural(format!("row {:?}: {details}", row.label))
        })?;
        for (column, (period, cell)) in assigned.into_iter().enumerate() {
            let value = number::parse_cell(&cell.text).map_err(|err| TableError::Parse {
                category,
                row: row.label.clone(),
                column,
                cell: cell.text.clone(),
                reason: err.to_string(),
            })?;
            records.push(ExtractedRecord {
                key: RecordKey::new(category, series.clone(), period),
                value,
                raw: cell.text.clone(),
            });
        }
    }

    Ok(TableRead {
        records,
        missing_rows,
    })
}

/// Data rows between the header and the next stop line. A label on a line of
/// its own is carried over to the following line, which is how wrapped row
/// labels come out of the text layer.
fn collect_rows(lines: &[Line], stop: &Regex, max_rows: usize) -> Vec<DataRow> {
    let mut rows = Vec::new();
    let mut pending: Vec<Cell> = Vec::new();

    for line in lines.iter().take(max_rows) {
        if line.is_blank() {
            continue;
        }
        if stop.is_match(line.text.trim_start()) {
            break;
        }

        let label_words = line.label().map_or_else(Vec::new, |label| {
            line.words
                .iter()
                .filter(|w| w.column >= label.column && w.column < label.column + label.width)
                .cloned()
                .collect()
        });
        let values = line.value_cells().to_vec();

        if values.is_empty() {
            pending.extend(label_words);
            continue;
        }

        let mut words = std::mem::take(&mut pending);
        words.extend(label_words);
        let label = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        rows.push(DataRow {
            label,
            label_words: words,
            values,
            gapped: line.gapped,
        });
    }

    rows
}

/// Cells for the unmatched end of a row label (values that were absorbed
/// into the label because the line had no wide gaps).
fn tail_cells(row: &DataRow, tail: &str) -> Vec<Cell> {
    let count = tail.split_whitespace().count();
    let start = row.label_words.len().saturating_sub(count);
    document::glue_suffixes(row.label_words[start..].to_vec())
}

fn split_numeric_tail(words: &[Cell]) -> (&[Cell], Vec<Cell>) {
    let split = words
        .iter()
        .position(|w| looks_numeric(&w.text))
        .unwrap_or(words.len());
    (&words[..split], words[split..].to_vec())
}

fn looks_numeric(token: &str) -> bool {
    let body = token.trim_start_matches(['-', '+', '\u{2212}']);
    body.starts_with(|c: char| c.is_ascii_digit()) && !body.chars().any(char::is_alphabetic)
}

/// Pairs value cells with header columns. Full rows pair up in order. Short
/// rows (actuals that stop part-way) are placed by horizontal position when
/// the layout kept columns, and otherwise fill from the first period.
fn align(
    columns: &[PeriodColumn],
    values: &[Cell],
    by_position: bool,
) -> Result<Vec<(Period, Cell)>, String> {
    if values.is_empty() {
        return Err("row has no values".to_owned());
    }
    if values.len() > columns.len() {
        return Err(format!(
            "{} values for {} period columns",
            values.len(),
            columns.len()
        ));
    }
    if values.len() == columns.len() || !by_position {
        return Ok(columns
            .iter()
            .map(|c| c.period)
            .zip(values.iter().cloned())
            .collect());
    }

    let mut used = HashSet::new();
    let mut out = Vec::with_capacity(values.len());
    for cell in values {
        let nearest = columns
            .iter()
            .min_by_key(|c| c.center.abs_diff(cell.center()))
            .map(|c| c.period)
            .ok_or_else(|| "no period columns".to_owned())?;
        if !used.insert(nearest) {
            return Err(format!(
                "cannot place {} values under {} period columns",
                values.len(),
                columns.len()
            ));
        }
        out.push((nearest, cell.clone()));
    }
    Ok(out)
}

/// Finds period headers in a line. Report headers can span up to three words
/// (`1. kv. 26`), so the longest window that parses wins.
fn scan_periods(line: &Line, kind: PeriodKind) -> Vec<PeriodColumn> {
    let words = &line.words;
    let mut out = Vec::new();
    let mut i = 0usize;
    'outer: while i < words.len() {
        for width in (1..=3).rev() {
            if i + width > words.len() {
                continue;
            }
            let span = &words[i..i + width];
            let text = span
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(period) = Period::parse_header(&text, kind) {
                let first = &span[0];
                let last = &span[width - 1];
                let end = last.column + last.width;
                out.push(PeriodColumn {
                    period,
                    center: first.column + (end - first.column) / 2,
                });
                i += width;
                continue 'outer;
            }
        }
        i += 1;
    }
    out
}

fn kind_name(kind: PeriodKind) -> &'static str {
    match kind {
        PeriodKind::Month => "month",
        PeriodKind::Quarter => "quarter",
        PeriodKind::Year => "year",
    }
}

/// Series name for a free-form row label: `Sysselsetting, personer (KNR)`
/// becomes `sysselsetting-personer-knr`.
pub fn slug(label: &str) -> String {
    let trimmed = label.trim().trim_end_matches(number::is_footnote_marker);
    let mut out = String::new();
    for ch in trimmed.to_lowercase().chars() {
        match ch {
            'æ' => out.push_str("ae"),
            'ø' => out.push('o'),
            'å' => out.push('a'),
            c if c.is_ascii_alphanumeric() => out.push(c),
            _ => {
                if !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
    }
    out.trim_matches('-').to_owned()
}

/// Categories the rules did not produce a table outcome for.
pub fn uncovered_categories(result: &ExtractionResult) -> Vec<Category> {
    Category::ALL
        .into_iter()
        .filter(|c| !result.tables.contains_key(c))
        .collect()
}
