//! The published dashboard page and the merge of fresh figures into it.
//!
//! A region is a leaf element carrying `data-ppr="category/series/period"`
//! whose content is the figure as plain text. Publishing rewrites the text
//! of regions whose value changed and copies every other byte through.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::ops::Range;
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::cli::CheckArgs;
use crate::error::PublishError;
use crate::model::{ExtractedRecord, ExtractionResult, RecordKey};
use crate::number::{CellStyle, Value};

static START_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z][A-Za-z0-9-]*)(\s[^<>]*)?>").unwrap());
static PPR_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)data-ppr(-meta)?\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static DECIMAL_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)data-decimal\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[A-Za-z]+);").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionKey {
    Record(RecordKey),
    /// `data-ppr-meta="release"`: the label of the release last published.
    Release,
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(key) => write!(f, "{key}"),
            Self::Release => f.write_str("meta:release"),
        }
    }
}

impl Serialize for RegionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    pub key: RegionKey,
    /// Byte range of the element's content.
    pub content: Range<usize>,
    /// Content with entities decoded.
    pub text: String,
    /// From a `data-decimal` attribute on the element.
    pub decimal: Option<char>,
}

/// The current dashboard page with its regions located. Never mutated;
/// [`publish`] produces a new document.
#[derive(Debug, Clone)]
pub struct PublishedDocument {
    html: String,
    regions: Vec<Region>,
}

impl PublishedDocument {
    pub fn parse(html: String) -> Result<Self, PublishError> {
        let comments = COMMENT
            .find_iter(&html)
            .map(|m| m.range())
            .collect::<Vec<_>>();

        let mut regions = Vec::new();
        for caps in START_TAG.captures_iter(&html) {
            let Some(tag) = caps.get(0) else {
                continue;
            };
            if comments.iter().any(|c| c.contains(&tag.start())) {
                continue;
            }
            let attrs = caps.get(2).map_or("", |m| m.as_str());
            let Some(attr) = PPR_ATTR.captures(attrs) else {
                continue;
            };

            let raw_key = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
            let key = if attr.get(1).is_some() {
                match raw_key.trim() {
                    "release" => RegionKey::Release,
                    other => {
                        return Err(PublishError::InvalidRegionKey {
                            key: other.to_owned(),
                            offset: tag.start(),
                            reason: "unknown meta region (expected \"release\")".to_owned(),
                        });
                    }
                }
            } else {
                RecordKey::parse(raw_key).map(RegionKey::Record).map_err(|err| {
                    PublishError::InvalidRegionKey {
                        key: raw_key.to_owned(),
                        offset: tag.start(),
                        reason: format!("{err:#}"),
                    }
                })?
            };

            let name = &caps[1];
            let content = leaf_content(&html, tag.end(), name)
                .filter(|_| !attrs.trim_end().ends_with('/'))
                .ok_or_else(|| PublishError::MalformedRegion {
                    key: raw_key.to_owned(),
                    offset: tag.start(),
                })?;

            let decimal = DECIMAL_ATTR
                .captures(attrs)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .and_then(|m| m.as_str().trim().chars().next());

            regions.push(Region {
                key,
                text: decode_entities(&html[content.clone()]).into_owned(),
                content,
                decimal,
            });
        }

        Ok(Self { html, regions })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

/// Content range of the element opened just before `start`, provided the
/// next tag closes it.
fn leaf_content(html: &str, start: usize, name: &str) -> Option<Range<usize>> {
    let rest = &html[start..];
    let lt = rest.find('<')?;
    let close = rest[lt..].strip_prefix("</")?;
    let tail = close.get(..name.len()).filter(|t| t.eq_ignore_ascii_case(name))?;
    let after = &close[tail.len()..];
    after
        .starts_with(|c: char| c == '>' || c.is_ascii_whitespace())
        .then_some(start..start + lt)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Style for regions whose current text reveals nothing.
    pub default_style: CellStyle,
}

#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub key: RegionKey,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub updated: bool,
    pub document: String,
    pub changes: Vec<Change>,
    /// Records with no region in the document.
    pub unplaced: Vec<RecordKey>,
}

impl PublishOutcome {
    fn unchanged(current: &PublishedDocument) -> Self {
        Self {
            updated: false,
            document: current.html.clone(),
            changes: Vec::new(),
            unplaced: Vec::new(),
        }
    }
}

/// Merges `result` into `current`.
///
/// Only regions backed by a record from a usable table are considered, and
/// a record showing no figure (`-`) never replaces a published value. When
/// nothing differs the returned document is byte-identical to `current`.
pub fn publish(
    result: &ExtractionResult,
    current: &PublishedDocument,
    options: &PublishOptions,
) -> PublishOutcome {
    if result.is_source_unavailable() {
        tracing::info!("source unavailable; published document left as is");
        return PublishOutcome::unchanged(current);
    }

    let records: BTreeMap<&RecordKey, &ExtractedRecord> = result
        .usable_records()
        .filter(|r| !r.value.same_as(&Value::missing()))
        .map(|r| (&r.key, r))
        .collect();

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut changes = Vec::new();
    let mut placed = std::collections::HashSet::new();

    for region in &current.regions {
        let RegionKey::Record(key) = &region.key else {
            continue;
        };
        let Some(record) = records.get(key) else {
            continue;
        };
        placed.insert(key);

        if Value::from_published(&region.text).same_as(&record.value) {
            continue;
        }
        let default = region
            .decimal
            .map_or(options.default_style, CellStyle::with_decimal);
        let style = CellStyle::infer(&region.text, default);
        let rendered = record.value.render(&style);

        tracing::debug!(key = %key, old = %region.text.trim(), new = %rendered, "region changed");
        edits.push((region.content.clone(), replace_text(current, region, &rendered)));
        changes.push(Change {
            key: region.key.clone(),
            old: region.text.trim().to_owned(),
            new: rendered,
        });
    }

    let release_regions = current
        .regions
        .iter()
        .filter(|r| r.key == RegionKey::Release)
        .collect::<Vec<_>>();
    if !changes.is_empty() && !release_regions.is_empty() {
        match result.release.as_deref() {
            Some(label) => {
                for region in release_regions {
                    if region.text.trim() == label {
                        continue;
                    }
                    edits.push((region.content.clone(), replace_text(current, region, label)));
                    changes.push(Change {
                        key: RegionKey::Release,
                        old: region.text.trim().to_owned(),
                        new: label.to_owned(),
                    });
                }
            }
            None => tracing::warn!(
                regions = release_regions.len(),
                "release of the source is unknown; release label on the page is left as is (pass --release to set it)"
            ),
        }
    }

    let unplaced = records
        .keys()
        .filter(|k| !placed.contains(*k))
        .map(|k| (*k).clone())
        .collect::<Vec<_>>();
    if !unplaced.is_empty() {
        tracing::debug!(count = unplaced.len(), "records without a region");
    }

    if changes.is_empty() {
        let mut outcome = PublishOutcome::unchanged(current);
        outcome.unplaced = unplaced;
        return outcome;
    }

    edits.sort_by_key(|(range, _)| range.start);
    let mut document = String::with_capacity(current.html.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        document.push_str(&current.html[cursor..range.start]);
        document.push_str(&replacement);
        cursor = range.end;
    }
    document.push_str(&current.html[cursor..]);

    PublishOutcome {
        updated: true,
        document,
        changes,
        unplaced,
    }
}

/// New raw content for a region: the text escaped, with the whitespace that
/// surrounded the old text kept.
fn replace_text(current: &PublishedDocument, region: &Region, text: &str) -> String {
    let raw = &current.html[region.content.clone()];
    let lead = raw.len() - raw.trim_start().len();
    let trail_start = raw.trim_end().len().max(lead);
    format!("{}{}{}", &raw[..lead], escape_text(text), &raw[trail_start..])
}

fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    )
}

fn decode_entities(raw: &str) -> Cow<'_, str> {
    ENTITY.replace_all(raw, |caps: &Captures| {
        decode_entity(&caps[1]).map_or_else(|| caps[0].to_owned(), String::from)
    })
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = name.strip_prefix('#') {
        return dec.parse().ok().and_then(char::from_u32);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "thinsp" => '\u{2009}',
        "minus" => '\u{2212}',
        "ndash" => '\u{2013}',
        _ => return None,
    })
}

/// Lists the regions of a published page, one per line.
pub fn check(args: CheckArgs) -> anyhow::Result<()> {
    let html = crate::store::read_document(&args.html)?;
    let doc = PublishedDocument::parse(html)
        .with_context(|| format!("parse published document: {}", args.html.display()))?;

    let mut out = std::io::stdout().lock();
    for region in doc.regions() {
        writeln!(out, "{}\t{}", region.key, region.text.trim()).context("write stdout")?;
    }
    tracing::info!(regions = doc.regions().len(), "published document is valid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::model::{Category, SourceStatus, TableOutcome, TableStatus};

    const PAGE: &str = r#"<!doctype html>
<html>
<body>
  <!-- template: <td data-ppr="cpi/actual/2025-10">x</td> -->
  <p>Sist oppdatert: <span data-ppr-meta="release">3/25</span></p>
  <table>
    <tr><th>KPI okt.</th><td data-ppr="cpi/actual/2025-10"> 2,9 </td></tr>
    <tr><th>KPI jan.</th><td class="f" data-ppr="cpi/forecast/2026-01">2,7</td></tr>
    <tr><th>Boliger</th><td data-ppr="house-prices/actual/2025-10">4,0</td></tr>
    <tr><th>Renter</th><td data-ppr='key-aggregates/styringsrente/2026' data-decimal=".">4.00</td></tr>
  </table>
  <p>Ledighet: <b data-ppr="unemployment/actual/2025-10">&minus;</b></p>
  <p>KPI igjen: <em data-ppr="cpi/actual/2025-10">2,9</em></p>
</body>
</html>
"#;

    fn record(key: &str, value: Value) -> ExtractedRecord {
        ExtractedRecord {
            key: RecordKey::parse(key).unwrap(),
            raw: value.to_string(),
            value,
        }
    }

    fn result(records: Vec<ExtractedRecord>, failed: &[Category]) -> ExtractionResult {
        let mut tables = BTreeMap::new();
        for category in Category::ALL {
            let outcome = if failed.contains(&category) {
                TableOutcome::failed(
                    category,
                    TableError::NotFound {
                        category,
                        heading: "x".to_owned(),
                    },
                )
            } else {
                TableOutcome {
                    category,
                    status: TableStatus::Success,
                    page: Some(1),
                    records: records
                        .iter()
                        .filter(|r| r.key.category == category)
                        .cloned()
                        .collect(),
                    missing_rows: Vec::new(),
                    error: None,
                }
            };
            tables.insert(category, outcome);
        }
        ExtractionResult {
            release: Some("4/25".to_owned()),
            rules_version: "test".to_owned(),
            source: SourceStatus::Available { sha256: None },
            tables,
        }
    }

    fn page() -> PublishedDocument {
        PublishedDocument::parse(PAGE.to_owned()).unwrap()
    }

    #[test]
    fn parse_finds_regions_outside_comments() {
        let doc = page();
        let keys = doc
            .regions()
            .iter()
            .map(|r| r.key.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            [
                "meta:release",
                "cpi/actual/2025-10",
                "cpi/forecast/2026-01",
                "house-prices/actual/2025-10",
                "key-aggregates/styringsrente/2026",
                "unemployment/actual/2025-10",
                "cpi/actual/2025-10",
            ]
        );
        assert_eq!(doc.regions()[4].decimal, Some('.'));
        assert_eq!(doc.regions()[5].text, "\u{2212}");
    }

    #[test]
    fn parse_rejects_bad_keys_and_nested_regions() {
        let bad_key = r#"<td data-ppr="cpi/actual/2025-13">1</td>"#.to_owned();
        assert!(matches!(
            PublishedDocument::parse(bad_key),
            Err(PublishError::InvalidRegionKey { .. })
        ));

        let nested = r#"<td data-ppr="cpi/actual/2025-10"><b>1</b></td>"#.to_owned();
        assert!(matches!(
            PublishedDocument::parse(nested),
            Err(PublishError::MalformedRegion { .. })
        ));

        let meta = r#"<span data-ppr-meta="date">x</span>"#.to_owned();
        assert!(PublishedDocument::parse(meta).is_err());
    }

    #[test]
    fn equal_values_are_a_byte_identical_no_op() {
        let doc = page();
        let result = result(
            vec![
                record("cpi/actual/2025-10", Value::number(2.90, 2)),
                record("cpi/forecast/2026-01", Value::number(2.7, 1)),
                record("key-aggregates/styringsrente/2026", Value::number(4.0, 1)),
            ],
            &[],
        );
        let outcome = publish(&result, &doc, &PublishOptions::default());
        assert!(!outcome.updated);
        assert_eq!(outcome.document, PAGE);
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn changed_value_rewrites_only_its_regions() {
        let doc = page();
        let result = result(
            vec![
                record("cpi/actual/2025-10", Value::number(3.1, 1)),
                record("cpi/forecast/2026-01", Value::number(2.7, 1)),
            ],
            &[],
        );
        let outcome = publish(&result, &doc, &PublishOptions::default());
        assert!(outcome.updated);

        let expected = PAGE
            .replace(
                r#"data-ppr="cpi/actual/2025-10"> 2,9 <"#,
                r#"data-ppr="cpi/actual/2025-10"> 3,1 <"#,
            )
            .replace(
                r#"<em data-ppr="cpi/actual/2025-10">2,9</em>"#,
                r#"<em data-ppr="cpi/actual/2025-10">3,1</em>"#,
            )
            .replace(
                r#"<span data-ppr-meta="release">3/25</span>"#,
                r#"<span data-ppr-meta="release">4/25</span>"#,
            );
        assert_eq!(outcome.document, expected);
        assert_eq!(outcome.changes.len(), 3);
    }

    #[test]
    fn unknown_release_leaves_release_label_alone() {
        let mut result = result(vec![record("cpi/actual/2025-10", Value::number(3.1, 1))], &[]);
        result.release = None;

        let outcome = publish(&result, &page(), &PublishOptions::default());
        assert!(outcome.updated);
        assert!(outcome.document.contains(r#"<span data-ppr-meta="release">3/25</span>"#));
        assert!(outcome.changes.iter().all(|c| c.key != RegionKey::Release));
        assert_eq!(outcome.changes.len(), 2);
    }

    #[test]
    fn publishing_twice_is_idempotent() {
        let result = result(
            vec![
                record("cpi/actual/2025-10", Value::number(3.1, 1)),
                record("key-aggregates/styringsrente/2026", Value::number(4.25, 2)),
                record("unemployment/actual/2025-10", Value::number(-0.5, 1)),
            ],
            &[],
        );
        let first = publish(&result, &page(), &PublishOptions::default());
        assert!(first.updated);
        assert!(first.document.contains(r#"data-decimal=".">4.25<"#));
        assert!(first.document.contains("\u{2212}0,5"));

        let republished = PublishedDocument::parse(first.document.clone()).unwrap();
        let second = publish(&result, &republished, &PublishOptions::default());
        assert!(!second.updated);
        assert_eq!(second.document, first.document);
    }

    #[test]
    fn failed_categories_and_missing_values_keep_published_text() {
        let result = result(
            vec![
                record("house-prices/actual/2025-10", Value::number(9.9, 1)),
                record("cpi/actual/2025-10", Value::missing()),
            ],
            &[Category::HousePrices],
        );
        let outcome = publish(&result, &page(), &PublishOptions::default());
        assert!(!outcome.updated);
        assert_eq!(outcome.document, PAGE);
    }

    #[test]
    fn source_unavailable_is_a_guaranteed_no_op() {
        let result = ExtractionResult::source_unavailable(Some("1/26".to_owned()), "test", "404");
        let outcome = publish(&result, &page(), &PublishOptions::default());
        assert!(!outcome.updated);
        assert_eq!(outcome.document, PAGE);
    }

    #[test]
    fn inline_example_updates_single_cell() {
        let html = "<p>KPI <span data-ppr=\"cpi/kpi/2026Q1\">2.9</span> %</p>\n<p data-ppr=\"cpi/kpi/2025Q4\">2.8</p>\n";
        let doc = PublishedDocument::parse(html.to_owned()).unwrap();
        let result = result(vec![record("cpi/kpi/2026Q1", Value::number(3.1, 1))], &[]);
        let outcome = publish(&result, &doc, &PublishOptions::default());
        assert!(outcome.updated);
        assert_eq!(outcome.document, html.replace(">2.9<", ">3.1<"));
        assert!(outcome.unplaced.is_empty());
    }

    #[test]
    fn records_without_region_are_reported() {
        let result = result(vec![record("gdp-mainland/actual/2025Q3", Value::number(0.4, 1))], &[]);
        let outcome = publish(&result, &page(), &PublishOptions::default());
        assert!(!outcome.updated);
        assert_eq!(outcome.unplaced.len(), 1);
    }
}
