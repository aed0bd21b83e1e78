//! Declarative table matcher rules.
//!
//! Each category maps to a rule naming the heading that introduces its
//! table, the kind of period in the header row and the rows to read. Rules
//! are data (YAML) tagged with a `format_version`, so a redesigned report is
//! handled by shipping a new rules file rather than changing the extractor.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context as _;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::Category;
use crate::period::PeriodKind;
use crate::release::Release;

const BUILTIN_RULES_YAML: &str = include_str!("../rules/ppr-2025.yaml");

const RELEASE_PLACEHOLDER: &str = "{release}";

/// Any release label, used when the release being processed is unknown.
const ANY_RELEASE: &str = r"[1-4]/\d{2}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherRules {
    pub format_version: String,
    /// Lines matching this end the data rows of a table.
    #[serde(default = "default_stop_pattern")]
    pub stop_pattern: String,
    pub tables: Vec<TableRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRule {
    pub category: Category,
    /// Alternative heading groups. A page qualifies when every term of at
    /// least one group appears in it.
    pub headings: Vec<Vec<String>>,
    pub period: PeriodKind,
    #[serde(default = "default_min_periods")]
    pub min_periods: usize,
    /// Read every labelled row, not just the listed ones.
    #[serde(default)]
    pub any_row: bool,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default)]
    pub rows: Vec<RowRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRule {
    pub label: String,
    pub series: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub occurrence: Occurrence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occurrence {
    #[default]
    First,
    Last,
}

fn default_stop_pattern() -> String {
    r"^(?:Tabell|Table)\b".to_owned()
}

fn default_min_periods() -> usize {
    2
}

fn default_max_rows() -> usize {
    40
}

fn default_required() -> bool {
    true
}

impl MatcherRules {
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_yaml(BUILTIN_RULES_YAML).context("parse built-in matcher rules")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read matcher rules: {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("parse matcher rules: {}", path.display()))
    }

    pub fn load_or_builtin(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let rules: Self = serde_yaml::from_str(yaml).context("deserialize matcher rules")?;
        rules.validate()?;
        Ok(rules)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.format_version.trim().is_empty() {
            anyhow::bail!("matcher rules format_version is empty");
        }
        if self.tables.is_empty() {
            anyhow::bail!("matcher rules define no tables");
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.category) {
                anyhow::bail!("duplicate rule for category {}", table.category);
            }
            if table.headings.is_empty() || table.headings.iter().any(|g| g.is_empty()) {
                anyhow::bail!("rule for {} has an empty heading group", table.category);
            }
            if table.min_periods == 0 {
                anyhow::bail!("rule for {}: min_periods must be > 0", table.category);
            }
            if !table.any_row && table.rows.is_empty() {
                anyhow::bail!("rule for {} selects no rows", table.category);
            }
            let mut series = HashSet::new();
            for row in &table.rows {
                if !is_valid_series(&row.series) {
                    anyhow::bail!(
                        "rule for {}: invalid series name {:?}",
                        table.category,
                        row.series
                    );
                }
                if !series.insert(row.series.as_str()) {
                    anyhow::bail!(
                        "rule for {}: duplicate series {:?}",
                        table.category,
                        row.series
                    );
                }
            }
        }

        self.compile(None).map(|_| ())
    }

    /// Builds the regexes for one run. `{release}` in row labels expands to
    /// the release's short label.
    pub fn compile(&self, release: Option<&Release>) -> anyhow::Result<CompiledRules> {
        let release_pattern = match release {
            Some(release) => regex::escape(&release.short_label()),
            None => ANY_RELEASE.to_owned(),
        };

        let stop = Regex::new(&format!("(?i){}", self.stop_pattern))
            .with_context(|| format!("compile stop_pattern {:?}", self.stop_pattern))?;

        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let headings = table
                .headings
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .map(|term| term_regex(term))
                        .collect::<anyhow::Result<Vec<_>>>()
                })
                .collect::<anyhow::Result<Vec<Vec<_>>>>()
                .with_context(|| format!("compile headings for {}", table.category))?;

            let mut rows = Vec::with_capacity(table.rows.len());
            for row in &table.rows {
                let pattern = row.label.replace(RELEASE_PLACEHOLDER, &release_pattern);
                let label = Regex::new(&format!("(?i)^(?:{pattern})")).with_context(|| {
                    format!("compile row label {:?} for {}", row.label, table.category)
                })?;
                rows.push(CompiledRow {
                    label,
                    series: row.series.clone(),
                    required: row.required,
                    occurrence: row.occurrence,
                });
            }

            tables.push(CompiledTable {
                category: table.category,
                heading_display: table
                    .headings
                    .iter()
                    .map(|g| g.join(" + "))
                    .collect::<Vec<_>>()
                    .join(" | "),
                headings,
                period: table.period,
                min_periods: table.min_periods,
                any_row: table.any_row,
                max_rows: table.max_rows,
                rows,
            });
        }

        Ok(CompiledRules {
            format_version: self.format_version.clone(),
            stop,
            tables,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub format_version: String,
    pub stop: Regex,
    pub tables: Vec<CompiledTable>,
}

#[derive(Debug, Clone)]
pub struct CompiledTable {
    pub category: Category,
    pub heading_display: String,
    pub headings: Vec<Vec<Regex>>,
    pub period: PeriodKind,
    pub min_periods: usize,
    pub any_row: bool,
    pub max_rows: usize,
    pub rows: Vec<CompiledRow>,
}

impl CompiledTable {
    /// Returns the group that matched, if any.
    pub fn matching_heading(&self, page_text: &str) -> Option<&[Regex]> {
        self.headings
            .iter()
            .find(|group| group.iter().all(|re| re.is_match(page_text)))
            .map(Vec::as_slice)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRow {
    pub label: Regex,
    pub series: String,
    pub required: bool,
    pub occurrence: Occurrence,
}

impl CompiledRow {
    /// Matches a row label from its start. On a match returns whatever
    /// follows the matched part; a match must end on a word boundary so that
    /// `KPI` does not select `KPI-JAE`.
    pub fn match_label<'a>(&self, label: &'a str) -> Option<&'a str> {
        let m = self.label.find(label)?;
        let tail = &label[m.end()..];
        let clean_tail = tail.trim_start_matches(crate::number::is_footnote_marker);
        if clean_tail.is_empty() || clean_tail.starts_with(char::is_whitespace) {
            Some(clean_tail.trim())
        } else {
            None
        }
    }
}

/// Heading term as a whitespace-tolerant, case-insensitive regex.
fn term_regex(term: &str) -> anyhow::Result<Regex> {
    let words = term.split_whitespace().map(regex::escape).collect::<Vec<_>>();
    if words.is_empty() {
        anyhow::bail!("empty heading term");
    }
    let mut pattern = String::from("(?i)");
    if term.trim_start().starts_with(char::is_alphanumeric) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&words.join(r"\s+"));
    if term.trim_end().ends_with(char::is_alphanumeric) {
        pattern.push_str(r"\b");
    }
    Regex::new(&pattern).with_context(|| format!("compile heading term {term:?}"))
}

fn is_valid_series(series: &str) -> bool {
    !series.is_empty()
        && series
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_cover_every_category() -> anyhow::Result<()> {
        let rules = MatcherRules::builtin()?;
        assert_eq!(rules.format_version, "ppr-2025");
        for category in Category::ALL {
            assert!(
                rules.tables.iter().any(|t| t.category == category),
                "missing rule for {category}"
            );
        }
        Ok(())
    }

    #[test]
    fn heading_terms_tolerate_whitespace_and_case() -> anyhow::Result<()> {
        let re = term_regex("Tabell 2a")?;
        assert!(re.is_match("se TABELL\n 2a nedenfor"));
        assert!(!re.is_match("Tabell 2ab"));
        assert!(!term_regex("Tabell 3")?.is_match("Tabell 30"));
        Ok(())
    }

    #[test]
    fn release_placeholder_expands_to_release_label() -> anyhow::Result<()> {
        let rules = MatcherRules::builtin()?;
        let compiled = rules.compile(Some(&Release::new(2025, 4)?))?;
        let cpi = compiled
            .tables
            .iter()
            .find(|t| t.category == Category::Cpi)
            .ok_or_else(|| anyhow::anyhow!("no cpi rule"))?;
        let forecast = &cpi.rows[1];
        assert_eq!(forecast.match_label("Anslag PPR 4/25"), Some(""));
        assert_eq!(forecast.match_label("Anslag PPR 3/25"), None);

        let any = rules.compile(None)?;
        let forecast = &any.tables[0].rows[1];
        assert_eq!(forecast.match_label("Anslag PPR 3/25"), Some(""));
        Ok(())
    }

    #[test]
    fn match_label_requires_word_boundary() -> anyhow::Result<()> {
        let row = CompiledRow {
            label: Regex::new("(?i)^(?:KPI)")?,
            series: "kpi".to_owned(),
            required: true,
            occurrence: Occurrence::First,
        };
        assert_eq!(row.match_label("KPI"), Some(""));
        assert_eq!(row.match_label("KPI¹ 2,1 3,0"), Some("2,1 3,0"));
        assert_eq!(row.match_label("KPI-JAE"), None);
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_rules() {
        let duplicate = r#"
format_version: test
tables:
  - category: cpi
    headings: [["Tabell 2a"]]
    period: month
    rows: [{ label: "Faktisk", series: actual }]
  - category: cpi
    headings: [["Tabell 2b"]]
    period: month
    rows: [{ label: "Faktisk", series: actual }]
"#;
        assert!(MatcherRules::from_yaml(duplicate).is_err());

        let bad_series = r#"
format_version: test
tables:
  - category: cpi
    headings: [["Tabell 2a"]]
    period: month
    rows: [{ label: "Faktisk", series: "Actual/1" }]
"#;
        assert!(MatcherRules::from_yaml(bad_series).is_err());

        let bad_regex = r#"
format_version: test
tables:
  - category: cpi
    headings: [["Tabell 2a"]]
    period: month
    rows: [{ label: "Faktisk(", series: actual }]
"#;
        assert!(MatcherRules::from_yaml(bad_regex).is_err());
    }
}
