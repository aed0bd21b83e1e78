use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Month,
    Quarter,
    Year,
}

/// The time unit a figure applies to.
///
/// Canonical text forms: `2026-01`, `2026Q1`, `2026`. These are the forms used
/// in region keys of the published document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u32 },
    Year(i32),
}

impl Period {
    pub fn kind(&self) -> PeriodKind {
        match self {
            Self::Month { .. } => PeriodKind::Month,
            Self::Quarter { .. } => PeriodKind::Quarter,
            Self::Year(_) => PeriodKind::Year,
        }
    }

    /// Parses the canonical form written by `Display`.
    pub fn parse_canonical(raw: &str) -> Option<Self> {
        static MONTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());
        static QUARTER: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^(\d{4})Q([1-4])$").unwrap());
        static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})$").unwrap());

        let raw = raw.trim();
        if let Some(caps) = MONTH.captures(raw) {
            let year = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            return (1..=12)
                .contains(&month)
                .then_some(Self::Month { year, month });
        }
        if let Some(caps) = QUARTER.captures(raw) {
            return Some(Self::Quarter {
                year: caps[1].parse().ok()?,
                quarter: caps[2].parse().ok()?,
            });
        }
        if let Some(caps) = YEAR.captures(raw) {
            return Some(Self::Year(caps[1].parse().ok()?));
        }
        None
    }

    /// Parses a table header cell as printed in the report, e.g. `jan.26`,
    /// `januar 2026`, `1. kv. 26`, `K1 2026`, `2026Q1` or `2026`.
    pub fn parse_header(raw: &str, kind: PeriodKind) -> Option<Self> {
        let cell = clean_header_cell(raw);
        if cell.is_empty() {
            return None;
        }
        if let Some(canonical) = Self::parse_canonical(&cell.to_ascii_uppercase())
            && canonical.kind() == kind
        {
            return Some(canonical);
        }
        match kind {
            PeriodKind::Month => parse_month_header(&cell),
            PeriodKind::Quarter => parse_quarter_header(&cell),
            PeriodKind::Year => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            Self::Quarter { year, quarter } => write!(f, "{year:04}Q{quarter}"),
            Self::Year(year) => write!(f, "{year:04}"),
        }
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_canonical(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid period: {raw:?}")))
    }
}

fn clean_header_cell(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches(|c: char| crate::number::is_footnote_marker(c))
        .trim();
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    match raw.len() {
        2 => Some(2000 + year),
        4 => Some(year),
        _ => None,
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "mai" | "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "okt" | "oct" => 10,
        "nov" => 11,
        "des" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn parse_month_header(cell: &str) -> Option<Period> {
    static NAMED: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?P<m>[a-zæøå]{3,9})\.?[\s\-./]*(?P<y>\d{2}|\d{4})$").unwrap()
    });
    static NUMERIC: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?P<m>\d{1,2})[./](?P<y>\d{2}|\d{4})$").unwrap());

    let (month, year) = if let Some(caps) = NAMED.captures(cell) {
        (month_from_name(&caps["m"])?, expand_year(&caps["y"])?)
    } else if let Some(caps) = NUMERIC.captures(cell) {
        (caps["m"].parse().ok()?, expand_year(&caps["y"])?)
    } else {
        return None;
    };

    (1..=12)
        .contains(&month)
        .then_some(Period::Month { year, month })
}

fn parse_quarter_header(cell: &str) -> Option<Period> {
    static QUARTER_FIRST: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?P<q>[1-4])\s*\.?\s*(?:kvartal|kv|q)\.?[\s\-./]*(?P<y>\d{2}|\d{4})$")
            .unwrap()
    });
    static LETTER_FIRST: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:k|q)(?P<q>[1-4])[\s\-./]*(?P<y>\d{2}|\d{4})$").unwrap()
    });
    static YEAR_FIRST: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?P<y>\d{4})\s*[-\s]?\s*(?:k|q)(?P<q>[1-4])$").unwrap());

    let caps = QUARTER_FIRST
        .captures(cell)
        .or_else(|| LETTER_FIRST.captures(cell))
        .or_else(|| YEAR_FIRST.captures(cell))?;
    Some(Period::Quarter {
        year: expand_year(&caps["y"])?,
        quarter: caps["q"].parse().ok()?,
    })
}
