//! Locale-tolerant parsing and rendering of table cell values.
//!
//! The report prints numbers the Norwegian way (`2,9`, `1 234,5`, `−0,3`)
//! with occasional footnote markers and unit suffixes glued on (`3,1¹`,
//! `2,5*`, `4,0 1)`, `3.1 %`). Parsing strips those and produces a [`Value`]
//! whose equality ignores formatting.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Cells that mean "no figure" in the report.
const MISSING_MARKERS: &[&str] = &["-", "–", "—", "..", "...", "n/a", "na", "x"];

/// Characters used as thousands separators, apart from `.` and `,`.
const GROUP_SPACES: &[char] = &[' ', '\u{a0}', '\u{202f}', '\u{2009}'];

const MINUS_SIGNS: &[char] = &['-', '\u{2212}', '\u{2013}'];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Value {
    Number { value: f64, decimals: u8 },
    Text { text: String },
}

impl Value {
    pub fn missing() -> Self {
        Self::Text {
            text: "-".to_owned(),
        }
    }

    pub fn number(value: f64, decimals: u8) -> Self {
        Self::Number { value, decimals }
    }

    /// Reads the text of a published region. Anything that is not a number
    /// is kept as text.
    pub fn from_published(raw: &str) -> Self {
        match parse_cell(raw) {
            Ok(value) => value,
            Err(_) => Self::Text {
                text: collapse_whitespace(raw),
            },
        }
    }

    /// Formatting-insensitive equality.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number { value: a, .. }, Self::Number { value: b, .. }) => {
                (a - b).abs() < 1e-9
            }
            (Self::Text { text: a }, Self::Text { text: b }) => {
                collapse_whitespace(a) == collapse_whitespace(b)
            }
            _ => false,
        }
    }

    pub fn render(&self, style: &CellStyle) -> String {
        match self {
            Self::Number { value, decimals } => render_number(*value, *decimals, style),
            Self::Text { text } => text.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number { value, decimals } => {
                write!(f, "{:.*}", usize::from(*decimals), value)
            }
            Self::Text { text } => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NumberError {
    #[error("empty cell")]
    Empty,
    #[error("not a number")]
    NotNumeric,
    #[error("ambiguous separators")]
    Ambiguous,
}

/// How numbers look in a published document cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellStyle {
    pub decimal: char,
    pub minus: char,
    pub grouping: Option<char>,
}

impl CellStyle {
    pub fn with_decimal(decimal: char) -> Self {
        Self {
            decimal,
            minus: '-',
            grouping: None,
        }
    }

    /// Adopts the conventions of the text a region currently shows, falling
    /// back to `default` for anything the text does not reveal.
    pub fn infer(current: &str, default: CellStyle) -> Self {
        static DECIMAL: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\d([.,])\d+\D*$").unwrap());
        static GROUPED: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\d([ \u{a0}\u{202f}\u{2009}])\d{3}\b").unwrap());

        let mut style = default;
        if let Some(caps) = DECIMAL.captures(current) {
            let sep = caps[1].chars().next().unwrap_or(default.decimal);
            // "1.234" with '.' as the only separator is a grouped integer in a
            // comma-decimal document; don't flip the decimal on that.
            let digits_after = caps.get(0).map_or(0, |m| {
                m.as_str().chars().skip(2).take_while(char::is_ascii_digit).count()
            });
            if !(digits_after == 3 && sep != default.decimal) {
                style.decimal = sep;
            }
        }
        if current.contains('\u{2212}') {
            style.minus = '\u{2212}';
        }
        if let Some(caps) = GROUPED.captures(current) {
            style.grouping = caps[1].chars().next();
        }
        style
    }
}

impl Default for CellStyle {
    fn default() -> Self {
        Self::with_decimal(',')
    }
}

pub fn is_footnote_marker(c: char) -> bool {
    matches!(
        c,
        '*' | '†' | '‡' | '⁾' | '¹' | '²' | '³' | '⁴' | '⁵' | '⁶' | '⁷' | '⁸' | '⁹' | '⁰'
    )
}

/// Returns true for tokens that are only a unit or footnote suffix and
/// belong to the preceding value (`%`, `pst.`, `1)`, `*`).
pub fn is_suffix_token(token: &str) -> bool {
    static NOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\(?[0-9a-z]\)$").unwrap());
    let lower = token.trim().to_lowercase();
    !lower.is_empty()
        && (matches!(lower.as_str(), "%" | "pst" | "pst." | "prosent" | "pp" | "p.p." | "%-poeng")
            || lower.chars().all(is_footnote_marker)
            || NOTE.is_match(&lower))
}

/// Parses a single table cell into a [`Value`].
///
/// Dash-like cells become [`Value::missing`]. Footnote markers and unit
/// suffixes are removed first and never cause a failure on their own.
pub fn parse_cell(raw: &str) -> Result<Value, NumberError> {
    let stripped = strip_markers(raw);
    if stripped.is_empty() {
        return Err(NumberError::Empty);
    }
    if MISSING_MARKERS.contains(&stripped.to_lowercase().as_str()) {
        return Ok(Value::missing());
    }
    let (value, decimals) = parse_number(&stripped)?;
    Ok(Value::number(value, decimals))
}

fn strip_markers(raw: &str) -> String {
    static TRAILING_NOTE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?:\s+\(?[0-9a-z]\)|[¹²³⁴⁵⁶⁷⁸⁹⁰]+\))$").unwrap());
    static UNIT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\s*(?:%-poeng|%|pst\.?|prosent|p\.p\.|pp)$").unwrap()
    });

    let mut s = raw.trim().to_owned();
    loop {
        let before = s.len();
        s = s.trim_end_matches(is_footnote_marker).trim_end().to_owned();
        s = TRAILING_NOTE.replace(&s, "").into_owned();
        s = UNIT.replace(&s, "").into_owned();
        s = s.trim().to_owned();
        if s.len() == before {
            break;
        }
    }
    s.trim_start_matches(is_footnote_marker).trim().to_owned()
}

fn parse_number(raw: &str) -> Result<(f64, u8), NumberError> {
    let mut s = strip_space_grouping(raw)?;

    let negative = s.starts_with(MINUS_SIGNS);
    if negative {
        s = s.trim_start_matches(MINUS_SIGNS).to_owned();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.to_owned();
    }

    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(NumberError::NotNumeric);
    }
    if !s.starts_with(|c: char| c.is_ascii_digit()) && !s.starts_with(['.', ',']) {
        return Err(NumberError::NotNumeric);
    }

    let commas = s.matches(',').count();
    let dots = s.matches('.').count();
    let (integer, fraction) = match (commas, dots) {
        (0, 0) => (s.clone(), String::new()),
        (_, 0) => split_single_kind(&s, ',')?,
        (0, _) => split_single_kind(&s, '.')?,
        _ => {
            let last_comma = s.rfind(',').unwrap_or(0);
            let last_dot = s.rfind('.').unwrap_or(0);
            let (decimal, group) = if last_comma > last_dot {
                (',', '.')
            } else {
                ('.', ',')
            };
            if s.matches(decimal).count() != 1 {
                return Err(NumberError::Ambiguous);
            }
            let (int, frac) = s.split_once(decimal).ok_or(NumberError::Ambiguous)?;
            validate_grouping(int, group)?;
            (int.replace(group, ""), frac.to_owned())
        }
    };

    if fraction.contains(['.', ',']) {
        return Err(NumberError::Ambiguous);
    }
    let canonical = if fraction.is_empty() {
        integer.clone()
    } else {
        format!("{}.{fraction}", if integer.is_empty() { "0" } else { &integer })
    };
    let value: f64 = canonical.parse().map_err(|_| NumberError::NotNumeric)?;
    let decimals = u8::try_from(fraction.len()).map_err(|_| NumberError::NotNumeric)?;

    Ok((if negative { -value } else { value }, decimals))
}

/// One kind of separator present. A single occurrence is a decimal mark;
/// several are thousands grouping.
fn split_single_kind(s: &str, sep: char) -> Result<(String, String), NumberError> {
    if s.matches(sep).count() == 1 {
        let (int, frac) = s.split_once(sep).ok_or(NumberError::Ambiguous)?;
        return Ok((int.to_owned(), frac.to_owned()));
    }
    validate_grouping(s, sep)?;
    Ok((s.replace(sep, ""), String::new()))
}

/// Removes space-like thousands separators. Every group after the first
/// must have exactly three digits, so `3 4` is two numbers, not 34.
fn strip_space_grouping(raw: &str) -> Result<String, NumberError> {
    if !raw.contains(GROUP_SPACES) {
        return Ok(raw.to_owned());
    }
    let mut parts = raw.split(GROUP_SPACES);
    let first = parts
        .next()
        .unwrap_or_default()
        .trim_start_matches(MINUS_SIGNS)
        .trim_start_matches('+');
    if first.is_empty() || first.len() > 3 || !first.chars().all(|c| c.is_ascii_digit()) {
        return Err(NumberError::Ambiguous);
    }
    for part in parts {
        let digits = part.split(['.', ',']).next().unwrap_or_default();
        if digits.len() != 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(NumberError::Ambiguous);
        }
    }
    Ok(raw.chars().filter(|c| !GROUP_SPACES.contains(c)).collect())
}

fn validate_grouping(int: &str, group: char) -> Result<(), NumberError> {
    let mut parts = int.split(group);
    let first = parts.next().unwrap_or_default();
    if first.is_empty() || first.len() > 3 {
        return Err(NumberError::Ambiguous);
    }
    if parts.any(|p| p.len() != 3) {
        return Err(NumberError::Ambiguous);
    }
    Ok(())
}

fn render_number(value: f64, decimals: u8, style: &CellStyle) -> String {
    let formatted = format!("{:.*}", usize::from(decimals), value.abs());
    let (int, frac) = match formatted.split_once('.') {
        Some((int, frac)) => (int.to_owned(), Some(frac.to_owned())),
        None => (formatted.clone(), None),
    };

    let int = match style.grouping {
        Some(group) if int.len() > 3 => {
            let mut out = String::new();
            for (i, ch) in int.chars().enumerate() {
                if i > 0 && (int.len() - i) % 3 == 0 {
                    out.push(group);
                }
                out.push(ch);
            }
            out
        }
        _ => int,
    };

    let is_zero = formatted.chars().all(|c| c == '0' || c == '.');
    let mut out = String::new();
    if value.is_sign_negative() && !is_zero {
        out.push(style.minus);
    }
    out.push_str(&int);
    if let Some(frac) = frac {
        out.push(style.decimal);
        out.push_str(&frac);
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
