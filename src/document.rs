//! The source report as a tree of pages, lines and cells.
//!
//! The report's text layer is all the extractor sees; table structure is
//! recovered from spacing. Runs of two or more spaces (or a tab) separate
//! cells. Lines without such gaps are split into a leading label and a
//! trailing run of value-like tokens.

use std::path::Path;

use anyhow::Context as _;
use sha2::Digest as _;

use crate::number;

const FORM_FEED: char = '\x0c';

#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Where the document came from (path or URL), for logs.
    pub origin: String,
    pub sha256: String,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based.
    pub number: usize,
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone)]
pub struct Line {
    pub text: String,
    pub words: Vec<Cell>,
    pub cells: Vec<Cell>,
    /// Cells were separated by wide gaps, so their columns line up with
    /// the header. Single-spaced lines only keep the reading order.
    pub gapped: bool,
}

/// A span of text on a line. `column` and `width` count characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub column: usize,
    pub width: usize,
}

impl SourceDocument {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read source: {}", path.display()))?;
        Self::from_bytes(&bytes, &path.display().to_string())
    }

    /// PDF input is recognised by its magic bytes; anything else must be a
    /// UTF-8 text dump with pages separated by form feeds.
    pub fn from_bytes(bytes: &[u8], origin: &str) -> anyhow::Result<Self> {
        let sha256 = hex::encode(sha2::Sha256::digest(bytes));
        let pages = if bytes.starts_with(b"%PDF") {
            pdf_pages(bytes).with_context(|| format!("extract pdf text: {origin}"))?
        } else {
            let text = std::str::from_utf8(bytes)
                .with_context(|| format!("source is neither PDF nor UTF-8 text: {origin}"))?;
            text.split(FORM_FEED).map(str::to_owned).collect()
        };

        let mut doc = Self::from_pages(pages, origin);
        doc.sha256 = sha256;
        tracing::debug!(origin, pages = doc.pages.len(), "loaded source document");
        Ok(doc)
    }

    pub fn from_text(text: &str, origin: &str) -> Self {
        let mut doc = Self::from_pages(text.split(FORM_FEED).map(str::to_owned), origin);
        doc.sha256 = hex::encode(sha2::Sha256::digest(text.as_bytes()));
        doc
    }

    fn from_pages(pages: impl IntoIterator<Item = String>, origin: &str) -> Self {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Page {
                number: idx + 1,
                lines: text.lines().map(Line::parse).collect(),
            })
            .collect();
        Self {
            origin: origin.to_owned(),
            sha256: String::new(),
            pages,
        }
    }
}

fn pdf_pages(bytes: &[u8]) -> anyhow::Result<Vec<String>> {
    // pdf-extract panics on some malformed inputs.
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| anyhow::anyhow!("pdf text extraction panicked"))?;
    let pages = extracted.map_err(|err| anyhow::anyhow!("{err:?}"))?;
    if pages.iter().all(|p| p.trim().is_empty()) {
        anyhow::bail!("pdf has no text layer (scanned or image-only)");
    }
    Ok(pages)
}

impl Page {
    /// Page text with whitespace collapsed, so that headings wrapped over
    /// several lines still match.
    pub fn normalized_text(&self) -> String {
        self.lines
            .iter()
            .flat_map(|l| l.text.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Line {
    pub fn parse(text: &str) -> Self {
        let text = text.trim_end().to_owned();
        let (words, gaps) = split_words(&text);
        // Leading indentation does not count as a cell gap.
        let gapped = gaps.iter().skip(1).any(|&g| g >= 2);
        let cells = build_cells(&words, &gaps, gapped);
        Self {
            text,
            words,
            cells,
            gapped,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.words.is_empty()
    }

    /// The first cell when it is not itself a value.
    pub fn label(&self) -> Option<&Cell> {
        self.cells.first().filter(|c| !is_value_like(&c.text))
    }

    /// Cells after the label.
    pub fn value_cells(&self) -> &[Cell] {
        match self.label() {
            Some(_) => &self.cells[1..],
            None => &self.cells,
        }
    }
}

impl Cell {
    pub fn center(&self) -> usize {
        self.column + self.width / 2
    }

    fn join(cells: &[Cell]) -> Self {
        let column = cells.first().map_or(0, |c| c.column);
        let end = cells.last().map_or(column, |c| c.column + c.width);
        Self {
            text: cells
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            column,
            width: end - column,
        }
    }
}

/// Re-attaches unit and footnote tokens (`%`, `1)`) to the word before them.
pub fn glue_suffixes(words: Vec<Cell>) -> Vec<Cell> {
    let mut out: Vec<Vec<Cell>> = Vec::new();
    for word in words {
        match out.last_mut() {
            Some(group) if number::is_suffix_token(&word.text) => group.push(word),
            _ => out.push(vec![word]),
        }
    }
    out.iter().map(|g| Cell::join(g)).collect()
}

pub fn is_value_like(text: &str) -> bool {
    number::parse_cell(text).is_ok()
}

/// Splits on ASCII whitespace only: no-break spaces are thousands separators
/// inside numbers. Also returns the whitespace width before each word, with
/// tabs counting as a wide gap.
fn split_words(text: &str) -> (Vec<Cell>, Vec<usize>) {
    let mut words = Vec::new();
    let mut gaps = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;
    let mut gap = 0usize;

    for (col, ch) in text.chars().enumerate() {
        if ch.is_ascii_whitespace() {
            if !current.is_empty() {
                words.push(Cell {
                    width: current.chars().count(),
                    text: std::mem::take(&mut current),
                    column: start,
                });
                gap = 0;
            }
            gap += if ch == '\t' { 2 } else { 1 };
            continue;
        }
        if current.is_empty() {
            start = col;
            gaps.push(gap);
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(Cell {
            width: current.chars().count(),
            text: current,
            column: start,
        });
    }

    (words, gaps)
}

fn build_cells(words: &[Cell], gaps: &[usize], gapped: bool) -> Vec<Cell> {
    let mut groups: Vec<Vec<Cell>> = Vec::new();
    for (idx, word) in words.iter().enumerate() {
        let joins_previous = if idx == 0 {
            false
        } else if number::is_suffix_token(&word.text) {
            true
        } else {
            gapped && gaps[idx] < 2
        };
        match groups.last_mut() {
            Some(group) if joins_previous => group.push(word.clone()),
            _ => groups.push(vec![word.clone()]),
        }
    }

    let mut cells: Vec<Cell> = groups.iter().map(|g| Cell::join(g)).collect();
    if gapped || cells.len() < 2 {
        return cells;
    }

    // Without gaps, everything before the trailing run of values is the label.
    let values = cells
        .iter()
        .rev()
        .take_while(|c| is_value_like(&c.text))
        .count();
    let label_len = cells.len() - values;
    if label_len > 1 {
        let label = Cell::join(&cells[..label_len]);
        cells.splice(..label_len, [label]);
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &Line) -> Vec<&str> {
        line.cells.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn gapped_lines_split_on_wide_spaces() {
        let line = Line::parse("Anslag PPR 4/25   1 234,5   2,9¹  -");
        assert_eq!(texts(&line), ["Anslag PPR 4/25", "1 234,5", "2,9¹", "-"]);
        assert_eq!(line.label().map(|c| c.text.as_str()), Some("Anslag PPR 4/25"));
        assert_eq!(line.value_cells().len(), 3);
        assert!(line.gapped);
    }

    #[test]
    fn single_spaced_lines_split_label_from_values() {
        let line = Line::parse("BNP Fastlands-Norge 1,1 0,6 1,9");
        assert_eq!(texts(&line), ["BNP Fastlands-Norge", "1,1", "0,6", "1,9"]);

        let line = Line::parse("KPI: 3.1 %");
        assert_eq!(texts(&line), ["KPI:", "3.1 %"]);

        let line = Line::parse("Faktisk 2,9 1) 3,0");
        assert_eq!(texts(&line), ["Faktisk", "2,9 1)", "3,0"]);
    }

    #[test]
    fn cells_keep_character_columns() {
        let line = Line::parse("Faktisk\t2,9    3,1");
        assert_eq!(line.cells[1].column, 8);
        assert_eq!(line.cells[2].column, 15);
        assert_eq!(line.cells[2].center(), 16);
    }

    #[test]
    fn no_break_spaces_stay_inside_numbers() {
        let line = Line::parse("Årslønn 1\u{a0}234,5 2,0");
        assert_eq!(texts(&line), ["Årslønn", "1\u{a0}234,5", "2,0"]);
    }

    #[test]
    fn pages_split_on_form_feed_and_normalize_whitespace() {
        let doc = SourceDocument::from_text("Tabell 2a\nKonsum-\npriser\x0cTabell   2b\n  Boligpriser", "test");
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].number, 2);
        assert_eq!(doc.pages[1].normalized_text(), "Tabell 2b Boligpriser");
        assert_eq!(doc.sha256.len(), 64);
    }

    #[test]
    fn pdf_text_layer_comes_out_single_spaced() -> anyhow::Result<()> {
        let doc = SourceDocument::from_bytes(
            include_bytes!("../tests/fixtures/ppr_4_2025_excerpt.pdf"),
            "excerpt.pdf",
        )?;
        assert_eq!(doc.pages.len(), 1);

        let faktisk = doc.pages[0]
            .lines
            .iter()
            .find(|l| l.text.starts_with("Faktisk"))
            .ok_or_else(|| anyhow::anyhow!("no Faktisk line"))?;
        assert_eq!(texts(faktisk), ["Faktisk", "3,1", "3,0"]);
        assert!(!faktisk.gapped);
        assert!(doc.pages[0].normalized_text().contains("okt.25 nov.25 des.25 jan.26"));
        Ok(())
    }

    #[test]
    fn pdf_without_text_is_rejected() {
        let err = SourceDocument::from_bytes(b"%PDF-1.4\nnot really a pdf", "broken.pdf")
            .err()
            .map(|e| format!("{e:#}"));
        assert!(err.is_some_and(|e| e.contains("extract pdf text")));
    }

    #[test]
    fn from_bytes_rejects_binary_that_is_not_pdf() {
        assert!(SourceDocument::from_bytes(&[0xff, 0xfe, 0x00, 0x81], "junk").is_err());
    }
}
