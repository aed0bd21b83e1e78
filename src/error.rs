use thiserror::Error;

use crate::model::Category;

/// Why a single table could not be turned into records.
///
/// These are isolated per category: the extractor records them in the
/// result and moves on to the next table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("table for {category} not found (heading {heading:?})")]
    NotFound { category: Category, heading: String },

    #[error("table layout for {category} changed: {details}")]
    StructuralChange { category: Category, details: String },

    #[error("cannot parse {category} cell {cell:?} (row {row:?}, column {column}): {reason}")]
    Parse {
        category: Category,
        row: String,
        column: usize,
        cell: String,
        reason: String,
    },
}

impl TableError {
    pub fn category(&self) -> Category {
        match self {
            Self::NotFound { category, .. }
            | Self::StructuralChange { category, .. }
            | Self::Parse { category, .. } => *category,
        }
    }

    /// Stable short tag used in logs and the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "table_not_found",
            Self::StructuralChange { .. } => "structural_format_change",
            Self::Parse { .. } => "parse_failure",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// The release has not been published yet. Expected between releases.
    #[error("release {release} is not available yet: {reason}")]
    Unavailable { release: String, reason: String },

    #[error("GET {url} rejected with HTTP {status}")]
    Rejected { url: String, status: u16 },

    #[error("GET {url} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },

    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid url {url}: {reason}")]
    Url { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid region key {key:?} at byte {offset}: {reason}")]
    InvalidRegionKey {
        key: String,
        offset: usize,
        reason: String,
    },

    #[error("region {key:?} at byte {offset} is not a plain-text leaf element")]
    MalformedRegion { key: String, offset: usize },

    #[error("write published document {path}: {source}")]
    OutputWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
