//! Release identification and the publication calendar.
//!
//! The report is published four times a year, around the 20th of March,
//! June, September and December. Releases are numbered 1-4 within a year and
//! printed as `4/25`.

use std::fmt;
use std::io::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context as _;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::ScheduleArgs;
use crate::config::FetchConfig;

pub const DEFAULT_BASE_URL: &str = "https://www.norges-bank.no/aktuelt/nyheter-og-hendelser/Publikasjoner/Pengepolitisk-rapport-med-vurdering-av-finansiell-stabilitet";

/// (month, day) each release is expected on.
const SCHEDULE: [(u32, u32); 4] = [(3, 20), (6, 20), (9, 20), (12, 20)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Release {
    pub year: i32,
    pub number: u32,
}

impl Release {
    pub fn new(year: i32, number: u32) -> anyhow::Result<Self> {
        if !(1..=4).contains(&number) {
            anyhow::bail!("release number must be 1-4, got {number}");
        }
        if !(2000..=2099).contains(&year) {
            anyhow::bail!("release year out of range: {year}");
        }
        Ok(Self { year, number })
    }

    /// Accepts `4/25`, `4/2025`, `2025-4`, `ppr-42025` and `ppr_4_2025`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        static SLASHED: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^([1-4])/(\d{2}|\d{4})$").unwrap());
        static DASHED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-([1-4])$").unwrap());
        static SLUG: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^ppr[-_]?([1-4])[-_]?(\d{4})$").unwrap());

        let raw = raw.trim().to_ascii_lowercase();
        let (number, year) = if let Some(caps) = SLASHED.captures(&raw) {
            (caps[1].to_owned(), caps[2].to_owned())
        } else if let Some(caps) = DASHED.captures(&raw) {
            (caps[2].to_owned(), caps[1].to_owned())
        } else if let Some(caps) = SLUG.captures(&raw) {
            (caps[1].to_owned(), caps[2].to_owned())
        } else {
            anyhow::bail!("unrecognized release label: {raw:?} (expected e.g. 4/25)");
        };

        let mut year: i32 = year.parse()?;
        if year < 100 {
            year += 2000;
        }
        Self::new(year, number.parse()?)
    }

    /// `ppr_4_2025.pdf` and similar names carry the release.
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        Self::parse(stem).ok()
    }

    /// `4/25`, the form the report itself uses.
    pub fn short_label(&self) -> String {
        format!("{}/{:02}", self.number, self.year % 100)
    }

    /// `ppr-42025`, the path segment of the release page.
    pub fn slug(&self) -> String {
        format!("ppr-{}{}", self.number, self.year)
    }

    pub fn file_name(&self) -> String {
        format!("ppr_{}_{}.pdf", self.number, self.year)
    }

    pub fn expected_date(&self) -> Option<NaiveDate> {
        let (month, day) = SCHEDULE[(self.number - 1) as usize];
        NaiveDate::from_ymd_opt(self.year, month, day)
    }

    pub fn page_url(&self, base_url: &str) -> anyhow::Result<Url> {
        let base = base_url.trim_end_matches('/');
        let raw = format!("{base}/{}/{}/", self.year, self.slug());
        Url::parse(&raw).map_err(|err| anyhow::anyhow!("invalid release url {raw}: {err}"))
    }

    pub fn previous(&self) -> Self {
        if self.number == 1 {
            Self {
                year: self.year - 1,
                number: 4,
            }
        } else {
            Self {
                year: self.year,
                number: self.number - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.number == 4 {
            Self {
                year: self.year + 1,
                number: 1,
            }
        } else {
            Self {
                year: self.year,
                number: self.number + 1,
            }
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.short_label())
    }
}

/// The first release expected on or after `today`.
pub fn next_release(today: NaiveDate) -> Release {
    let mut release = latest_expected_release(today);
    while release.expected_date().is_some_and(|d| d < today) {
        release = release.next();
    }
    release
}

/// The most recent release whose expected date is on or before `today`.
///
/// This is the release a scheduled run should be looking for: on the
/// expected day and until the next one is due.
pub fn latest_expected_release(today: NaiveDate) -> Release {
    use chrono::Datelike as _;

    let mut release = Release {
        year: today.year(),
        number: 4,
    };
    while release.expected_date().is_some_and(|d| d > today) {
        release = release.previous();
    }
    release
}

pub fn schedule(args: ScheduleArgs) -> anyhow::Result<()> {
    let today = args
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let config = FetchConfig::from_env().context("read fetch config")?;

    let mut out = std::io::stdout().lock();
    for (name, release) in [
        ("latest", latest_expected_release(today)),
        ("next", next_release(today)),
    ] {
        let expected = release
            .expected_date()
            .map_or_else(|| "-".to_owned(), |d| d.to_string());
        let url = release.page_url(&config.base_url)?;
        writeln!(out, "{name:<7} {release:<5} expected {expected}  {url}").context("write stdout")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_accepts_common_labels() -> anyhow::Result<()> {
        let expected = Release {
            year: 2025,
            number: 4,
        };
        for raw in ["4/25", "4/2025", "2025-4", "ppr-42025", "PPR_4_2025", " 4/25 "] {
            assert_eq!(Release::parse(raw)?, expected, "raw={raw}");
        }
        assert!(Release::parse("5/25").is_err());
        assert!(Release::parse("q4 2025").is_err());
        Ok(())
    }

    #[test]
    fn release_is_read_from_download_file_names() {
        assert_eq!(
            Release::from_file_name(Path::new("downloads/ppr_4_2025.pdf")),
            Some(Release {
                year: 2025,
                number: 4
            })
        );
        assert_eq!(Release::from_file_name(Path::new("report.pdf")), None);
    }

    #[test]
    fn labels_and_urls_follow_publication_pattern() -> anyhow::Result<()> {
        let release = Release::new(2026, 1)?;
        assert_eq!(release.short_label(), "1/26");
        assert_eq!(release.file_name(), "ppr_1_2026.pdf");
        assert_eq!(
            release.page_url("https://bank.example/pub/")?.as_str(),
            "https://bank.example/pub/2026/ppr-12026/"
        );
        Ok(())
    }

    #[test]
    fn latest_expected_release_tracks_the_calendar() {
        assert_eq!(
            latest_expected_release(date(2026, 3, 19)),
            Release {
                year: 2025,
                number: 4
            }
        );
        assert_eq!(
            latest_expected_release(date(2026, 3, 20)),
            Release {
                year: 2026,
                number: 1
            }
        );
        assert_eq!(
            latest_expected_release(date(2026, 10, 19)),
            Release {
                year: 2026,
                number: 3
            }
        );
        assert_eq!(
            latest_expected_release(date(2026, 12, 31)),
            Release {
                year: 2026,
                number: 4
            }
        );
    }

    #[test]
    fn next_release_rolls_over_the_year() {
        assert_eq!(
            next_release(date(2026, 12, 21)),
            Release {
                year: 2027,
                number: 1
            }
        );
        assert_eq!(
            next_release(date(2026, 6, 20)),
            Release {
                year: 2026,
                number: 2
            }
        );
        assert_eq!(
            next_release(date(2026, 1, 5)),
            Release {
                year: 2026,
                number: 1
            }
        );
    }
}
