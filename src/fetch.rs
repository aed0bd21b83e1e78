use std::io::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use url::Url;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::release::Release;

#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub release: Release,
    /// The PDF's URL, or the cached file's path.
    pub origin: String,
    pub bytes: Vec<u8>,
}

/// Downloads the report for `release`: the release page first, then the
/// PDF it links to.
///
/// A release page that does not exist yet (404/410) or carries no PDF link
/// is [`FetchError::Unavailable`] and is never retried.
pub async fn fetch_release(
    release: &Release,
    config: &FetchConfig,
    download_dir: Option<&Path>,
) -> Result<FetchedSource, FetchError> {
    let cache_path = download_dir.map(|dir| dir.join(release.file_name()));
    if let Some(path) = cache_path.as_deref()
        && path.is_file()
    {
        tracing::info!(%release, path = %path.display(), "using downloaded report");
        return Ok(FetchedSource {
            release: *release,
            origin: path.display().to_string(),
            bytes: std::fs::read(path)?,
        });
    }

    let page_url = release
        .page_url(&config.base_url)
        .map_err(|err| FetchError::Url {
            url: config.base_url.clone(),
            reason: err.to_string(),
        })?;

    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(FetchError::Client)?;

    tracing::info!(%release, url = %page_url, "fetching release page");
    let Some(page) = get_with_retry(&client, &page_url, config, "text/html,*/*;q=0.8").await?
    else {
        return Err(unavailable(release, format!("{page_url} not found")));
    };
    let html = String::from_utf8_lossy(&page);

    let Some(pdf_url) = find_pdf_link(&page_url, &html)? else {
        return Err(unavailable(release, format!("no pdf link on {page_url}")));
    };

    tracing::info!(%release, url = %pdf_url, "downloading report");
    let Some(bytes) = get_with_retry(&client, &pdf_url, config, "application/pdf,*/*;q=0.8").await?
    else {
        return Err(unavailable(release, format!("{pdf_url} not found")));
    };
    tracing::info!(%release, bytes = bytes.len(), "downloaded report");

    if let Some(path) = cache_path {
        store_download(&path, &bytes)?;
    }

    Ok(FetchedSource {
        release: *release,
        origin: pdf_url.to_string(),
        bytes,
    })
}

fn unavailable(release: &Release, reason: String) -> FetchError {
    FetchError::Unavailable {
        release: release.to_string(),
        reason,
    }
}

/// GET with bounded retries. Returns `None` for 404/410.
async fn get_with_retry(
    client: &reqwest::Client,
    url: &Url,
    config: &FetchConfig,
    accept: &str,
) -> Result<Option<Vec<u8>>, FetchError> {
    let attempts = config.retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = config.backoff(attempt - 1);
            tracing::warn!(
                %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "transient fetch failure; retrying"
            );
            tokio::time::sleep(delay).await;
        }

        let response = match client
            .get(url.clone())
            .header(USER_AGENT, config.user_agent.as_str())
            .header(ACCEPT, accept)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                last_error = err.to_string();
                continue;
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            tracing::debug!(%url, %status, "not published");
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            last_error = format!("HTTP {status}");
            continue;
        }
        if !status.is_success() {
            return Err(FetchError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        match response.bytes().await {
            Ok(body) => return Ok(Some(body.to_vec())),
            Err(err) => last_error = format!("read body: {err}"),
        }
    }

    Err(FetchError::Exhausted {
        url: url.to_string(),
        attempts,
        last_error,
    })
}

/// The first link to a `.pdf` on the page, resolved against the page URL.
pub fn find_pdf_link(page_url: &Url, html: &str) -> Result<Option<Url>, FetchError> {
    static PDF_HREF: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)<a\b[^>]*?\bhref\s*=\s*["']([^"']+?\.pdf(?:[?#][^"']*)?)["']"#).unwrap()
    });

    let Some(caps) = PDF_HREF.captures(html) else {
        return Ok(None);
    };
    let href = caps[1].replace("&amp;", "&");
    page_url
        .join(href.trim())
        .map(Some)
        .map_err(|err| FetchError::Url {
            url: href,
            reason: err.to_string(),
        })
}

/// Saves a download under its final name only once it is complete, since a
/// file at that path is reused by later runs without further checks.
fn store_download(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".ppr-download-")
        .suffix(".part")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "saved report");
    Ok(())
}
