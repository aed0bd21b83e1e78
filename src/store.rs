use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::error::PublishError;

/// Reads the published page. It must already exist: the page around the
/// regions is maintained by hand.
pub fn read_document(path: &Path) -> anyhow::Result<String> {
    if !path.is_file() {
        anyhow::bail!("published document does not exist: {}", path.display());
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("read published document: {}", path.display()))
}

/// Copies the current content to `<backup_dir>/<stem>_backup_<timestamp>.html`.
pub fn backup_document(
    path: &Path,
    current: &str,
    backup_dir: &Path,
    now: chrono::DateTime<chrono::Local>,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(backup_dir)
        .with_context(|| format!("create backup dir: {}", backup_dir.display()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let backup_path = backup_dir.join(format!(
        "{stem}_backup_{}.html",
        now.format("%Y%m%d_%H%M%S")
    ));
    if backup_path.exists() {
        anyhow::bail!("backup already exists: {}", backup_path.display());
    }
    std::fs::write(&backup_path, current)
        .with_context(|| format!("write backup: {}", backup_path.display()))?;

    tracing::info!(path = %backup_path.display(), "backed up published document");
    Ok(backup_path)
}

/// Replaces `path` atomically: the content goes to a temporary file in the
/// same directory which is then renamed over the target. On failure the old
/// file is untouched.
pub fn write_document(path: &Path, content: &str) -> Result<(), PublishError> {
    let write_error = |source: std::io::Error| PublishError::OutputWrite {
        path: path.display().to_string(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".ppr-refresh-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_error)?;

    tmp.write_all(content.as_bytes()).map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;

    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_error)?;
    }

    tmp.persist(path).map_err(|err| write_error(err.error))?;
    tracing::info!(path = %path.display(), bytes = content.len(), "wrote published document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_replaces_content_and_leaves_no_temp_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.html");
        std::fs::write(&path, "old")?;

        write_document(&path, "new")?;

        assert_eq!(std::fs::read_to_string(&path)?, "new");
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_old_file_intact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing-dir").join("index.html");

        let err = write_document(&path, "new").unwrap_err();
        assert!(matches!(err, PublishError::OutputWrite { .. }));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn backup_uses_stem_and_timestamp() -> anyhow::Result<()> {
        use chrono::TimeZone as _;

        let dir = tempfile::tempdir()?;
        let now = chrono::Local
            .with_ymd_and_hms(2025, 12, 18, 9, 5, 7)
            .single()
            .ok_or_else(|| anyhow::anyhow!("ambiguous local time"))?;
        let backup = backup_document(
            Path::new("site/dashboard.html"),
            "<p>old</p>",
            &dir.path().join("backups"),
            now,
        )?;

        assert_eq!(
            backup.file_name().and_then(|n| n.to_str()),
            Some("dashboard_backup_20251218_090507.html")
        );
        assert_eq!(std::fs::read_to_string(backup)?, "<p>old</p>");
        Ok(())
    }

    #[test]
    fn read_requires_existing_document() {
        assert!(read_document(Path::new("/nonexistent/ppr/index.html")).is_err());
    }
}
