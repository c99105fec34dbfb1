//! Query intake: upload checks and scoped staging of the query image.

use crate::error::PipelineError;
use crate::gallery::is_image_name;
use crate::types::{ImageHandle, ImageSource};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tempfile::NamedTempFile;

/// Default ceiling for uploaded query images (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// How the query image is handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum QueryMode {
    /// Write the bytes to a temporary file that lives for one ranking run.
    #[default]
    TempFile,
    /// Share the in-memory buffer directly.
    InMemory,
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tempfile" | "file" => Ok(QueryMode::TempFile),
            "memory" | "inmemory" => Ok(QueryMode::InMemory),
            other => Err(format!("unknown query mode {other:?} (expected tempfile or memory)")),
        }
    }
}

impl TryFrom<String> for QueryMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Reduce an advisory upload name to a safe bare file name.
///
/// Drops any directory part, turns whitespace into `_` and removes every
/// character outside `[A-Za-z0-9._-]`. Leading dots are stripped so the
/// result is never hidden or a relative path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Reject uploads the pipeline should never see.
pub fn check_upload(bytes: &[u8], filename: &str, max_bytes: usize) -> Result<(), PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidQuery("upload is empty".into()));
    }
    if bytes.len() > max_bytes {
        return Err(PipelineError::InvalidQuery(format!(
            "upload of {} bytes exceeds the {max_bytes} byte limit",
            bytes.len()
        )));
    }
    if !is_image_name(filename) {
        return Err(PipelineError::InvalidQuery(
            "only png, jpg and jpeg images are accepted".into(),
        ));
    }
    Ok(())
}

/// The query image, staged for the engine for the duration of one run.
///
/// In [`QueryMode::TempFile`] the backing file is created by [`stage`](Self::stage)
/// and removed exactly once: by [`close`](Self::close), or on drop when the
/// run ends early through an error or a panic.
pub struct StagedQuery {
    handle: ImageHandle,
    file: Option<NamedTempFile>,
}

impl StagedQuery {
    pub fn stage(
        bytes: &[u8],
        filename: &str,
        mode: QueryMode,
        staging_dir: Option<&Path>,
    ) -> Result<Self, PipelineError> {
        let name = sanitize_filename(filename);

        if mode == QueryMode::InMemory {
            return Ok(Self {
                handle: ImageHandle::from_bytes(name, bytes.to_vec()),
                file: None,
            });
        }

        let suffix = match name.rsplit_once('.') {
            Some((_, ext)) => format!(".{ext}"),
            None => String::new(),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix("facerank-query-").suffix(&suffix);
        let mut file = match staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(PipelineError::Staging)?;

        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(PipelineError::Staging)?;

        tracing::debug!(path = %file.path().display(), bytes = bytes.len(), "query staged");
        let handle = ImageHandle {
            id: name,
            source: ImageSource::Path(file.path().to_path_buf()),
        };
        Ok(Self {
            handle,
            file: Some(file),
        })
    }

    pub fn handle(&self) -> &ImageHandle {
        &self.handle
    }

    /// Remove the staged file now, reporting failure to do so.
    pub fn close(mut self) -> Result<(), PipelineError> {
        match self.file.take() {
            Some(file) => {
                let path = file.path().to_path_buf();
                file.close().map_err(PipelineError::Staging)?;
                tracing::debug!(path = %path.display(), "query released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for StagedQuery {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(err) = file.close() {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to remove staged query"
                );
            } else {
                tracing::debug!(path = %path.display(), "query released on early exit");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\my photo.JPG"), "my_photo.JPG");
        assert_eq!(sanitize_filename(".hidden.png"), "hidden.png");
        assert_eq!(sanitize_filename("ümlaut€.png"), "mlaut.png");
        assert_eq!(sanitize_filename("///"), "upload");
    }

    #[test]
    fn test_check_upload() {
        assert!(check_upload(b"x", "a.png", 10).is_ok());
        assert!(matches!(
            check_upload(b"", "a.png", 10),
            Err(PipelineError::InvalidQuery(_))
        ));
        assert!(check_upload(&[0u8; 11], "a.png", 10).is_err());
        assert!(check_upload(b"x", "a.gif", 10).is_err());
    }

    #[test]
    fn test_query_mode_parse() {
        assert_eq!("memory".parse::<QueryMode>().unwrap(), QueryMode::InMemory);
        assert_eq!("TempFile".parse::<QueryMode>().unwrap(), QueryMode::TempFile);
        assert!("disk".parse::<QueryMode>().is_err());
    }

    #[test]
    fn test_stage_and_close_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let staged =
            StagedQuery::stage(b"jpegdata", "me.jpg", QueryMode::TempFile, Some(dir.path()))
                .unwrap();
        let path = staged.handle().path().unwrap().to_path_buf();

        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"jpegdata");
        assert!(path.to_string_lossy().ends_with(".jpg"));
        assert_eq!(staged.handle().id, "me.jpg");

        staged.close().unwrap();
        assert!(!path.exists());
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let staged =
                StagedQuery::stage(b"png", "q.png", QueryMode::TempFile, Some(dir.path())).unwrap();
            staged.handle().path().unwrap().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[test]
    fn test_removed_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().to_path_buf();
        let outcome = std::panic::catch_unwind(move || {
            let _staged =
                StagedQuery::stage(b"png", "q.png", QueryMode::TempFile, Some(&staging)).unwrap();
            panic!("comparison blew up");
        });
        assert!(outcome.is_err());
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[test]
    fn test_in_memory_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let staged =
            StagedQuery::stage(b"png", "q.png", QueryMode::InMemory, Some(dir.path())).unwrap();
        assert!(staged.handle().path().is_none());
        assert_eq!(&*staged.handle().read_bytes().unwrap(), b"png");
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[test]
    fn test_missing_staging_dir_is_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let err = StagedQuery::stage(b"png", "q.png", QueryMode::TempFile, Some(&missing))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Staging(_)));
    }
}
