//! File naming helpers for downloaded images

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Directory name used when a paper has no usable title
pub const DEFAULT_DIRECTORY_NAME: &str = "images";

/// Get the path to write to, handling an existing file according to `action`
///
/// # Returns
///
/// `Overwrite` returns `path` unchanged. `Skip` returns
/// [`Error::FileCollision`] if the file exists. `Rename` appends ` (1)`,
/// ` (2)`, ... to the file stem until the name is free.
///
/// # Examples
///
/// ```
/// use answersheet_dl::utils::get_unique_path;
/// use answersheet_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/page-1.jpg");
/// let target = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If /tmp/page-1.jpg exists, returns /tmp/page-1 (1).jpg
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    unique_path_with(path, action, |candidate| candidate.exists())
}

/// [`get_unique_path`] with a caller-supplied notion of "taken"
///
/// Lets a caller reserve names that do not exist on disk yet.
pub(crate) fn unique_path_with(
    path: &Path,
    action: FileCollisionAction,
    is_taken: impl Fn(&Path) -> bool,
) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if is_taken(path) {
                return Err(Error::FileCollision {
                    path: path.to_path_buf(),
                    reason: "file already exists and collision action is skip".to_string(),
                });
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !is_taken(path) {
                return Ok(path.to_path_buf());
            }

            let invalid = |reason: &str| Error::FileCollision {
                path: path.to_path_buf(),
                reason: reason.to_string(),
            };
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| invalid("cannot extract file stem"))?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path
                .parent()
                .ok_or_else(|| invalid("cannot extract parent directory"))?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{stem} ({i}).{ext}"),
                    None => format!("{stem} ({i})"),
                };
                let new_path = parent.join(new_name);
                if !is_taken(&new_path) {
                    return Ok(new_path);
                }
            }

            Err(invalid(&format!(
                "could not find unique filename after {MAX_RENAME_ATTEMPTS} attempts"
            )))
        }
    }
}

/// File name for an image URL: its last non-empty path segment
///
/// Query string and fragment are ignored.
///
/// # Examples
///
/// ```
/// use answersheet_dl::utils::filename_from_url;
///
/// assert_eq!(filename_from_url("https://cdn.example/scan/p1.jpg?sig=abc").unwrap(), "p1.jpg");
/// assert!(filename_from_url("https://cdn.example/").is_err());
/// ```
pub fn filename_from_url(url: &str) -> Result<String> {
    let parsed =
        url::Url::parse(url).map_err(|e| Error::Other(format!("invalid image URL {url}: {e}")))?;

    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|segment| *segment != "." && *segment != "..")
        .map(str::to_string)
        .ok_or_else(|| Error::Other(format!("cannot derive a file name from {url}")))
}

/// Directory name for a paper title, safe to use as a single path component
///
/// Path separators and characters rejected by common filesystems become `_`.
/// Empty titles map to [`DEFAULT_DIRECTORY_NAME`].
#[must_use]
pub fn directory_name(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => DEFAULT_DIRECTORY_NAME.to_string(),
        _ => cleaned,
    }
}
