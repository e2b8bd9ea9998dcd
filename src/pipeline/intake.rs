//! File intake: accept or reject a candidate file, then read it into memory.
//!
//! Validation happens on metadata only (name, declared MIME type, size) so a
//! rejected file is never read. Accepted files are loaded whole into a
//! shared, immutable buffer that the session keeps for re-conversion.

use crate::config::SizeLimits;
use crate::error::Docx2MdError;
use std::borrow::Borrow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// MIME type of a Word Open XML document.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// What the user offered us, before anything was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// File name as shown to the user (no directory part).
    pub name: String,
    /// Declared MIME type, when the source knows one.
    pub mime: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Where to read the bytes from.
    pub path: PathBuf,
}

impl FileCandidate {
    /// Build a candidate from a path using file-system metadata.
    ///
    /// The MIME type is inferred from a `.docx` extension; any other file gets
    /// `None` and is judged by name alone.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, Docx2MdError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| map_io_error(path, e))?;
        if !meta.is_file() {
            return Err(Docx2MdError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = has_docx_extension(&name).then(|| DOCX_MIME.to_string());
        Ok(Self {
            name,
            mime,
            size: meta.len(),
            path: path.to_path_buf(),
        })
    }

    /// A `.docx` name (case-insensitive) or the Word MIME type.
    pub fn is_supported(&self) -> bool {
        has_docx_extension(&self.name) || self.mime.as_deref() == Some(DOCX_MIME)
    }
}

fn has_docx_extension(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".docx")
}

/// Outcome of checking a size against [`SizeLimits`].
///
/// Thresholds are exclusive: a file of exactly `max` bytes is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeVerdict {
    /// At or below the note threshold.
    Ok,
    /// Above `note`: informational message only.
    Note,
    /// Above `warning`: warn and offer to skip the preview.
    Warning,
    /// Above `max`: rejected.
    TooLarge,
}

impl SizeVerdict {
    pub fn classify(size: u64, limits: &SizeLimits) -> Self {
        if size > limits.max {
            SizeVerdict::TooLarge
        } else if size > limits.warning {
            SizeVerdict::Warning
        } else if size > limits.note {
            SizeVerdict::Note
        } else {
            SizeVerdict::Ok
        }
    }
}

/// Validate a candidate without reading it.
///
/// Type is checked first; a wrong-type file is rejected whatever its size.
pub fn validate(candidate: &FileCandidate, limits: &SizeLimits) -> Result<SizeVerdict, Docx2MdError> {
    if !candidate.is_supported() {
        return Err(Docx2MdError::UnsupportedFileType {
            name: candidate.name.clone(),
        });
    }
    let verdict = SizeVerdict::classify(candidate.size, limits);
    if verdict == SizeVerdict::TooLarge {
        return Err(Docx2MdError::FileTooLarge {
            size: candidate.size,
            max: limits.max,
        });
    }
    debug!(
        "Accepted '{}' ({}) as {:?}",
        candidate.name,
        format_bytes(candidate.size),
        verdict
    );
    Ok(verdict)
}

/// An accepted document held in memory.
///
/// Cloning is cheap; the bytes are shared and never mutated.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub bytes: Arc<[u8]>,
    /// Original file name, e.g. `report.docx`.
    pub file_name: String,
    /// File name without its last extension, e.g. `report`.
    pub display_name: String,
    pub size: u64,
}

impl SourceDocument {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let file_name = file_name.into();
        let bytes = bytes.into();
        Self {
            display_name: strip_extension(&file_name).to_string(),
            size: bytes.len() as u64,
            bytes,
            file_name,
        }
    }
}

/// Read an accepted candidate into memory.
pub async fn read_source(candidate: &FileCandidate) -> Result<SourceDocument, Docx2MdError> {
    let bytes = tokio::fs::read(&candidate.path)
        .await
        .map_err(|e| map_io_error(&candidate.path, e))?;
    info!(
        "Read '{}' into memory ({})",
        candidate.name,
        format_bytes(bytes.len() as u64)
    );
    Ok(SourceDocument::from_bytes(candidate.name.clone(), bytes))
}

fn map_io_error(path: &Path, e: std::io::Error) -> Docx2MdError {
    let path = path.to_path_buf();
    match e.kind() {
        std::io::ErrorKind::NotFound => Docx2MdError::FileNotFound { path },
        std::io::ErrorKind::PermissionDenied => Docx2MdError::PermissionDenied { path },
        _ => Docx2MdError::ReadFailed { path, source: e },
    }
}

/// Remove the last `.ext` from a file name.
///
/// `"a.b.docx"` → `"a.b"`, `".docx"` → `""`, `"README"` → `"README"`.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Human-readable byte count using 1024 steps and up to two decimals.
///
/// ```rust
/// use edgequake_docx2md::pipeline::intake::format_bytes;
///
/// assert_eq!(format_bytes(0u64), "0 Bytes");
/// assert_eq!(format_bytes(1536u64), "1.5 KB");
/// assert_eq!(format_bytes(50u64 * 1024 * 1024), "50 MB");
/// ```
pub fn format_bytes(bytes: impl Borrow<u64>) -> String {
    const UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let bytes = *bytes.borrow();
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut exp = 0;
    while exp + 1 < UNITS.len() && u128::from(bytes) >= 1024u128.pow(exp as u32 + 1) {
        exp += 1;
    }
    let value = bytes as f64 / 1024f64.powi(exp as i32);
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[exp])
}
