//! Error types for the edgequake-docx2md library.
//!
//! Two shapes of failure exist:
//!
//! * [`Docx2MdError`]: the operation did not happen (file rejected, engine
//!   failed, clipboard unavailable). Returned as `Err` from session and
//!   pipeline entry points, and mirrored on the status line.
//!
//! * Recoverable warnings: the operation happened but degraded (settings
//!   fell back to defaults, theme could not be persisted). These travel
//!   alongside the value in [`Recoverable`] so callers can surface them
//!   without treating the call as failed.
//!
//! [`Docx2MdError::kind`] maps every variant onto the taxonomy the UI reacts
//! to: whether state was touched, whether a retry is offered, and so on.

use crate::pipeline::intake::format_bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-docx2md library.
#[derive(Debug, Error)]
pub enum Docx2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Name and MIME type do not indicate a Word document.
    #[error("Only .docx files are supported. Please select a valid Word document. (got '{name}')")]
    UnsupportedFileType { name: String },

    /// File is larger than the hard maximum; nothing was read.
    #[error(
        "File size ({}) exceeds the maximum limit ({}).",
        format_bytes(.size),
        format_bytes(.max)
    )]
    FileTooLarge { size: u64, max: u64 },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file into memory failed part-way.
    #[error("Error reading file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// Reconvert/retry was requested but no document buffer is cached.
    #[error("No file data available to reconvert. Please upload again.")]
    NoSourceDocument,

    /// Another operation is still running.
    #[error("Busy: {operation} is still in progress")]
    Busy { operation: String },

    /// Engine failure that may succeed on retry (unexpected error, timeout).
    #[error("Conversion failed: {detail}")]
    ConversionTransient { detail: String },

    /// Engine failure caused by the document itself; the buffer is dropped.
    #[error("Conversion failed: {detail}")]
    ConversionTerminal { detail: String },

    // ── Preview errors ────────────────────────────────────────────────────
    /// The Markdown renderer failed; Markdown output is unaffected.
    #[error("Error rendering Markdown preview: {detail}")]
    RenderFailed { detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// Reading a persisted entry failed.
    #[error("Could not read '{key}' from storage: {detail}")]
    StorageRead { key: String, detail: String },

    /// Writing or removing a persisted entry failed.
    #[error("Could not write '{key}' to storage: {detail}")]
    StorageWrite { key: String, detail: String },

    /// Persisted settings are not valid JSON, or a key holds a bad value.
    #[error("Invalid saved preferences: {0}")]
    InvalidSettings(String),

    // ── Output action errors ──────────────────────────────────────────────
    /// Nothing has been converted yet.
    #[error("Nothing to export: convert a document first")]
    NothingToExport,

    /// Clipboard refused access.
    #[error("Clipboard access denied. Please check your system permissions.")]
    ClipboardDenied,

    /// Both the clipboard and its fallback failed.
    #[error("Failed to copy Markdown ({detail}). Please copy manually.")]
    ClipboardFailed { detail: String },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which class of failure an error belongs to.
///
/// The class decides how the session reacts: whether state is cleared,
/// whether a retry is offered, and which severity the status line uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Wrong type or too large. Nothing mutated, no retry.
    InputRejected,
    /// File-system read error. Output state cleared.
    ReadFailure,
    /// Engine error worth retrying. Buffer kept.
    ConversionTransient,
    /// Document is invalid. Buffer discarded.
    ConversionTerminal,
    /// Preview failed. Markdown still usable.
    RenderFailure,
    /// Settings/theme storage failed. Degrades to in-memory.
    PersistenceFailure,
    /// Copy/download failed. No state change.
    ActionFailure,
    /// An operation is already running.
    Busy,
    /// Bug or invalid configuration.
    Internal,
}

impl Docx2MdError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use Docx2MdError::*;
        match self {
            UnsupportedFileType { .. } | FileTooLarge { .. } | NoSourceDocument => {
                ErrorKind::InputRejected
            }
            FileNotFound { .. } | PermissionDenied { .. } | ReadFailed { .. } => {
                ErrorKind::ReadFailure
            }
            ConversionTransient { .. } => ErrorKind::ConversionTransient,
            ConversionTerminal { .. } => ErrorKind::ConversionTerminal,
            RenderFailed { .. } => ErrorKind::RenderFailure,
            StorageRead { .. } | StorageWrite { .. } | InvalidSettings(_) => {
                ErrorKind::PersistenceFailure
            }
            NothingToExport
            | ClipboardDenied
            | ClipboardFailed { .. }
            | OutputWriteFailed { .. } => ErrorKind::ActionFailure,
            Busy { .. } => ErrorKind::Busy,
            InvalidConfig(_) | Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the UI should offer an inline retry for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Docx2MdError::ConversionTransient { .. })
    }
}

/// A value produced despite recoverable problems.
///
/// Settings and theme operations never fail outright: storage trouble
/// degrades them to defaults or in-memory state. The degradations are
/// collected in `warnings` for the caller to report.
#[derive(Debug)]
pub struct Recoverable<T> {
    pub value: T,
    pub warnings: Vec<Docx2MdError>,
}

impl<T> Recoverable<T> {
    /// A value with no warnings.
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// A value with the given warnings.
    pub fn with_warnings(value: T, warnings: Vec<Docx2MdError>) -> Self {
        Self { value, warnings }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Drop the warnings, keeping the value.
    pub fn into_value(self) -> T {
        self.value
    }
}
