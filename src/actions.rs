//! Output actions: copy the Markdown to a clipboard, save it as a `.md` file.

use crate::error::Docx2MdError;
use base64::Engine as _;
use serde::Serialize;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

/// MIME type of downloaded Markdown.
pub const MARKDOWN_MIME: &str = "text/markdown;charset=utf-8";

/// Name used when the source has no usable stem.
pub const FALLBACK_FILE_NAME: &str = "converted.md";

// ── Clipboard ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClipboardError {
    /// The platform refused access. Not worth trying a fallback.
    #[error("clipboard access denied: {0}")]
    Denied(String),
    #[error("{0}")]
    Failed(String),
}

pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// The desktop clipboard via arboard.
///
/// `arboard::Clipboard` is opened per call; it is not `Send` on every
/// platform, so it is never stored.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard = arboard::Clipboard::new().map_err(classify_arboard)?;
        clipboard.set_text(text).map_err(classify_arboard)
    }
}

fn classify_arboard(e: arboard::Error) -> ClipboardError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("not allowed") {
        ClipboardError::Denied(msg)
    } else {
        ClipboardError::Failed(msg)
    }
}

/// Terminal clipboard through the OSC 52 escape sequence.
///
/// Works over SSH and in most modern terminal emulators. With
/// `require_tty` set, refuses to write to anything but a terminal.
pub struct Osc52Clipboard<W: Write + Send> {
    out: Mutex<W>,
    require_tty: bool,
}

impl Osc52Clipboard<std::io::Stderr> {
    /// Write the sequence to stderr, which stays a terminal even when
    /// stdout is piped.
    pub fn stderr() -> Self {
        Self {
            out: Mutex::new(std::io::stderr()),
            require_tty: true,
        }
    }
}

impl<W: Write + Send> Osc52Clipboard<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            require_tty: false,
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> Clipboard for Osc52Clipboard<W> {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        if self.require_tty && !std::io::stderr().is_terminal() {
            return Err(ClipboardError::Failed("stderr is not a terminal".into()));
        }
        let payload = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        let mut out = self
            .out
            .lock()
            .map_err(|_| ClipboardError::Failed("terminal writer poisoned".into()))?;
        write!(out, "\x1b]52;c;{payload}\x07")
            .and_then(|_| out.flush())
            .map_err(|e| ClipboardError::Failed(e.to_string()))
    }
}

/// Which clipboard ended up holding the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Primary,
    Fallback,
}

/// Copy `text`, falling back when the primary clipboard fails.
///
/// A denial from the primary is reported as is; the fallback is only tried
/// for other failures.
pub fn copy_with_fallback(
    primary: &dyn Clipboard,
    fallback: Option<&dyn Clipboard>,
    text: &str,
) -> Result<CopyOutcome, Docx2MdError> {
    if text.is_empty() {
        return Err(Docx2MdError::NothingToExport);
    }
    let primary_err = match primary.set_text(text) {
        Ok(()) => {
            info!("Copied {} bytes of Markdown to the clipboard", text.len());
            return Ok(CopyOutcome::Primary);
        }
        Err(ClipboardError::Denied(detail)) => {
            warn!("Clipboard access denied: {}", detail);
            return Err(Docx2MdError::ClipboardDenied);
        }
        Err(ClipboardError::Failed(detail)) => detail,
    };
    warn!("Clipboard copy failed: {}. Trying fallback", primary_err);

    let Some(fallback) = fallback else {
        return Err(Docx2MdError::ClipboardFailed {
            detail: primary_err,
        });
    };
    match fallback.set_text(text) {
        Ok(()) => {
            info!("Copied {} bytes of Markdown using fallback", text.len());
            Ok(CopyOutcome::Fallback)
        }
        Err(e) => Err(Docx2MdError::ClipboardFailed {
            detail: format!("{primary_err}; fallback: {e}"),
        }),
    }
}

// ── Download ─────────────────────────────────────────────────────────────

/// A platform "save as" helper. When absent, files are written directly.
pub trait FileSaver: Send + Sync {
    /// Save `contents`; return where it ended up.
    fn save(&self, suggested_name: &str, mime: &str, contents: &[u8]) -> Result<PathBuf, String>;
}

/// Where a download was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReceipt {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: usize,
}

/// `<stem>.md`, or [`FALLBACK_FILE_NAME`] for an empty stem.
pub fn download_file_name(stem: &str) -> String {
    if stem.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        format!("{stem}.md")
    }
}

/// Save the Markdown as `<stem>.md` in `dir`.
pub fn download(
    markdown: &str,
    stem: &str,
    dir: &Path,
    saver: Option<&dyn FileSaver>,
) -> Result<DownloadReceipt, Docx2MdError> {
    if markdown.is_empty() {
        return Err(Docx2MdError::NothingToExport);
    }
    let file_name = download_file_name(stem);
    let path = match saver {
        Some(saver) => saver
            .save(&file_name, MARKDOWN_MIME, markdown.as_bytes())
            .map_err(|e| Docx2MdError::OutputWriteFailed {
                path: dir.join(&file_name),
                source: std::io::Error::other(e),
            })?,
        None => {
            let path = dir.join(&file_name);
            write_atomic(&path, markdown.as_bytes())?;
            path
        }
    };
    info!("Markdown download written to {}", path.display());
    Ok(DownloadReceipt {
        path,
        file_name,
        mime: MARKDOWN_MIME,
        bytes: markdown.len(),
    })
}

/// Write through a temp file in the target directory, then rename.
///
/// The temp file is removed if anything fails before the rename, so a
/// partial file never appears under `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Docx2MdError> {
    let write_err = |source: std::io::Error| Docx2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClipboard {
        result: Result<(), ClipboardError>,
        calls: AtomicUsize,
    }

    impl FakeClipboard {
        fn new(result: Result<(), ClipboardError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Clipboard for FakeClipboard {
        fn set_text(&self, _text: &str) -> Result<(), ClipboardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn empty_text_never_touches_clipboard() {
        let primary = FakeClipboard::new(Ok(()));
        let err = copy_with_fallback(&primary, None, "").unwrap_err();
        assert!(matches!(err, Docx2MdError::NothingToExport));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn denial_skips_fallback() {
        let primary = FakeClipboard::new(Err(ClipboardError::Denied("nope".into())));
        let fallback = FakeClipboard::new(Ok(()));
        let err = copy_with_fallback(&primary, Some(&fallback), "x").unwrap_err();
        assert!(matches!(err, Docx2MdError::ClipboardDenied));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_uses_fallback() {
        let primary = FakeClipboard::new(Err(ClipboardError::Failed("no display".into())));
        let fallback = FakeClipboard::new(Ok(()));
        let outcome = copy_with_fallback(&primary, Some(&fallback), "x").unwrap();
        assert_eq!(outcome, CopyOutcome::Fallback);
    }

    #[test]
    fn both_failing_is_actionable() {
        let primary = FakeClipboard::new(Err(ClipboardError::Failed("no display".into())));
        let fallback = FakeClipboard::new(Err(ClipboardError::Failed("no tty".into())));
        let err = copy_with_fallback(&primary, Some(&fallback), "x").unwrap_err();
        assert!(err.to_string().contains("Please copy manually"));
    }

    #[test]
    fn osc52_writes_base64_payload() {
        let clip = Osc52Clipboard::new(Vec::new());
        clip.set_text("hi").unwrap();
        assert_eq!(clip.into_inner(), b"\x1b]52;c;aGk=\x07");
    }

    #[test]
    fn file_names() {
        assert_eq!(download_file_name("report"), "report.md");
        assert_eq!(download_file_name("a.b"), "a.b.md");
        assert_eq!(download_file_name(""), "converted.md");
    }

    #[test]
    fn download_writes_exact_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = download("# Hi\n", "report", dir.path(), None).unwrap();
        assert_eq!(receipt.file_name, "report.md");
        assert_eq!(receipt.mime, MARKDOWN_MIME);
        assert_eq!(std::fs::read_to_string(&receipt.path).unwrap(), "# Hi\n");
        // Only the final file remains.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn download_of_nothing_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = download("", "report", dir.path(), None).unwrap_err();
        assert!(matches!(err, Docx2MdError::NothingToExport));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // Target is an existing directory: rename must fail.
        std::fs::create_dir(dir.path().join("report.md")).unwrap();
        let err = download("x", "report", dir.path(), None).unwrap_err();
        assert!(matches!(err, Docx2MdError::OutputWriteFailed { .. }));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("report.md")]);
    }

    struct RecordingSaver(Mutex<Vec<(String, String)>>);

    impl FileSaver for RecordingSaver {
        fn save(&self, name: &str, mime: &str, _: &[u8]) -> Result<PathBuf, String> {
            self.0.lock().unwrap().push((name.into(), mime.into()));
            Ok(PathBuf::from("/saved").join(name))
        }
    }

    #[test]
    fn saver_is_preferred_when_configured() {
        let saver = RecordingSaver(Mutex::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let receipt = download("x", "", dir.path(), Some(&saver)).unwrap();
        assert_eq!(receipt.path, PathBuf::from("/saved/converted.md"));
        assert_eq!(
            saver.0.lock().unwrap().as_slice(),
            &[("converted.md".to_string(), MARKDOWN_MIME.to_string())]
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
