//! # edgequake-docx2md
//!
//! Convert Word (`.docx`) documents to Markdown, with a live HTML preview,
//! user-adjustable formatting and preferences that persist between runs.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .docx
//!  │
//!  ├─ 1. Intake       type + size checks, read into memory (tokio::fs)
//!  ├─ 2. Engine       unzip + walk word/document.xml (CPU-bound, spawn_blocking)
//!  ├─ 3. Post-process list markers and line breaks per settings
//!  ├─ 4. Preview      pulldown-cmark + syntect, skipped when disabled
//!  └─ 5. Output       copy to clipboard, save as <name>.md
//! ```
//!
//! Two ways in:
//!
//! - [`convert_file`] / [`convert_bytes`] run the pipeline once.
//! - [`Session`] keeps one document in memory and reacts to events (open,
//!   reconvert, retry, settings, copy, download, theme) the way an
//!   interactive front end needs. The `docx2md --interactive` prompt is
//!   such a front end.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docx2md::{convert_file, ConversionSettings, ListMarker, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConversionSettings {
//!         list_style: ListMarker::Asterisk,
//!         ..Default::default()
//!     };
//!     let result = convert_file("report.docx", &settings, &SessionConfig::default()).await?;
//!     println!("{}", result.markdown);
//!     for note in &result.messages {
//!         eprintln!("note: {note}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Settings
//!
//! | Key | Values | Default | Applied by |
//! |-----|--------|---------|------------|
//! | `imageHandling` | `base64`, `ignore` | `base64` | engine |
//! | `listStyle` | `-`, `*`, `+` | `-` | post-processing |
//! | `lineBreak` | `space`, `br` | `space` | post-processing |
//! | `underlineHandling` | `ignore`, `u`, `italic` | `ignore` | engine |
//! | `disablePreview` | `true`, `false` | `false` | preview |
//!
//! Engine-level settings only take effect after a reconvert; the others are
//! re-applied to the current output straight away.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docx2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docx2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod actions;
pub mod config;
pub mod convert;
pub mod error;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod store;
pub mod theme;
pub mod ui;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use actions::{Clipboard, ClipboardError, CopyOutcome, DownloadReceipt, FileSaver, Osc52Clipboard, SystemClipboard};
pub use config::{
    ConversionSettings, ImageHandling, LineBreak, ListMarker, SessionConfig, SessionConfigBuilder,
    SizeLimits, StorageLocation, UnderlineHandling,
};
pub use convert::{convert_bytes, convert_file, convert_sync, convert_to_file};
pub use error::{Docx2MdError, ErrorKind, Recoverable};
pub use observer::{Confirmation, NoopObserver, SessionObserver};
pub use output::{ConversionResult, ConversionStats};
pub use pipeline::docx::DocxEngine;
pub use pipeline::engine::{ConversionEngine, EngineError, EngineOptions, EngineOutput};
pub use pipeline::render::{CmarkRenderer, MarkdownRenderer, PreviewState, SyntectHighlighter};
pub use session::{Session, SessionBuilder, SessionSnapshot};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use theme::{ColorSchemeProbe, FixedColorScheme, SystemColorScheme, Theme};
pub use ui::{ControlState, Operation, Severity, StatusMessage};
