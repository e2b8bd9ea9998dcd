//! Output types: the result of converting one document.

use crate::config::ConversionSettings;
use crate::pipeline::render::PreviewState;
use serde::Serialize;

/// Everything produced for the current document.
///
/// `markdown` and `preview` are always derivable from `raw_markdown` and the
/// active settings; the session re-derives them when settings change.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// Source file name, e.g. `report.docx`.
    pub file_name: String,

    /// Engine output before post-processing.
    pub raw_markdown: String,

    /// Post-processed Markdown: what copy and download export.
    pub markdown: String,

    pub preview: PreviewState,

    /// Non-fatal engine notes (skipped images, embedded objects, ...).
    pub messages: Vec<String>,

    /// Settings the Markdown was derived with.
    pub settings: ConversionSettings,

    pub stats: ConversionStats,
}

impl ConversionResult {
    /// True when there is something to copy or download.
    pub fn has_markdown(&self) -> bool {
        !self.markdown.is_empty()
    }
}

/// Timing and size figures for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    pub input_bytes: u64,
    pub markdown_bytes: usize,
    /// Wall time of the engine call.
    pub engine_duration_ms: u64,
    /// Wall time of the preview render; 0 when skipped.
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}
