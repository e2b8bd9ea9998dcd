//! The conversion-engine seam.
//!
//! An engine turns the bytes of a `.docx` into raw Markdown. The session
//! never looks inside the document itself; it only derives [`EngineOptions`]
//! from the active settings, calls [`ConversionEngine::convert`] on a
//! blocking worker, and classifies any failure as transient or terminal.

use crate::config::{ConversionSettings, ImageHandling, UnderlineHandling};
use crate::error::Docx2MdError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// What the engine does with embedded pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageDirective {
    /// Inline as `data:<mime>;base64,...` URIs.
    EmbedBase64,
    /// Emit nothing for pictures.
    Suppress,
}

/// One document-style → Markdown-element mapping, e.g. `u => em`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleMapping {
    /// Source run property (`u` for underline).
    pub from: String,
    /// Target element (`u`, `em`).
    pub to: String,
}

impl StyleMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for StyleMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.from, self.to)
    }
}

/// Options passed to the engine for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    pub images: ImageDirective,
    /// Emit an empty paragraph for each empty source paragraph.
    pub preserve_empty_paragraphs: bool,
    pub style_map: Vec<StyleMapping>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_settings(&ConversionSettings::default())
    }
}

impl EngineOptions {
    /// Derive engine options from settings. Deterministic.
    ///
    /// | Setting                     | Effect                                      |
    /// |-----------------------------|---------------------------------------------|
    /// | `imageHandling = ignore`    | images suppressed, empty paragraphs kept    |
    /// | `underlineHandling = u`     | style map `u => u`                          |
    /// | `underlineHandling = italic`| style map `u => em`                         |
    pub fn from_settings(settings: &ConversionSettings) -> Self {
        let (images, preserve_empty_paragraphs) = match settings.image_handling {
            ImageHandling::Base64 => (ImageDirective::EmbedBase64, false),
            ImageHandling::Ignore => (ImageDirective::Suppress, true),
        };
        let style_map = match settings.underline_handling {
            UnderlineHandling::Ignore => Vec::new(),
            UnderlineHandling::U => vec![StyleMapping::new("u", "u")],
            UnderlineHandling::Italic => vec![StyleMapping::new("u", "em")],
        };
        Self {
            images,
            preserve_empty_paragraphs,
            style_map,
        }
    }

    /// Target element for a run property, if mapped.
    pub fn mapping_for(&self, from: &str) -> Option<&str> {
        self.style_map
            .iter()
            .find(|m| m.from == from)
            .map(|m| m.to.as_str())
    }
}

/// Successful engine output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub markdown: String,
    /// Non-fatal notes (unreadable image, unknown element, ...).
    pub messages: Vec<String>,
}

/// Engine failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The bytes are not a readable Word document.
    #[error("{0}")]
    Corrupt(String),

    /// A valid container holding something the engine cannot convert.
    #[error("{0}")]
    Unsupported(String),

    /// A fault inside the engine unrelated to the input.
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),

    /// The call did not finish in time.
    #[error("Conversion timeout after {secs}s")]
    Timeout { secs: u64 },

    /// Any other failure; classified by its message.
    #[error("{0}")]
    Other(String),
}

/// Retry semantics of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Keep the buffer and offer a retry.
    Transient,
    /// Drop the buffer; the user has to select the file again.
    Terminal,
}

impl EngineError {
    pub fn class(&self) -> FailureClass {
        match self {
            EngineError::Corrupt(_) | EngineError::Unsupported(_) => FailureClass::Terminal,
            EngineError::Unexpected(_) | EngineError::Timeout { .. } => FailureClass::Transient,
            EngineError::Other(msg) => classify_message(msg),
        }
    }

    /// Text shown after `Conversion failed: `.
    pub fn user_detail(&self) -> String {
        let msg = self.to_string();
        if msg.contains("expected 'word/document.xml'") {
            format!("{msg} - The file might be corrupted or not a valid .docx file.")
        } else {
            msg
        }
    }

    /// Lift into the library error type.
    pub fn into_error(self) -> Docx2MdError {
        let detail = self.user_detail();
        match self.class() {
            FailureClass::Transient => Docx2MdError::ConversionTransient { detail },
            FailureClass::Terminal => Docx2MdError::ConversionTerminal { detail },
        }
    }
}

/// Heuristic for opaque engine messages.
pub fn classify_message(msg: &str) -> FailureClass {
    let lower = msg.to_lowercase();
    if lower.contains("unexpected") || lower.contains("timeout") {
        FailureClass::Transient
    } else {
        FailureClass::Terminal
    }
}

/// A DOCX → Markdown converter.
///
/// Implementations are synchronous and CPU-bound; the orchestrator runs them
/// on a blocking worker. They must be pure with respect to their inputs.
pub trait ConversionEngine: Send + Sync {
    fn convert(&self, bytes: &[u8], options: &EngineOptions) -> Result<EngineOutput, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListMarker;

    #[test]
    fn defaults_embed_images_without_style_map() {
        let o = EngineOptions::default();
        assert_eq!(o.images, ImageDirective::EmbedBase64);
        assert!(!o.preserve_empty_paragraphs);
        assert!(o.style_map.is_empty());
    }

    #[test]
    fn ignore_images_preserves_empty_paragraphs() {
        let s = ConversionSettings {
            image_handling: ImageHandling::Ignore,
            ..Default::default()
        };
        let o = EngineOptions::from_settings(&s);
        assert_eq!(o.images, ImageDirective::Suppress);
        assert!(o.preserve_empty_paragraphs);
    }

    #[test]
    fn underline_maps_to_style_entries() {
        let mut s = ConversionSettings::default();
        s.underline_handling = UnderlineHandling::U;
        let o = EngineOptions::from_settings(&s);
        assert_eq!(o.style_map.len(), 1);
        assert_eq!(o.style_map[0].to_string(), "u => u");

        s.underline_handling = UnderlineHandling::Italic;
        let o = EngineOptions::from_settings(&s);
        assert_eq!(o.style_map[0].to_string(), "u => em");
        assert_eq!(o.mapping_for("u"), Some("em"));
        assert_eq!(o.mapping_for("b"), None);
    }

    #[test]
    fn options_ignore_post_processing_settings() {
        let a = ConversionSettings::default();
        let b = ConversionSettings {
            list_style: ListMarker::Plus,
            disable_preview: true,
            ..Default::default()
        };
        assert_eq!(EngineOptions::from_settings(&a), EngineOptions::from_settings(&b));
    }

    #[test]
    fn classification_by_message() {
        assert_eq!(classify_message("Unexpected end of data"), FailureClass::Transient);
        assert_eq!(classify_message("worker timeout"), FailureClass::Transient);
        assert_eq!(classify_message("Could not find file in options"), FailureClass::Terminal);
        assert_eq!(EngineError::Other("boom".into()).class(), FailureClass::Terminal);
        assert_eq!(EngineError::Timeout { secs: 5 }.class(), FailureClass::Transient);
    }

    #[test]
    fn missing_main_part_gets_hint() {
        let e = EngineError::Corrupt(
            "Could not find main document part. Paths tried: expected 'word/document.xml'".into(),
        );
        let err = e.into_error();
        assert!(matches!(err, Docx2MdError::ConversionTerminal { .. }));
        let msg = err.to_string();
        assert!(msg.starts_with("Conversion failed: "));
        assert!(msg.ends_with("The file might be corrupted or not a valid .docx file."));
    }

    #[test]
    fn timeout_lifts_to_transient() {
        let err = EngineError::Timeout { secs: 60 }.into_error();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Conversion failed: Conversion timeout after 60s");
    }
}
