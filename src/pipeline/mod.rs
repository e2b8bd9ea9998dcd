//! Pipeline stages for DOCX-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and the engine or renderer swapped behind its trait.
//!
//! ## Data Flow
//!
//! ```text
//! intake ──▶ engine/docx ──▶ postprocess ──▶ render
//! (path)     (zip + xml)     (settings)      (HTML preview)
//! ```
//!
//! 1. [`intake`]: type and size checks, read the file into a shared buffer
//! 2. [`engine`]: the [`engine::ConversionEngine`] seam, options derived
//!    from settings and failure classification
//! 3. [`docx`]: the built-in engine; runs in `spawn_blocking` because
//!    unzipping and XML parsing are CPU-bound
//! 4. [`postprocess`]: list-marker and line-break rewrites, pure `&str → String`
//! 5. [`render`]: Markdown → HTML with per-block syntax highlighting

pub mod docx;
pub mod engine;
pub mod intake;
pub mod postprocess;
pub mod render;
