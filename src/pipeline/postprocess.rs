//! Post-processing: settings-driven rewrites of engine Markdown.
//!
//! The engine always emits `-` bullets and literal `<br>` tags for hard
//! breaks. Two rules adapt that output to the user's preferences:
//!
//! 1. **List marker**: when `listStyle` is not `-`, every line-initial `-`
//!    bullet becomes the configured marker. Indentation is kept and fenced
//!    code blocks are skipped. Lines that look like bullets inside other
//!    constructs (HTML blocks, indented code) are rewritten too; the anchor
//!    is the line start, nothing more.
//! 2. **Line breaks**: in `space` mode every `<br>`, `<br/>` and `<br />`
//!    (any case) becomes two spaces and a newline, the Markdown hard break.
//!    In `br` mode the tags are left as they are.
//!
//! Both rules are pure `&str → String` functions applied in that order.
//! Post-processing only ever touches engine output; it is re-run from the
//! raw Markdown whenever settings change, so it never sees its own output.

use crate::config::{ConversionSettings, LineBreak, ListMarker};
use crate::error::Docx2MdError;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Apply all post-processing rules. Total: never fails.
///
/// On an internal error the input is returned unchanged and the error is
/// logged; use [`try_post_process`] to observe it.
pub fn post_process(raw: &str, settings: &ConversionSettings) -> String {
    match try_post_process(raw, settings) {
        Ok(s) => s,
        Err(e) => {
            warn!("Error during Markdown post-processing: {}", e);
            raw.to_string()
        }
    }
}

/// Apply all post-processing rules, reporting internal failures.
pub fn try_post_process(raw: &str, settings: &ConversionSettings) -> Result<String, Docx2MdError> {
    let s = apply_list_marker(raw, settings.list_style)?;
    let s = match settings.line_break {
        LineBreak::Space => replace_br_tags(&s),
        LineBreak::Br => s,
    };
    Ok(s)
}

// ── Rule 1: List marker ──────────────────────────────────────────────────────

static RE_DASH_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([ \t]*)-([ \t]+)").unwrap());

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t]{0,3}(`{3,}|~{3,})").unwrap());

fn apply_list_marker(input: &str, marker: ListMarker) -> Result<String, Docx2MdError> {
    if marker == ListMarker::Dash {
        return Ok(input.to_string());
    }
    let replacement = format!("${{1}}{}${{2}}", marker.as_char());

    let mut out = String::with_capacity(input.len());
    let mut fence: Option<String> = None;

    for line in input.split_inclusive('\n') {
        if let Some(caps) = RE_FENCE.captures(line) {
            let run = caps
                .get(1)
                .ok_or_else(|| Docx2MdError::Internal("fence capture missing".into()))?
                .as_str();
            match &fence {
                None => fence = Some(run.to_string()),
                // A closing fence uses the same character, at least as long.
                Some(open) if run.starts_with(&open[..1]) && run.len() >= open.len() => {
                    fence = None
                }
                Some(_) => {}
            }
            out.push_str(line);
            continue;
        }
        if fence.is_some() {
            out.push_str(line);
        } else {
            out.push_str(&RE_DASH_BULLET.replace(line, replacement.as_str()));
        }
    }
    Ok(out)
}

// ── Rule 2: Line breaks ──────────────────────────────────────────────────────

static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

fn replace_br_tags(input: &str) -> String {
    RE_BR.replace_all(input, "  \n").into_owned()
}
