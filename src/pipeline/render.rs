//! Preview rendering: Markdown → HTML with highlighted code blocks.
//!
//! ## Why spawn_blocking?
//!
//! Parsing a large document and running syntect over every code block is
//! CPU-bound and can take long enough to stall a Tokio worker.
//! [`render_preview`] moves the work onto the blocking pool, the same way
//! the engine call is dispatched.
//!
//! ## Per-block fallback
//!
//! Code blocks are highlighted one at a time through a [`CodeHighlighter`].
//! If one block fails, only that block falls back to escaped plain text; the
//! rest of the preview is unaffected.

use crate::error::Docx2MdError;
use crate::theme::Theme;
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use std::sync::Arc;
use syntect::highlighting::ThemeSet;
use syntect::parsing::SyntaxSet;
use tracing::{debug, warn};

pub const PLACEHOLDER_TEXT: &str = "Preview will render here...";
pub const DISABLED_TEXT: &str = "Preview is disabled or no content.";
pub const FAILED_TEXT: &str = "Error rendering preview.";

/// What the preview pane currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "html", rename_all = "snake_case")]
pub enum PreviewState {
    /// Nothing converted yet.
    #[default]
    Placeholder,
    /// Preview turned off, or empty Markdown.
    Disabled,
    Rendered(String),
    /// The renderer failed; the Markdown is still valid.
    Failed,
}

impl PreviewState {
    /// HTML to display, placeholders included.
    pub fn html(&self) -> String {
        match self {
            PreviewState::Rendered(html) => html.clone(),
            PreviewState::Placeholder => placeholder(PLACEHOLDER_TEXT),
            PreviewState::Disabled => placeholder(DISABLED_TEXT),
            PreviewState::Failed => placeholder(FAILED_TEXT),
        }
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self, PreviewState::Rendered(_))
    }
}

fn placeholder(text: &str) -> String {
    format!("<p class=\"placeholder\">{text}</p>")
}

// ── Highlighting ─────────────────────────────────────────────────────────

/// Turns one code block into a complete `<pre>` element.
pub trait CodeHighlighter: Send + Sync {
    fn highlight(&self, code: &str, lang: Option<&str>, theme: Theme) -> Result<String, String>;
}

/// No colours, just escaping.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainHighlighter;

impl CodeHighlighter for PlainHighlighter {
    fn highlight(&self, code: &str, lang: Option<&str>, _theme: Theme) -> Result<String, String> {
        Ok(plain_code_block(code, lang))
    }
}

fn plain_code_block(code: &str, lang: Option<&str>) -> String {
    match lang {
        Some(l) => format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            escape_html(l),
            escape_html(code)
        ),
        None => format!("<pre><code>{}</code></pre>\n", escape_html(code)),
    }
}

/// Syntect with the bundled syntaxes and themes.
///
/// Loading the sets takes a few milliseconds, so build one highlighter per
/// session and share it.
pub struct SyntectHighlighter {
    syntaxes: SyntaxSet,
    themes: ThemeSet,
}

impl Default for SyntectHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntectHighlighter {
    pub fn new() -> Self {
        Self {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            themes: ThemeSet::load_defaults(),
        }
    }
}

impl CodeHighlighter for SyntectHighlighter {
    fn highlight(&self, code: &str, lang: Option<&str>, theme: Theme) -> Result<String, String> {
        let syntax = lang
            .and_then(|l| self.syntaxes.find_syntax_by_token(l))
            .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());
        let palette = self
            .themes
            .themes
            .get(theme.syntax_theme())
            .ok_or_else(|| format!("highlight theme '{}' not bundled", theme.syntax_theme()))?;
        syntect::html::highlighted_html_for_string(code, &self.syntaxes, syntax, palette)
            .map_err(|e| e.to_string())
    }
}

// ── Markdown rendering ───────────────────────────────────────────────────

/// Markdown → HTML fragment.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str, theme: Theme) -> Result<String, Docx2MdError>;
}

/// pulldown-cmark with GFM extensions.
pub struct CmarkRenderer {
    highlighter: Arc<dyn CodeHighlighter>,
}

impl CmarkRenderer {
    pub fn new(highlighter: Arc<dyn CodeHighlighter>) -> Self {
        Self { highlighter }
    }

    /// Renderer without syntax colours.
    pub fn plain() -> Self {
        Self::new(Arc::new(PlainHighlighter))
    }

    fn options() -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        options
    }
}

impl MarkdownRenderer for CmarkRenderer {
    fn render(&self, markdown: &str, theme: Theme) -> Result<String, Docx2MdError> {
        let parser = Parser::new_ext(markdown, Self::options());

        let mut events: Vec<Event> = Vec::new();
        let mut code: Option<(Option<String>, String)> = None;
        let mut blocks = 0usize;

        for event in parser {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => info
                            .split_whitespace()
                            .next()
                            .filter(|l| !l.is_empty())
                            .map(str::to_string),
                        CodeBlockKind::Indented => None,
                    };
                    code = Some((lang, String::new()));
                }
                Event::Text(text) if code.is_some() => {
                    if let Some((_, buf)) = code.as_mut() {
                        buf.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, buf)) = code.take() {
                        blocks += 1;
                        let html = self
                            .highlighter
                            .highlight(&buf, lang.as_deref(), theme)
                            .unwrap_or_else(|e| {
                                warn!("Highlighting failed for a {:?} block: {}", lang, e);
                                plain_code_block(&buf, lang.as_deref())
                            });
                        events.push(Event::Html(CowStr::from(html)));
                    }
                }
                other => events.push(other),
            }
        }

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, events.into_iter());
        debug!("Rendered preview: {} bytes HTML, {} code blocks", out.len(), blocks);
        Ok(out)
    }
}

/// Render on the blocking pool.
///
/// A panic inside the renderer is reported as [`Docx2MdError::RenderFailed`].
pub async fn render_preview(
    renderer: Arc<dyn MarkdownRenderer>,
    markdown: String,
    theme: Theme,
) -> Result<String, Docx2MdError> {
    tokio::task::spawn_blocking(move || renderer.render(&markdown, theme))
        .await
        .map_err(|e| Docx2MdError::RenderFailed {
            detail: format!("render task panicked: {e}"),
        })?
}

/// Wrap a preview fragment in a standalone HTML page.
pub fn preview_document(body: &str, title: &str, theme: Theme) -> String {
    let class = match theme {
        Theme::Dark => " class=\"dark-mode\"",
        Theme::Light => "",
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body{class}>\n\
         <main class=\"preview-content\">\n{body}</main>\n</body>\n</html>\n",
        escape_html(title),
        PREVIEW_CSS
    )
}

const PREVIEW_CSS: &str = "body{font-family:system-ui,sans-serif;line-height:1.6;max-width:52rem;margin:2rem auto;padding:0 1rem;color:#24292f;background:#fff}\
body.dark-mode{color:#c9d1d9;background:#0d1117}\
table{border-collapse:collapse}th,td{border:1px solid #d0d7de;padding:.3rem .6rem}\
pre{padding:.8rem;overflow:auto;border-radius:6px}\
img{max-width:100%}\
.placeholder{color:#6e7781;font-style:italic}";

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHighlighter;

    impl CodeHighlighter for FailingHighlighter {
        fn highlight(&self, code: &str, lang: Option<&str>, _: Theme) -> Result<String, String> {
            if lang == Some("boom") {
                Err("exploded".into())
            } else {
                Ok(format!("<pre class=\"ok\">{code}</pre>"))
            }
        }
    }

    struct PanickingRenderer;

    impl MarkdownRenderer for PanickingRenderer {
        fn render(&self, _: &str, _: Theme) -> Result<String, Docx2MdError> {
            panic!("renderer bug");
        }
    }

    #[test]
    fn renders_gfm_tables_and_strikethrough() {
        let md = "| a | b |\n| --- | --- |\n| 1 | 2 |\n\n~~old~~\n";
        let html = CmarkRenderer::plain().render(md, Theme::Light).unwrap();
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>old</del>"));
    }

    #[test]
    fn hard_breaks_render_as_br() {
        let html = CmarkRenderer::plain()
            .render("line1  \nline2\n", Theme::Light)
            .unwrap();
        assert!(html.contains("line1<br />"));
    }

    #[test]
    fn soft_breaks_stay_newlines() {
        let html = CmarkRenderer::plain().render("a\nb\n", Theme::Light).unwrap();
        assert!(html.contains("a\nb"));
        assert!(!html.contains("<br"));
    }

    #[test]
    fn plain_highlighter_escapes_code() {
        let html = CmarkRenderer::plain()
            .render("```rust\nlet x = a < b;\n```\n", Theme::Light)
            .unwrap();
        assert!(html.contains("language-rust"));
        assert!(html.contains("a &lt; b"));
    }

    #[test]
    fn one_failing_block_does_not_spoil_others() {
        let r = CmarkRenderer::new(Arc::new(FailingHighlighter));
        let md = "```boom\n<x>\n```\n\n```text\nfine\n```\n";
        let html = r.render(md, Theme::Light).unwrap();
        assert!(html.contains("<pre class=\"ok\">fine"));
        assert!(html.contains("language-boom"));
        assert!(html.contains("&lt;x&gt;"));
    }

    #[test]
    fn syntect_uses_theme_palette_and_tolerates_unknown_language() {
        let h = SyntectHighlighter::new();
        let light = h.highlight("fn main() {}\n", Some("rust"), Theme::Light).unwrap();
        let dark = h.highlight("fn main() {}\n", Some("rust"), Theme::Dark).unwrap();
        assert!(light.starts_with("<pre"));
        assert_ne!(light, dark);
        assert!(h.highlight("???\n", Some("no-such-lang"), Theme::Dark).is_ok());
    }

    #[test]
    fn placeholders_have_fixed_texts() {
        assert!(PreviewState::Placeholder.html().contains(PLACEHOLDER_TEXT));
        assert!(PreviewState::Disabled.html().contains(DISABLED_TEXT));
        assert!(PreviewState::Failed.html().contains(FAILED_TEXT));
        assert_eq!(PreviewState::Rendered("<p>x</p>".into()).html(), "<p>x</p>");
    }

    #[test]
    fn document_carries_dark_mode_class() {
        let dark = preview_document("<p>x</p>", "a <b>", Theme::Dark);
        assert!(dark.contains("<body class=\"dark-mode\">"));
        assert!(dark.contains("<title>a &lt;b&gt;</title>"));
        let light = preview_document("<p>x</p>", "a", Theme::Light);
        assert!(light.contains("<body>"));
    }

    #[tokio::test]
    async fn render_preview_maps_panic_to_render_failed() {
        let err = render_preview(Arc::new(PanickingRenderer), "x".into(), Theme::Light)
            .await
            .unwrap_err();
        assert!(matches!(err, Docx2MdError::RenderFailed { .. }));
    }

    #[tokio::test]
    async fn render_preview_runs_renderer() {
        let html = render_preview(Arc::new(CmarkRenderer::plain()), "# T\n".into(), Theme::Dark)
            .await
            .unwrap();
        assert_eq!(html, "<h1>T</h1>\n");
    }
}
