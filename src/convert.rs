//! Conversion orchestration and one-shot entry points.
//!
//! [`Orchestrator`] owns the cached [`SourceDocument`] and runs the engine
//! against it. It is what the interactive [`crate::Session`] drives. The free
//! functions ([`convert_file`], [`convert_bytes`], [`convert_to_file`],
//! [`convert_sync`]) run the whole pipeline once for library callers who do
//! not need a session.
//!
//! ## Why spawn_blocking + timeout?
//!
//! Engines are synchronous and CPU-bound. Each call runs on the blocking
//! pool so Tokio workers stay responsive, and is bounded by
//! [`SessionConfig::engine_timeout`]. An elapsed timeout is reported as a
//! transient failure; the worker thread cannot be cancelled and finishes in
//! the background, its result discarded.

use crate::actions::write_atomic;
use crate::config::{ConversionSettings, SessionConfig};
use crate::error::Docx2MdError;
use crate::output::{ConversionResult, ConversionStats};
use crate::pipeline::docx::DocxEngine;
use crate::pipeline::engine::{
    ConversionEngine, EngineError, EngineOptions, EngineOutput, FailureClass,
};
use crate::pipeline::intake::{self, FileCandidate, SourceDocument};
use crate::pipeline::postprocess;
use crate::pipeline::render::{self, CmarkRenderer, MarkdownRenderer, PreviewState, SyntectHighlighter};
use crate::theme::Theme;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine output for the cached document, before post-processing.
#[derive(Debug, Clone)]
pub struct RawConversion {
    pub raw_markdown: String,
    pub messages: Vec<String>,
    pub engine_duration_ms: u64,
}

/// Runs the engine against the cached source document.
pub struct Orchestrator {
    engine: Arc<dyn ConversionEngine>,
    timeout: Duration,
    source: Option<SourceDocument>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ConversionEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            timeout,
            source: None,
        }
    }

    pub fn source(&self) -> Option<&SourceDocument> {
        self.source.as_ref()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Cache a newly read document, replacing any previous one.
    pub fn load(&mut self, doc: SourceDocument) {
        if let Some(old) = self.source.replace(doc) {
            debug!("Replaced cached document '{}'", old.file_name);
        }
    }

    /// Drop the cached document.
    pub fn discard(&mut self) -> Option<SourceDocument> {
        self.source.take()
    }

    /// Convert the cached document with options derived from `settings`.
    ///
    /// On a terminal failure the cached document is discarded; on a
    /// transient one it is kept so the caller can retry.
    pub async fn reconvert(
        &mut self,
        settings: &ConversionSettings,
    ) -> Result<RawConversion, Docx2MdError> {
        let doc = self.source.clone().ok_or(Docx2MdError::NoSourceDocument)?;
        let options = EngineOptions::from_settings(settings);
        info!(
            "Converting '{}' ({} bytes) with {:?}",
            doc.file_name, doc.size, options
        );

        let start = Instant::now();
        let result = run_engine(
            Arc::clone(&self.engine),
            Arc::clone(&doc.bytes),
            options,
            self.timeout,
        )
        .await;
        let engine_duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(out) => {
                info!(
                    "Engine produced {} bytes of Markdown in {}ms ({} messages)",
                    out.markdown.len(),
                    engine_duration_ms,
                    out.messages.len()
                );
                Ok(RawConversion {
                    raw_markdown: out.markdown,
                    messages: out.messages,
                    engine_duration_ms,
                })
            }
            Err(e) => {
                let class = e.class();
                warn!("Conversion of '{}' failed ({:?}): {}", doc.file_name, class, e);
                if class == FailureClass::Terminal {
                    self.source = None;
                }
                Err(e.into_error())
            }
        }
    }
}

/// Run one engine call on the blocking pool, bounded by `timeout`.
pub async fn run_engine(
    engine: Arc<dyn ConversionEngine>,
    bytes: Arc<[u8]>,
    options: EngineOptions,
    timeout: Duration,
) -> Result<EngineOutput, EngineError> {
    let task = tokio::task::spawn_blocking(move || engine.convert(&bytes, &options));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(EngineError::Unexpected(format!("engine task panicked: {join}"))),
        Err(_) => Err(EngineError::Timeout {
            secs: timeout.as_secs().max(1),
        }),
    }
}

/// Post-process the raw Markdown and render (or skip) the preview.
///
/// Returns the post-processed Markdown, the preview state, the render time,
/// and the render error if one occurred.
pub async fn derive_outputs(
    raw_markdown: &str,
    settings: &ConversionSettings,
    renderer: Arc<dyn MarkdownRenderer>,
    theme: Theme,
    preview_enabled: bool,
) -> (String, PreviewState, u64, Option<Docx2MdError>) {
    let markdown = postprocess::post_process(raw_markdown, settings);
    if !preview_enabled || markdown.is_empty() {
        return (markdown, PreviewState::Disabled, 0, None);
    }
    let start = Instant::now();
    match render::render_preview(renderer, markdown.clone(), theme).await {
        Ok(html) => {
            let ms = start.elapsed().as_millis() as u64;
            (markdown, PreviewState::Rendered(html), ms, None)
        }
        Err(e) => {
            warn!("Error rendering Markdown preview: {}", e);
            (markdown, PreviewState::Failed, 0, Some(e))
        }
    }
}

// ── One-shot entry points ────────────────────────────────────────────────

/// Convert a `.docx` file to Markdown with the built-in engine and renderer.
///
/// The file goes through the same intake checks as in a session (type,
/// size limits). The preview is rendered in the light theme unless
/// `settings.disable_preview` is set.
///
/// # Example
/// ```rust,no_run
/// use edgequake_docx2md::{convert_file, ConversionSettings, SessionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = convert_file("report.docx", &ConversionSettings::default(), &SessionConfig::default()).await?;
/// println!("{}", result.markdown);
/// # Ok(())
/// # }
/// ```
pub async fn convert_file(
    path: impl AsRef<Path>,
    settings: &ConversionSettings,
    config: &SessionConfig,
) -> Result<ConversionResult, Docx2MdError> {
    let candidate = FileCandidate::from_path(path).await?;
    intake::validate(&candidate, &config.limits)?;
    let doc = intake::read_source(&candidate).await?;
    convert_document(doc, settings, config, Theme::Light).await
}

/// Convert an in-memory `.docx`. `file_name` is used for the result only.
pub async fn convert_bytes(
    file_name: &str,
    bytes: Vec<u8>,
    settings: &ConversionSettings,
    config: &SessionConfig,
) -> Result<ConversionResult, Docx2MdError> {
    let doc = SourceDocument::from_bytes(file_name, bytes);
    if doc.size > config.limits.max {
        return Err(Docx2MdError::FileTooLarge {
            size: doc.size,
            max: config.limits.max,
        });
    }
    convert_document(doc, settings, config, Theme::Light).await
}

async fn convert_document(
    doc: SourceDocument,
    settings: &ConversionSettings,
    config: &SessionConfig,
    theme: Theme,
) -> Result<ConversionResult, Docx2MdError> {
    let total_start = Instant::now();
    let input_bytes = doc.size;
    let file_name = doc.file_name.clone();

    let mut orchestrator = Orchestrator::new(Arc::new(DocxEngine), config.engine_timeout);
    orchestrator.load(doc);
    let raw = orchestrator.reconvert(settings).await?;

    let renderer: Arc<dyn MarkdownRenderer> =
        Arc::new(CmarkRenderer::new(Arc::new(SyntectHighlighter::new())));
    let (markdown, preview, render_duration_ms, render_err) = derive_outputs(
        &raw.raw_markdown,
        settings,
        renderer,
        theme,
        !settings.disable_preview,
    )
    .await;
    let mut messages = raw.messages;
    if let Some(e) = render_err {
        messages.push(e.to_string());
    }

    let stats = ConversionStats {
        input_bytes,
        markdown_bytes: markdown.len(),
        engine_duration_ms: raw.engine_duration_ms,
        render_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Conversion complete: {} → {} bytes Markdown, {}ms total",
        file_name, stats.markdown_bytes, stats.total_duration_ms
    );

    Ok(ConversionResult {
        file_name,
        raw_markdown: raw.raw_markdown,
        markdown,
        preview,
        messages,
        settings: *settings,
        stats,
    })
}

/// Convert a `.docx` and write the Markdown to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    settings: &ConversionSettings,
    config: &SessionConfig,
) -> Result<ConversionStats, Docx2MdError> {
    let result = convert_file(path, settings, config).await?;
    let out = output_path.as_ref().to_path_buf();
    let markdown = result.markdown;
    tokio::task::spawn_blocking(move || write_atomic(&out, markdown.as_bytes()))
        .await
        .map_err(|e| Docx2MdError::Internal(format!("write task panicked: {e}")))??;
    Ok(result.stats)
}

/// Synchronous wrapper around [`convert_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    path: impl AsRef<Path>,
    settings: &ConversionSettings,
    config: &SessionConfig,
) -> Result<ConversionResult, Docx2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Docx2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_file(path, settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListMarker, LineBreak};
    use crate::pipeline::docx::tests::docx_with_body;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine scripted to return a fixed sequence of outcomes.
    struct ScriptedEngine {
        outcomes: Vec<Result<EngineOutput, EngineError>>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(outcomes: Vec<Result<EngineOutput, EngineError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ConversionEngine for ScriptedEngine {
        fn convert(&self, _: &[u8], _: &EngineOptions) -> Result<EngineOutput, EngineError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes[i.min(self.outcomes.len() - 1)].clone()
        }
    }

    struct SlowEngine;

    impl ConversionEngine for SlowEngine {
        fn convert(&self, _: &[u8], _: &EngineOptions) -> Result<EngineOutput, EngineError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(EngineOutput::default())
        }
    }

    fn ok(md: &str) -> Result<EngineOutput, EngineError> {
        Ok(EngineOutput {
            markdown: md.into(),
            messages: vec![],
        })
    }

    fn doc() -> SourceDocument {
        SourceDocument::from_bytes("a.docx", b"bytes".to_vec())
    }

    #[tokio::test]
    async fn reconvert_without_source_is_rejected() {
        let mut o = Orchestrator::new(ScriptedEngine::new(vec![ok("x")]), Duration::from_secs(5));
        let err = o.reconvert(&ConversionSettings::default()).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::NoSourceDocument));
    }

    #[tokio::test]
    async fn transient_failure_keeps_source_and_retry_succeeds() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::Other("An unexpected error occurred".into())),
            ok("# Done\n"),
        ]);
        let mut o = Orchestrator::new(engine.clone(), Duration::from_secs(5));
        o.load(doc());

        let err = o.reconvert(&ConversionSettings::default()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(o.has_source());

        let raw = o.reconvert(&ConversionSettings::default()).await.unwrap();
        assert_eq!(raw.raw_markdown, "# Done\n");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminal_failure_discards_source() {
        let engine = ScriptedEngine::new(vec![Err(EngineError::Corrupt("bad zip".into()))]);
        let mut o = Orchestrator::new(engine, Duration::from_secs(5));
        o.load(doc());
        let err = o.reconvert(&ConversionSettings::default()).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::ConversionTerminal { .. }));
        assert!(!o.has_source());
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let mut o = Orchestrator::new(Arc::new(SlowEngine), Duration::from_millis(20));
        o.load(doc());
        let err = o.reconvert(&ConversionSettings::default()).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::ConversionTransient { .. }));
        assert!(err.to_string().contains("timeout"));
        assert!(o.has_source());
    }

    #[tokio::test]
    async fn derive_outputs_respects_preview_flag() {
        let s = ConversionSettings {
            list_style: ListMarker::Asterisk,
            line_break: LineBreak::Space,
            ..Default::default()
        };
        let renderer: Arc<dyn MarkdownRenderer> = Arc::new(CmarkRenderer::plain());

        let (md, preview, _, err) =
            derive_outputs("- a<br>b\n", &s, Arc::clone(&renderer), Theme::Light, false).await;
        assert_eq!(md, "* a  \nb\n");
        assert_eq!(preview, PreviewState::Disabled);
        assert!(err.is_none());

        let (_, preview, _, _) =
            derive_outputs("- a<br>b\n", &s, renderer, Theme::Light, true).await;
        assert!(preview.is_rendered());
    }

    #[tokio::test]
    async fn convert_bytes_runs_full_pipeline() {
        let docx = docx_with_body(r#"<w:p><w:r><w:t>Hello</w:t></w:r></w:p>"#);
        let result = convert_bytes(
            "hello.docx",
            docx,
            &ConversionSettings::default(),
            &SessionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.markdown, "Hello\n");
        assert_eq!(result.file_name, "hello.docx");
        assert!(matches!(result.preview, PreviewState::Rendered(ref h) if h.contains("<p>Hello</p>")));
    }

    #[tokio::test]
    async fn convert_to_file_writes_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.docx");
        std::fs::write(&input, docx_with_body(r#"<w:p><w:r><w:t>Body</w:t></w:r></w:p>"#)).unwrap();
        let output = dir.path().join("out").join("in.md");

        let stats = convert_to_file(
            &input,
            &output,
            &ConversionSettings::default(),
            &SessionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "Body\n");
        assert_eq!(stats.markdown_bytes, 5);
    }
}
