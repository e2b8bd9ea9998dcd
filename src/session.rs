//! The interactive session: one document, one set of preferences, one theme.
//!
//! A [`Session`] owns everything a front end displays and reacts to events
//! one at a time through `&mut self` methods. Every async entry point is
//! gated by an explicit in-flight flag; a second operation while one is
//! pending fails with [`Docx2MdError::Busy`].
//!
//! ```text
//! open_file ──▶ intake ──▶ orchestrator ──▶ post-process ──▶ preview
//!                 │              │                │              │
//!              status         retry /          settings       theme
//!                           reconvert       save / reset     toggle
//! ```
//!
//! Every outcome, good or bad, is also posted on the status line and
//! forwarded to the [`SessionObserver`], so a front end never has to
//! inspect a `Result` to keep its display current.

use crate::actions::{self, Clipboard, CopyOutcome, DownloadReceipt, FileSaver, Osc52Clipboard, SystemClipboard};
use crate::config::{ConversionSettings, SessionConfig};
use crate::convert::{derive_outputs, Orchestrator};
use crate::error::{Docx2MdError, Recoverable};
use crate::observer::{Confirmation, NoopObserver, SessionObserver};
use crate::output::{ConversionResult, ConversionStats};
use crate::pipeline::docx::DocxEngine;
use crate::pipeline::engine::ConversionEngine;
use crate::pipeline::intake::{self, format_bytes, FileCandidate, SizeVerdict};
use crate::pipeline::render::{self, CmarkRenderer, MarkdownRenderer, PreviewState, SyntectHighlighter};
use crate::settings::SettingsStore;
use crate::store::{open_store, KeyValueStore};
use crate::theme::{ColorSchemeProbe, SystemColorScheme, Theme, ThemeController};
use crate::ui::{ControlState, Operation, StatusLine, StatusMessage};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`Session`]. Every collaborator has a working default.
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<SessionConfig>,
    engine: Option<Arc<dyn ConversionEngine>>,
    renderer: Option<Arc<dyn MarkdownRenderer>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    clipboard_fallback: Option<Option<Arc<dyn Clipboard>>>,
    saver: Option<Arc<dyn FileSaver>>,
    store: Option<Arc<dyn KeyValueStore>>,
    probe: Option<Box<dyn ColorSchemeProbe>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ConversionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Fallback clipboard; `None` disables the fallback entirely.
    pub fn clipboard_fallback(mut self, fallback: Option<Arc<dyn Clipboard>>) -> Self {
        self.clipboard_fallback = Some(fallback);
        self
    }

    pub fn file_saver(mut self, saver: Arc<dyn FileSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    /// Override the store chosen by [`SessionConfig::storage`].
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn color_scheme(mut self, probe: Box<dyn ColorSchemeProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Load preferences, resolve the theme and return a ready session.
    ///
    /// Preference load problems do not fail the build; they are posted on
    /// the status line.
    pub fn build(self) -> Session {
        let config = self.config.unwrap_or_default();
        let store = self.store.unwrap_or_else(|| open_store(&config.storage));
        let engine = self.engine.unwrap_or_else(|| Arc::new(DocxEngine));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(CmarkRenderer::new(Arc::new(SyntectHighlighter::new()))));
        let clipboard = self.clipboard.unwrap_or_else(|| Arc::new(SystemClipboard));
        let clipboard_fallback = match self.clipboard_fallback {
            Some(fallback) => fallback,
            None => {
                let osc52: Arc<dyn Clipboard> = Arc::new(Osc52Clipboard::stderr());
                Some(osc52)
            }
        };
        let probe = self.probe.unwrap_or_else(|| Box::new(SystemColorScheme));
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));

        let Recoverable {
            value: settings,
            warnings,
        } = SettingsStore::open(Arc::clone(&store));
        let theme = ThemeController::new(store, probe);
        info!(
            "Session ready: theme={}, settings={:?}",
            theme.current(),
            settings.current()
        );

        let mut session = Session {
            orchestrator: Orchestrator::new(engine, config.engine_timeout),
            config,
            settings,
            theme,
            renderer,
            clipboard,
            clipboard_fallback,
            saver: self.saver,
            observer,
            result: None,
            file_info: None,
            display_name: String::new(),
            preview_override: false,
            in_flight: InFlight::default(),
            status: StatusLine::default(),
            draft: None,
        };
        if let Some(first) = warnings.first() {
            session.post(load_warning(first));
        }
        session
    }
}

fn load_warning(e: &Docx2MdError) -> StatusMessage {
    let text = match e {
        Docx2MdError::StorageRead { .. } => "Could not load saved preferences due to storage error.",
        _ => "Could not parse saved preferences. Using defaults.",
    };
    StatusMessage::warning(text).hide_after_ms(4000)
}

// ── In-flight flag ───────────────────────────────────────────────────────

/// The pending operation, shared with the [`FlightGuard`] that clears it.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<Option<Operation>>>);

impl InFlight {
    fn get(&self) -> Option<Operation> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, op: Option<Operation>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = op;
    }
}

/// Clears the in-flight flag and hides the loader when dropped, including
/// when the caller drops an operation's future before it completes.
#[must_use]
struct FlightGuard {
    slot: InFlight,
    observer: Arc<dyn SessionObserver>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(op) = self.slot.get() {
            debug!("{op:?} ended; session idle");
        }
        self.slot.set(None);
        self.observer.on_loader(None);
    }
}

// ── Session ──────────────────────────────────────────────────────────────

/// All state a front end shows, plus the operations that change it.
pub struct Session {
    config: SessionConfig,
    settings: SettingsStore,
    theme: ThemeController,
    orchestrator: Orchestrator,
    renderer: Arc<dyn MarkdownRenderer>,
    clipboard: Arc<dyn Clipboard>,
    clipboard_fallback: Option<Arc<dyn Clipboard>>,
    saver: Option<Arc<dyn FileSaver>>,
    observer: Arc<dyn SessionObserver>,

    result: Option<ConversionResult>,
    /// `Selected: <name> (<size>)`.
    file_info: Option<String>,
    /// Stem used for downloads.
    display_name: String,
    /// Preview skipped for the current document only.
    preview_override: bool,
    in_flight: InFlight,
    status: StatusLine,
    /// Settings modal draft; `Some` while the modal is open.
    draft: Option<ConversionSettings>,
}

/// Serializable view of the session, for `status` and `--json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub operation: Option<Operation>,
    pub status: Option<StatusMessage>,
    pub controls: ControlState,
    pub file_info: Option<String>,
    pub has_source: bool,
    pub has_result: bool,
    pub theme: Theme,
    pub theme_toggle_label: &'static str,
    pub settings: ConversionSettings,
    pub settings_open: bool,
    pub preview_enabled: bool,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn settings(&self) -> ConversionSettings {
        self.settings.current()
    }

    pub fn theme(&self) -> Theme {
        self.theme.current()
    }

    pub fn result(&self) -> Option<&ConversionResult> {
        self.result.as_ref()
    }

    /// Post-processed Markdown, empty when nothing has been converted.
    pub fn markdown(&self) -> &str {
        self.result.as_ref().map(|r| r.markdown.as_str()).unwrap_or("")
    }

    pub fn preview(&self) -> PreviewState {
        self.result
            .as_ref()
            .map(|r| r.preview.clone())
            .unwrap_or_default()
    }

    pub fn file_info(&self) -> Option<&str> {
        self.file_info.as_deref()
    }

    pub fn has_source(&self) -> bool {
        self.orchestrator.has_source()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.in_flight.get()
    }

    /// The status message visible right now.
    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.visible(Instant::now())
    }

    /// The last message posted, even if it has since auto-hidden.
    pub fn last_status(&self) -> Option<&StatusMessage> {
        self.status.last()
    }

    pub fn controls(&self) -> ControlState {
        ControlState::derive(
            self.in_flight.get().is_some(),
            self.orchestrator.has_source(),
            self.result.as_ref().is_some_and(ConversionResult::has_markdown),
        )
    }

    pub fn preview_enabled(&self) -> bool {
        !self.settings.current().disable_preview && !self.preview_override
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            operation: self.in_flight.get(),
            status: self.status().cloned(),
            controls: self.controls(),
            file_info: self.file_info.clone(),
            has_source: self.has_source(),
            has_result: self.result.is_some(),
            theme: self.theme.current(),
            theme_toggle_label: self.theme.toggle_label(),
            settings: self.settings.current(),
            settings_open: self.draft.is_some(),
            preview_enabled: self.preview_enabled(),
        }
    }

    // ── File intake and conversion ───────────────────────────────────────

    /// Select a file from disk and convert it.
    ///
    /// Rejected files (wrong type, too large) leave the session untouched.
    /// An accepted file replaces the previous document and result.
    /// A file that cannot be read clears the previous document as well.
    pub async fn open_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<&ConversionResult, Docx2MdError> {
        self.ensure_idle()?;
        let candidate = match FileCandidate::from_path(path).await {
            Ok(c) => c,
            Err(e) => {
                self.forget_document();
                self.post(StatusMessage::error(format!("Error reading file: {e}")));
                self.notify_controls();
                return Err(e);
            }
        };
        self.open_candidate(candidate).await
    }

    /// Select a file described by a candidate (name, MIME, size, path).
    pub async fn open_candidate(
        &mut self,
        candidate: FileCandidate,
    ) -> Result<&ConversionResult, Docx2MdError> {
        self.ensure_idle()?;

        // ── Step 1: Validate ─────────────────────────────────────────────
        let verdict = match intake::validate(&candidate, &self.config.limits) {
            Ok(v) => v,
            Err(e) => {
                let msg = StatusMessage::error(format!("Error: {e}"));
                let ms = match e {
                    Docx2MdError::FileTooLarge { .. } => 6000,
                    _ => 5000,
                };
                self.post(msg.hide_after_ms(ms));
                return Err(e);
            }
        };

        // ── Step 2: Replace the previous document ────────────────────────
        info!("Processing file: {}", candidate.name);
        self.display_name = intake::strip_extension(&candidate.name).to_string();
        self.file_info = Some(format!(
            "Selected: {} ({})",
            candidate.name,
            format_bytes(candidate.size)
        ));
        self.clear_output();
        self.orchestrator.discard();
        self.preview_override = false;
        let flight = self.begin(Operation::Reading);

        // ── Step 3: Size notices ─────────────────────────────────────────
        let size = format_bytes(candidate.size);
        match verdict {
            SizeVerdict::Warning => {
                self.post(
                    StatusMessage::warning(format!(
                        "Warning: Processing a very large file ({size}). Conversion may be slow and memory-intensive. Consider disabling preview in settings."
                    ))
                    .hide_after_ms(8000),
                );
                if !self.settings.current().disable_preview
                    && self.observer.confirm(Confirmation::DisableLargeFilePreview)
                {
                    self.preview_override = true;
                    self.post(
                        StatusMessage::info("Preview temporarily disabled for this file.")
                            .hide_after_ms(3000),
                    );
                }
            }
            SizeVerdict::Note => self.post(
                StatusMessage::info(format!(
                    "Note: Processing a large file ({size}). This may take a moment."
                ))
                .hide_after_ms(4000),
            ),
            SizeVerdict::Ok | SizeVerdict::TooLarge => {}
        }

        // ── Step 4: Read into memory ─────────────────────────────────────
        let doc = match intake::read_source(&candidate).await {
            Ok(doc) => doc,
            Err(e) => {
                self.forget_document();
                self.post(StatusMessage::error(format!("Error reading file: {e}")));
                self.end(flight);
                return Err(e);
            }
        };
        self.orchestrator.load(doc);

        // ── Step 5: Convert ──────────────────────────────────────────────
        self.advance(Operation::Converting);
        let outcome = self.run_conversion().await;
        self.end(flight);
        outcome?;
        self.result.as_ref().ok_or(Docx2MdError::NoSourceDocument)
    }

    /// Convert the cached document again with the current settings.
    pub async fn reconvert(&mut self) -> Result<&ConversionResult, Docx2MdError> {
        self.ensure_idle()?;
        if !self.orchestrator.has_source() {
            self.post(
                StatusMessage::warning("No file data available to reconvert. Please upload again.")
                    .hide_after_ms(4000),
            );
            return Err(Docx2MdError::NoSourceDocument);
        }
        debug!("Reconverting stored file data with current settings");
        let flight = self.begin(Operation::Reconverting);
        let outcome = self.run_conversion().await;
        self.end(flight);
        outcome?;
        self.result.as_ref().ok_or(Docx2MdError::NoSourceDocument)
    }

    /// The retry action offered after a transient failure.
    pub async fn retry(&mut self) -> Result<&ConversionResult, Docx2MdError> {
        self.ensure_idle()?;
        if !self.orchestrator.has_source() {
            self.post(StatusMessage::info("Please select the file again to retry.").hide_after_ms(3000));
            return Err(Docx2MdError::NoSourceDocument);
        }
        self.post(StatusMessage::info("Retrying conversion..."));
        self.reconvert().await
    }

    async fn run_conversion(&mut self) -> Result<(), Docx2MdError> {
        let total_start = Instant::now();
        let settings = self.settings.current();
        let (file_name, input_bytes) = match self.orchestrator.source() {
            Some(doc) => (doc.file_name.clone(), doc.size),
            None => return Err(Docx2MdError::NoSourceDocument),
        };

        let raw = match self.orchestrator.reconvert(&settings).await {
            Ok(raw) => raw,
            Err(e) => {
                self.clear_output();
                let msg = if e.is_retryable() {
                    StatusMessage::error(format!("{e} Would you like to try again?")).with_retry()
                } else {
                    StatusMessage::error(e.to_string())
                };
                self.post(msg);
                return Err(e);
            }
        };

        let (markdown, preview, render_duration_ms, render_err) = derive_outputs(
            &raw.raw_markdown,
            &settings,
            Arc::clone(&self.renderer),
            self.theme.current(),
            self.preview_enabled(),
        )
        .await;

        self.result = Some(ConversionResult {
            file_name,
            stats: ConversionStats {
                input_bytes,
                markdown_bytes: markdown.len(),
                engine_duration_ms: raw.engine_duration_ms,
                render_duration_ms,
                total_duration_ms: total_start.elapsed().as_millis() as u64,
            },
            raw_markdown: raw.raw_markdown,
            markdown,
            preview,
            messages: raw.messages,
            settings,
        });
        self.post(StatusMessage::success("Conversion successful!").hide_after_ms(3000));
        if render_err.is_some() {
            self.post(StatusMessage::error("Error rendering Markdown preview."));
        }
        Ok(())
    }

    /// Drop the cached document and its result.
    ///
    /// Returns `false` when there was nothing to clear.
    pub fn clear_file_memory(&mut self) -> Result<bool, Docx2MdError> {
        self.ensure_idle()?;
        if self.orchestrator.discard().is_none() {
            return Ok(false);
        }
        self.result = None;
        self.file_info = None;
        self.display_name.clear();
        self.preview_override = false;
        self.post(StatusMessage::success("File cleared from memory.").hide_after_ms(2000));
        self.notify_controls();
        Ok(true)
    }

    // ── Preview ──────────────────────────────────────────────────────────

    /// Show or hide the preview for this session without persisting.
    pub async fn toggle_preview(&mut self, enabled: bool) -> Result<(), Docx2MdError> {
        self.ensure_idle()?;
        let mut settings = self.settings.current();
        settings.disable_preview = !enabled;
        self.settings.set_transient(settings);
        if enabled {
            self.preview_override = false;
        }
        self.rederive().await;
        Ok(())
    }

    /// The preview as a standalone HTML page, if one is rendered.
    pub fn preview_document(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        match &result.preview {
            PreviewState::Rendered(html) => Some(render::preview_document(
                html,
                &self.display_name,
                self.theme.current(),
            )),
            _ => None,
        }
    }

    /// Re-run post-processing and preview from the cached raw Markdown.
    async fn rederive(&mut self) {
        let Some(raw) = self.result.as_ref().map(|r| r.raw_markdown.clone()) else {
            return;
        };
        let settings = self.settings.current();
        let (markdown, preview, render_ms, err) = derive_outputs(
            &raw,
            &settings,
            Arc::clone(&self.renderer),
            self.theme.current(),
            self.preview_enabled(),
        )
        .await;
        if let Some(result) = self.result.as_mut() {
            result.stats.markdown_bytes = markdown.len();
            result.stats.render_duration_ms = render_ms;
            result.markdown = markdown;
            result.preview = preview;
            result.settings = settings;
        }
        if err.is_some() {
            self.post(StatusMessage::error("Error rendering Markdown preview."));
        }
    }

    // ── Settings modal ───────────────────────────────────────────────────

    /// Open the settings modal with a draft of the active settings.
    pub fn open_settings(&mut self) -> Result<ConversionSettings, Docx2MdError> {
        self.ensure_idle()?;
        let draft = self.settings.current();
        self.draft = Some(draft);
        Ok(draft)
    }

    pub fn draft(&self) -> Option<ConversionSettings> {
        self.draft
    }

    /// Change one field of the draft, e.g. `("listStyle", "*")`.
    pub fn update_draft(&mut self, key: &str, value: &str) -> Result<ConversionSettings, Docx2MdError> {
        let draft = self
            .draft
            .as_mut()
            .ok_or_else(|| Docx2MdError::InvalidSettings("the settings panel is not open".into()))?;
        draft.set_from_str(key, value)?;
        Ok(*draft)
    }

    /// Replace the whole draft.
    pub fn set_draft(&mut self, settings: ConversionSettings) {
        self.draft = Some(settings);
    }

    /// Discard the draft and close the modal.
    pub fn close_settings(&mut self) {
        self.draft = None;
    }

    /// Persist the draft, close the modal and re-derive the current output.
    ///
    /// Engine-level options (images, underline) only apply after a
    /// reconvert.
    pub async fn save_settings(&mut self) -> Result<Recoverable<()>, Docx2MdError> {
        self.ensure_idle()?;
        let settings = self.draft.take().unwrap_or_else(|| self.settings.current());
        let saved = self.settings.save(settings);
        if saved.is_clean() {
            self.post(
                StatusMessage::info("Preferences saved. Re-process the file for all changes to fully apply.")
                    .hide_after_ms(4000),
            );
        } else {
            self.post(StatusMessage::error("Could not save preferences due to an error.").hide_after_ms(4000));
        }
        self.rederive().await;
        Ok(saved)
    }

    /// Ask for confirmation, then return every setting to its default.
    ///
    /// `Ok(false)` when the user declined.
    pub async fn reset_settings(&mut self) -> Result<bool, Docx2MdError> {
        self.ensure_idle()?;
        if !self.observer.confirm(Confirmation::ResetSettings) {
            return Ok(false);
        }
        let reset = self.settings.reset_to_default();
        if self.draft.is_some() {
            self.draft = Some(ConversionSettings::default());
        }
        if reset.is_clean() {
            self.post(StatusMessage::success("Settings reset to default.").hide_after_ms(3000));
            if self.result.is_some() {
                self.post(
                    StatusMessage::info("Settings reset. Re-process the file for changes to apply.")
                        .hide_after_ms(4000),
                );
            }
        } else {
            self.post(StatusMessage::error("Could not reset preferences due to an error.").hide_after_ms(4000));
        }
        self.rederive().await;
        Ok(true)
    }

    /// Apply settings for this session only, e.g. from command-line flags.
    pub async fn apply_transient_settings(&mut self, settings: ConversionSettings) -> Result<(), Docx2MdError> {
        self.ensure_idle()?;
        self.settings.set_transient(settings);
        self.rederive().await;
        Ok(())
    }

    // ── Output actions ───────────────────────────────────────────────────

    /// Copy the Markdown. `Ok(None)` when there was nothing to copy.
    pub fn copy(&mut self) -> Result<Option<CopyOutcome>, Docx2MdError> {
        self.ensure_idle()?;
        let markdown = self.markdown().to_string();
        if markdown.is_empty() {
            self.post(StatusMessage::info("Nothing to copy!").hide_after_ms(2000));
            return Ok(None);
        }
        match actions::copy_with_fallback(
            self.clipboard.as_ref(),
            self.clipboard_fallback.as_deref(),
            &markdown,
        ) {
            Ok(outcome) => {
                let text = match outcome {
                    CopyOutcome::Primary => "Markdown copied to clipboard!",
                    CopyOutcome::Fallback => "Markdown copied to clipboard! (using fallback)",
                };
                self.post(StatusMessage::success(text).hide_after_ms(2000));
                Ok(Some(outcome))
            }
            Err(e) => {
                let ms = match e {
                    Docx2MdError::ClipboardDenied => 4000,
                    _ => 6000,
                };
                self.post(StatusMessage::error(e.to_string()).hide_after_ms(ms));
                Err(e)
            }
        }
    }

    /// Save the Markdown as `<stem>.md` in `dir`. `Ok(None)` when there was
    /// nothing to save.
    pub fn download(&mut self, dir: impl AsRef<Path>) -> Result<Option<DownloadReceipt>, Docx2MdError> {
        self.ensure_idle()?;
        let markdown = self.markdown().to_string();
        if markdown.is_empty() {
            self.post(StatusMessage::info("Nothing to download!").hide_after_ms(2000));
            return Ok(None);
        }
        match actions::download(&markdown, &self.display_name, dir.as_ref(), self.saver.as_deref()) {
            Ok(receipt) => {
                self.post(
                    StatusMessage::success(format!("Markdown saved to {}.", receipt.path.display()))
                        .hide_after_ms(2000),
                );
                Ok(Some(receipt))
            }
            Err(e) => {
                self.post(StatusMessage::error(format!("Failed to save Markdown: {e}")));
                Err(e)
            }
        }
    }

    // ── Theme ────────────────────────────────────────────────────────────

    pub async fn toggle_theme(&mut self) -> Result<Theme, Docx2MdError> {
        self.set_theme(self.theme.current().flipped()).await
    }

    /// Apply and persist `theme`, re-rendering the preview in its palette.
    pub async fn set_theme(&mut self, theme: Theme) -> Result<Theme, Docx2MdError> {
        self.ensure_idle()?;
        let applied = self.theme.apply(theme);
        if !applied.is_clean() {
            self.post(StatusMessage::warning("Could not save theme preference.").hide_after_ms(4000));
        }
        if self.result.as_ref().is_some_and(|r| r.preview.is_rendered()) {
            self.rederive().await;
        }
        Ok(applied.value)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn ensure_idle(&self) -> Result<(), Docx2MdError> {
        match self.in_flight.get() {
            Some(op) => Err(Docx2MdError::Busy {
                operation: op.message().trim_end_matches('.').to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Mark `op` as in flight until the returned guard is dropped.
    fn begin(&mut self, op: Operation) -> FlightGuard {
        self.in_flight.set(Some(op));
        self.observer.on_loader(Some(op));
        self.notify_controls();
        FlightGuard {
            slot: self.in_flight.clone(),
            observer: Arc::clone(&self.observer),
        }
    }

    fn advance(&mut self, op: Operation) {
        self.in_flight.set(Some(op));
        self.observer.on_loader(Some(op));
    }

    fn end(&mut self, flight: FlightGuard) {
        drop(flight);
        self.notify_controls();
    }

    fn post(&mut self, message: StatusMessage) {
        debug!("status [{}] {}", message.severity, message.text);
        self.observer.on_status(&message);
        self.status.show(message, Instant::now());
    }

    fn notify_controls(&self) {
        self.observer.on_controls(self.controls());
    }

    /// Drop the result but keep the file info.
    fn clear_output(&mut self) {
        self.result = None;
        self.status.clear();
    }

    /// A read failure leaves nothing behind: no result, buffer or file info.
    fn forget_document(&mut self) {
        self.clear_output();
        self.orchestrator.discard();
        self.file_info = None;
        self.display_name.clear();
        self.preview_override = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ClipboardError;
    use crate::config::{ImageHandling, ListMarker};
    use crate::pipeline::docx::tests::docx_with_body;
    use crate::pipeline::engine::{EngineError, EngineOptions, EngineOutput};
    use crate::store::{MemoryStore, SETTINGS_KEY, THEME_KEY};
    use crate::theme::FixedColorScheme;
    use crate::ui::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        statuses: Mutex<Vec<StatusMessage>>,
        loaders: Mutex<Vec<Option<Operation>>>,
        answer: bool,
    }

    impl Recorder {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(Vec::new()),
                loaders: Mutex::new(Vec::new()),
                answer,
            })
        }

        fn texts(&self) -> Vec<String> {
            self.statuses.lock().unwrap().iter().map(|s| s.text.clone()).collect()
        }
    }

    impl SessionObserver for Recorder {
        fn on_loader(&self, op: Option<Operation>) {
            self.loaders.lock().unwrap().push(op);
        }
        fn on_status(&self, status: &StatusMessage) {
            self.statuses.lock().unwrap().push(status.clone());
        }
        fn confirm(&self, _: Confirmation) -> bool {
            self.answer
        }
    }

    struct FakeClipboard {
        result: Result<(), ClipboardError>,
        calls: AtomicUsize,
    }

    impl FakeClipboard {
        fn new(result: Result<(), ClipboardError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Clipboard for FakeClipboard {
        fn set_text(&self, _: &str) -> Result<(), ClipboardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct FlakyEngine {
        calls: AtomicUsize,
    }

    impl ConversionEngine for FlakyEngine {
        fn convert(&self, bytes: &[u8], options: &EngineOptions) -> Result<EngineOutput, EngineError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::Other("unexpected end of stream".into()))
            } else {
                DocxEngine.convert(bytes, options)
            }
        }
    }

    struct SlowEngine;

    impl ConversionEngine for SlowEngine {
        fn convert(&self, bytes: &[u8], options: &EngineOptions) -> Result<EngineOutput, EngineError> {
            std::thread::sleep(Duration::from_millis(300));
            DocxEngine.convert(bytes, options)
        }
    }

    fn session_with(observer: Arc<Recorder>, store: Arc<MemoryStore>) -> Session {
        Session::builder()
            .config(SessionConfig::builder().ephemeral().build().unwrap())
            .store(store)
            .renderer(Arc::new(CmarkRenderer::plain()))
            .clipboard(FakeClipboard::new(Ok(())))
            .clipboard_fallback(None)
            .color_scheme(Box::new(FixedColorScheme(None)))
            .observer(observer)
            .build()
    }

    fn write_docx(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, docx_with_body(body)).unwrap();
        path
    }

    const LIST_BODY: &str = r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>item</w:t></w:r></w:p>"#;

    #[tokio::test]
    async fn open_file_converts_and_enables_actions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "Report.docx", r#"<w:p><w:r><w:t>Hello</w:t></w:r></w:p>"#);
        let rec = Recorder::new(false);
        let mut s = session_with(rec.clone(), Arc::new(MemoryStore::default()));

        let result = s.open_file(&path).await.unwrap();
        assert_eq!(result.markdown, "Hello\n");
        assert!(s.preview().is_rendered());
        assert!(s.file_info().unwrap().starts_with("Selected: Report.docx ("));
        assert_eq!(s.status().unwrap().text, "Conversion successful!");

        let c = s.controls();
        assert!(c.copy && c.download && c.clear && c.file_input);
        assert_eq!(
            *rec.loaders.lock().unwrap(),
            vec![Some(Operation::Reading), Some(Operation::Converting), None]
        );
    }

    #[tokio::test]
    async fn wrong_type_is_rejected_without_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_docx(dir.path(), "a.docx", r#"<w:p><w:r><w:t>A</w:t></w:r></w:p>"#);
        let bad = dir.path().join("notes.txt");
        std::fs::write(&bad, "hi").unwrap();

        let mut s = session_with(Recorder::new(false), Arc::new(MemoryStore::default()));
        s.open_file(&good).await.unwrap();
        let err = s.open_file(&bad).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::UnsupportedFileType { .. }));
        assert_eq!(s.markdown(), "A\n");
        assert!(s.has_source());
        let status = s.status().unwrap();
        assert!(status.text.starts_with("Error: Only .docx files are supported."));
        assert_eq!(status.severity, Severity::Error);
    }

    #[tokio::test]
    async fn too_large_rejected_before_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "big.docx", r#"<w:p><w:r><w:t>A</w:t></w:r></w:p>"#);
        let size = std::fs::metadata(&path).unwrap().len();
        let config = SessionConfig::builder()
            .note_file_size(size / 4)
            .warning_file_size(size / 3)
            .max_file_size(size / 2)
            .ephemeral()
            .build()
            .unwrap();
        let mut s = Session::builder()
            .config(config)
            .store(Arc::new(MemoryStore::default()))
            .color_scheme(Box::new(FixedColorScheme(None)))
            .build();
        let err = s.open_file(&path).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::FileTooLarge { .. }));
        assert!(!s.has_source());
        assert!(s.file_info().is_none());
        assert!(s.status().unwrap().text.contains("exceeds the maximum limit"));
    }

    #[tokio::test]
    async fn file_at_max_size_is_read_and_converted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "edge.docx", r#"<w:p><w:r><w:t>Edge</w:t></w:r></w:p>"#);
        let size = std::fs::metadata(&path).unwrap().len();
        let limits = |max: u64| {
            SessionConfig::builder()
                .note_file_size(max / 4)
                .warning_file_size(max / 2)
                .max_file_size(max)
                .ephemeral()
                .build()
                .unwrap()
        };
        let build = |config: SessionConfig| {
            Session::builder()
                .config(config)
                .store(Arc::new(MemoryStore::default()))
                .renderer(Arc::new(CmarkRenderer::plain()))
                .color_scheme(Box::new(FixedColorScheme(None)))
                .build()
        };

        let mut at_limit = build(limits(size));
        at_limit.open_file(&path).await.unwrap();
        assert!(at_limit.has_source());
        assert_eq!(at_limit.markdown(), "Edge\n");

        let mut below = build(limits(size - 1));
        let err = below.open_file(&path).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::FileTooLarge { .. }));
        assert!(!below.has_source());
    }

    #[tokio::test]
    async fn unreadable_path_clears_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_docx(dir.path(), "a.docx", r#"<w:p><w:r><w:t>A</w:t></w:r></w:p>"#);
        let mut s = session_with(Recorder::new(false), Arc::new(MemoryStore::default()));
        s.open_file(&good).await.unwrap();
        assert!(s.file_info().is_some());

        let err = s.open_file(dir.path().join("gone.docx")).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::FileNotFound { .. }));
        assert!(s.result().is_none());
        assert!(s.file_info().is_none());
        assert!(!s.has_source());
        let status = s.status().unwrap();
        assert!(status.text.starts_with("Error reading file:"));
        assert_eq!(status.severity, Severity::Error);
        let controls = s.controls();
        assert!(controls.file_input && !controls.copy && !controls.clear);
    }

    #[tokio::test]
    async fn dropped_open_future_leaves_session_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "slow.docx", r#"<w:p><w:r><w:t>Hello</w:t></w:r></w:p>"#);
        let rec = Recorder::new(false);
        let mut s = Session::builder()
            .config(SessionConfig::builder().ephemeral().build().unwrap())
            .store(Arc::new(MemoryStore::default()))
            .engine(Arc::new(SlowEngine))
            .renderer(Arc::new(CmarkRenderer::plain()))
            .clipboard(FakeClipboard::new(Ok(())))
            .clipboard_fallback(None)
            .color_scheme(Box::new(FixedColorScheme(None)))
            .observer(rec.clone())
            .build();

        let timed_out = tokio::time::timeout(Duration::from_millis(50), s.open_file(&path))
            .await
            .is_err();
        assert!(timed_out);
        assert_eq!(s.operation(), None);
        assert_eq!(rec.loaders.lock().unwrap().last(), Some(&None));
        let controls = s.controls();
        assert!(controls.file_input && controls.drop_zone && controls.settings);

        // The session accepts new work straight away.
        assert!(s.open_settings().is_ok());
        s.close_settings();
        s.open_file(&path).await.unwrap();
        assert_eq!(s.markdown(), "Hello\n");
        assert_eq!(s.operation(), None);
    }

    #[tokio::test]
    async fn large_file_preview_override_is_one_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "large.docx", r#"<w:p><w:r><w:t>L</w:t></w:r></w:p>"#);
        let size = std::fs::metadata(&path).unwrap().len();
        let config = SessionConfig::builder()
            .note_file_size(size / 4)
            .warning_file_size(size / 2)
            .max_file_size(size * 2)
            .ephemeral()
            .build()
            .unwrap();
        let rec = Recorder::new(true);
        let store = Arc::new(MemoryStore::default());
        let mut s = Session::builder()
            .config(config)
            .store(store.clone())
            .renderer(Arc::new(CmarkRenderer::plain()))
            .color_scheme(Box::new(FixedColorScheme(None)))
            .observer(rec.clone())
            .build();

        s.open_file(&path).await.unwrap();
        assert_eq!(s.preview(), PreviewState::Disabled);
        assert!(!s.settings().disable_preview);
        assert!(store.get(SETTINGS_KEY).unwrap().is_none());
        let texts = rec.texts();
        assert!(texts[0].starts_with("Warning: Processing a very large file"));
        assert_eq!(texts[1], "Preview temporarily disabled for this file.");

        // Clearing ends the override.
        s.clear_file_memory().unwrap();
        assert!(s.preview_enabled());
    }

    #[tokio::test]
    async fn transient_failure_offers_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "t.docx", r#"<w:p><w:r><w:t>Again</w:t></w:r></w:p>"#);
        let mut s = Session::builder()
            .engine(Arc::new(FlakyEngine {
                calls: AtomicUsize::new(0),
            }))
            .store(Arc::new(MemoryStore::default()))
            .renderer(Arc::new(CmarkRenderer::plain()))
            .color_scheme(Box::new(FixedColorScheme(None)))
            .build();

        let err = s.open_file(&path).await.unwrap_err();
        assert!(err.is_retryable());
        let status = s.status().unwrap().clone();
        assert!(status.retry);
        assert!(status.text.starts_with("Conversion failed: unexpected end of stream"));
        assert!(status.text.ends_with("Would you like to try again?"));
        assert!(s.has_source());
        assert!(s.controls().clear);
        assert!(!s.controls().copy);
        assert!(s.operation().is_none());

        let result = s.retry().await.unwrap();
        assert_eq!(result.markdown, "Again\n");
    }

    #[tokio::test]
    async fn terminal_failure_drops_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip at all").unwrap();
        let rec = Recorder::new(false);
        let mut s = session_with(rec.clone(), Arc::new(MemoryStore::default()));

        let err = s.open_file(&path).await.unwrap_err();
        assert!(matches!(err, Docx2MdError::ConversionTerminal { .. }));
        assert!(!s.has_source());
        assert!(!s.status().unwrap().retry);
        // File info survives a conversion failure.
        assert!(s.file_info().is_some());

        let err = s.retry().await.unwrap_err();
        assert!(matches!(err, Docx2MdError::NoSourceDocument));
        assert_eq!(s.status().unwrap().text, "Please select the file again to retry.");
    }

    #[tokio::test]
    async fn reconvert_without_source_warns() {
        let mut s = session_with(Recorder::new(false), Arc::new(MemoryStore::default()));
        let err = s.reconvert().await.unwrap_err();
        assert!(matches!(err, Docx2MdError::NoSourceDocument));
        let status = s.status().unwrap();
        assert_eq!(status.severity, Severity::Warning);
        assert_eq!(status.text, "No file data available to reconvert. Please upload again.");
    }

    #[tokio::test]
    async fn busy_session_rejects_new_work() {
        let mut s = session_with(Recorder::new(false), Arc::new(MemoryStore::default()));
        s.in_flight.set(Some(Operation::Converting));
        let err = s.open_file("whatever.docx").await.unwrap_err();
        assert!(matches!(err, Docx2MdError::Busy { .. }));
        assert!(s.copy().is_err());
        assert!(s.open_settings().is_err());
        assert_eq!(s.controls(), ControlState::default());
    }

    #[tokio::test]
    async fn settings_save_rederives_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "list.docx", LIST_BODY);
        let store = Arc::new(MemoryStore::default());
        let mut s = session_with(Recorder::new(false), store.clone());
        s.open_file(&path).await.unwrap();
        assert_eq!(s.markdown(), "- item\n");

        s.open_settings().unwrap();
        s.update_draft("listStyle", "*").unwrap();
        // The draft is not applied until saved.
        assert_eq!(s.settings().list_style, ListMarker::Dash);
        s.save_settings().await.unwrap();

        assert_eq!(s.markdown(), "* item\n");
        assert!(s.draft().is_none());
        assert!(store.get(SETTINGS_KEY).unwrap().unwrap().contains("\"listStyle\":\"*\""));
        assert_eq!(
            s.status().unwrap().text,
            "Preferences saved. Re-process the file for all changes to fully apply."
        );
    }

    #[tokio::test]
    async fn close_settings_discards_draft() {
        let mut s = session_with(Recorder::new(false), Arc::new(MemoryStore::default()));
        s.open_settings().unwrap();
        s.update_draft("imageHandling", "ignore").unwrap();
        s.close_settings();
        assert_eq!(s.settings().image_handling, ImageHandling::Base64);
        assert!(s.update_draft("listStyle", "+").is_err());
    }

    #[tokio::test]
    async fn reset_requires_confirmation() {
        let store = Arc::new(MemoryStore::with_entries([(SETTINGS_KEY, r#"{"listStyle":"+"}"#)]));
        let mut declined = session_with(Recorder::new(false), store.clone());
        assert!(!declined.reset_settings().await.unwrap());
        assert_eq!(declined.settings().list_style, ListMarker::Plus);

        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "list.docx", LIST_BODY);
        let rec = Recorder::new(true);
        let mut s = session_with(rec.clone(), store.clone());
        s.open_file(&path).await.unwrap();
        assert_eq!(s.markdown(), "+ item\n");

        assert!(s.reset_settings().await.unwrap());
        assert_eq!(s.settings(), ConversionSettings::default());
        assert_eq!(s.markdown(), "- item\n");
        assert!(store.get(SETTINGS_KEY).unwrap().is_none());
        let texts = rec.texts();
        assert!(texts.contains(&"Settings reset to default.".to_string()));
        assert_eq!(
            texts.last().unwrap(),
            "Settings reset. Re-process the file for changes to apply."
        );
    }

    #[tokio::test]
    async fn toggle_preview_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "p.docx", r#"<w:p><w:r><w:t>P</w:t></w:r></w:p>"#);
        let store = Arc::new(MemoryStore::default());
        let mut s = session_with(Recorder::new(false), store.clone());
        s.open_file(&path).await.unwrap();

        s.toggle_preview(false).await.unwrap();
        assert_eq!(s.preview(), PreviewState::Disabled);
        assert_eq!(s.markdown(), "P\n");
        assert!(store.get(SETTINGS_KEY).unwrap().is_none());

        s.toggle_preview(true).await.unwrap();
        assert!(s.preview().is_rendered());
        assert_eq!(s.markdown(), "P\n");
    }

    #[tokio::test]
    async fn copy_and_download_with_nothing_are_noops() {
        let clipboard = FakeClipboard::new(Ok(()));
        let mut s = Session::builder()
            .store(Arc::new(MemoryStore::default()))
            .clipboard(clipboard.clone())
            .clipboard_fallback(None)
            .color_scheme(Box::new(FixedColorScheme(None)))
            .build();

        assert_eq!(s.copy().unwrap(), None);
        assert_eq!(s.status().unwrap().text, "Nothing to copy!");
        assert_eq!(clipboard.calls.load(Ordering::SeqCst), 0);

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(s.download(dir.path()).unwrap(), None);
        assert_eq!(s.status().unwrap().text, "Nothing to download!");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn copy_uses_fallback_and_download_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "Notes.v2.docx", r#"<w:p><w:r><w:t>N</w:t></w:r></w:p>"#);
        let fallback = FakeClipboard::new(Ok(()));
        let mut s = Session::builder()
            .store(Arc::new(MemoryStore::default()))
            .renderer(Arc::new(CmarkRenderer::plain()))
            .clipboard(FakeClipboard::new(Err(ClipboardError::Failed("no display".into()))))
            .clipboard_fallback(Some(fallback.clone()))
            .color_scheme(Box::new(FixedColorScheme(None)))
            .build();
        s.open_file(&path).await.unwrap();

        assert_eq!(s.copy().unwrap(), Some(CopyOutcome::Fallback));
        assert_eq!(s.status().unwrap().text, "Markdown copied to clipboard! (using fallback)");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);

        let out = tempfile::tempdir().unwrap();
        let receipt = s.download(out.path()).unwrap().unwrap();
        assert_eq!(receipt.file_name, "Notes.v2.md");
        assert_eq!(std::fs::read_to_string(receipt.path).unwrap(), "N\n");
    }

    #[tokio::test]
    async fn clear_file_memory_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "c.docx", r#"<w:p><w:r><w:t>C</w:t></w:r></w:p>"#);
        let mut s = session_with(Recorder::new(false), Arc::new(MemoryStore::default()));
        assert!(!s.clear_file_memory().unwrap());

        s.open_file(&path).await.unwrap();
        assert!(s.clear_file_memory().unwrap());
        assert!(s.result().is_none());
        assert!(s.file_info().is_none());
        assert_eq!(s.preview(), PreviewState::Placeholder);
        assert_eq!(s.status().unwrap().text, "File cleared from memory.");
        let c = s.controls();
        assert!(!c.copy && !c.download && !c.clear);
    }

    #[tokio::test]
    async fn theme_toggle_persists_and_relabels() {
        let store = Arc::new(MemoryStore::default());
        let mut s = Session::builder()
            .store(store.clone())
            .color_scheme(Box::new(FixedColorScheme(Some(Theme::Dark))))
            .build();
        assert_eq!(s.theme(), Theme::Dark);
        assert_eq!(s.snapshot().theme_toggle_label, "Switch to Light Mode");

        assert_eq!(s.toggle_theme().await.unwrap(), Theme::Light);
        assert_eq!(store.get(THEME_KEY).unwrap().as_deref(), Some("light"));
        assert_eq!(s.snapshot().theme_toggle_label, "Switch to Dark Mode");
    }

    #[tokio::test]
    async fn broken_saved_settings_warn_on_start() {
        let store = Arc::new(MemoryStore::with_entries([(SETTINGS_KEY, "{not json")]));
        let s = session_with(Recorder::new(false), store);
        let status = s.status().unwrap();
        assert_eq!(status.severity, Severity::Warning);
        assert_eq!(status.text, "Could not parse saved preferences. Using defaults.");
        assert_eq!(s.settings(), ConversionSettings::default());
    }

    #[tokio::test]
    async fn preview_document_uses_theme_class() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_docx(dir.path(), "doc.docx", r#"<w:p><w:r><w:t>D</w:t></w:r></w:p>"#);
        let mut s = Session::builder()
            .store(Arc::new(MemoryStore::default()))
            .renderer(Arc::new(CmarkRenderer::plain()))
            .color_scheme(Box::new(FixedColorScheme(Some(Theme::Dark))))
            .build();
        assert!(s.preview_document().is_none());
        s.open_file(&path).await.unwrap();
        let page = s.preview_document().unwrap();
        assert!(page.contains("<title>doc</title>"));
        assert!(page.contains("class=\"dark-mode\""));
    }
}
