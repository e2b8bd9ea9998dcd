//! UI state: loader, status line and control enablement.
//!
//! Everything here is derived from what the session holds. The only piece of
//! state with a life of its own is the status line's pending auto-hide.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

// ── Loader ───────────────────────────────────────────────────────────────

/// The operation currently in flight. The loader is visible exactly while
/// one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Reading,
    Converting,
    Reconverting,
}

impl Operation {
    /// Loader message.
    pub fn message(self) -> &'static str {
        match self {
            Operation::Reading => "Reading file...",
            Operation::Converting => "Converting to Markdown...",
            Operation::Reconverting => "Re-converting...",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ── Status line ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on the status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
    /// A retry action is offered alongside the message.
    pub retry: bool,
    /// Hide automatically after this long; `None` keeps it until replaced.
    #[serde(skip)]
    pub hide_after: Option<Duration>,
}

impl StatusMessage {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
            retry: false,
            hide_after: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Info)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Success)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Warning)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Error)
    }

    /// Auto-hide after `ms` milliseconds.
    pub fn hide_after_ms(mut self, ms: u64) -> Self {
        self.hide_after = Some(Duration::from_millis(ms));
        self
    }

    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }
}

/// The status line with its single pending auto-hide.
///
/// Posting a message replaces the previous one and its deadline; deadlines
/// never stack.
#[derive(Debug, Default, Clone)]
pub struct StatusLine {
    current: Option<(StatusMessage, Option<Instant>)>,
}

impl StatusLine {
    pub fn show(&mut self, message: StatusMessage, now: Instant) {
        let deadline = message.hide_after.map(|d| now + d);
        self.current = Some((message, deadline));
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// The message still visible at `now`.
    pub fn visible(&self, now: Instant) -> Option<&StatusMessage> {
        match &self.current {
            Some((msg, None)) => Some(msg),
            Some((msg, Some(deadline))) if now < *deadline => Some(msg),
            _ => None,
        }
    }

    /// The last posted message, hidden or not.
    pub fn last(&self) -> Option<&StatusMessage> {
        self.current.as_ref().map(|(m, _)| m)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().and_then(|(_, d)| *d)
    }
}

// ── Controls ─────────────────────────────────────────────────────────────

/// Enablement of every interactive control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub file_input: bool,
    pub drop_zone: bool,
    pub settings: bool,
    pub copy: bool,
    pub download: bool,
    pub clear: bool,
}

impl ControlState {
    /// Derived from the in-flight flag, the cached source and the result.
    pub fn derive(in_flight: bool, has_source: bool, has_result: bool) -> Self {
        let idle = !in_flight;
        Self {
            file_input: idle,
            drop_zone: idle,
            settings: idle,
            copy: idle && has_result,
            download: idle && has_result,
            clear: idle && has_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_messages() {
        assert_eq!(Operation::Reading.message(), "Reading file...");
        assert_eq!(Operation::Converting.to_string(), "Converting to Markdown...");
        assert_eq!(Operation::Reconverting.message(), "Re-converting...");
    }

    #[test]
    fn status_auto_hides_at_deadline() {
        let t0 = Instant::now();
        let mut line = StatusLine::default();
        line.show(StatusMessage::success("done").hide_after_ms(3000), t0);
        assert!(line.visible(t0 + Duration::from_millis(2999)).is_some());
        assert!(line.visible(t0 + Duration::from_millis(3000)).is_none());
        assert_eq!(line.last().unwrap().text, "done");
    }

    #[test]
    fn new_message_replaces_pending_hide() {
        let t0 = Instant::now();
        let mut line = StatusLine::default();
        line.show(StatusMessage::info("first").hide_after_ms(1000), t0);
        line.show(StatusMessage::error("sticky"), t0 + Duration::from_millis(500));

        // The first deadline no longer applies.
        let later = t0 + Duration::from_secs(60);
        let msg = line.visible(later).unwrap();
        assert_eq!(msg.text, "sticky");
        assert_eq!(msg.severity, Severity::Error);
        assert!(line.deadline().is_none());
    }

    #[test]
    fn replacement_restarts_the_timer() {
        let t0 = Instant::now();
        let mut line = StatusLine::default();
        line.show(StatusMessage::info("a").hide_after_ms(1000), t0);
        let t1 = t0 + Duration::from_millis(900);
        line.show(StatusMessage::info("b").hide_after_ms(1000), t1);
        assert!(line.visible(t0 + Duration::from_millis(1500)).is_some());
        assert!(line.visible(t1 + Duration::from_millis(1000)).is_none());
    }

    #[test]
    fn controls_follow_state() {
        let busy = ControlState::derive(true, true, true);
        assert_eq!(busy, ControlState::default());

        let empty = ControlState::derive(false, false, false);
        assert!(empty.file_input && empty.drop_zone && empty.settings);
        assert!(!empty.copy && !empty.download && !empty.clear);

        // A transient failure keeps the buffer but not the result.
        let after_failure = ControlState::derive(false, true, false);
        assert!(after_failure.clear);
        assert!(!after_failure.copy);

        let done = ControlState::derive(false, true, true);
        assert!(done.copy && done.download && done.clear);
    }

    #[test]
    fn retry_flag_and_severity_labels() {
        let m = StatusMessage::error("x").with_retry();
        assert!(m.retry);
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}
