//! Observer trait for session state changes.
//!
//! Inject an [`Arc<dyn SessionObserver>`] via
//! [`crate::session::SessionBuilder::observer`] to follow the loader, the
//! status line and control enablement as the session runs, and to answer
//! the two confirmation prompts it can raise.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docx2md::{SessionObserver, StatusMessage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     messages: AtomicUsize,
//! }
//!
//! impl SessionObserver for CountingObserver {
//!     fn on_status(&self, status: &StatusMessage) {
//!         self.messages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{}] {}", status.severity, status.text);
//!     }
//! }
//!
//! let observer: Arc<dyn SessionObserver> = Arc::new(CountingObserver {
//!     messages: AtomicUsize::new(0),
//! });
//! ```

use crate::ui::{ControlState, Operation, StatusMessage};

/// A yes/no question the session needs answered before it proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Erase saved preferences and return to the defaults.
    ResetSettings,
    /// Skip the preview for a file above the warning threshold.
    DisableLargeFilePreview,
}

impl Confirmation {
    pub fn prompt(self) -> &'static str {
        match self {
            Confirmation::ResetSettings => {
                "Are you sure you want to reset all settings to their default values? Any saved preferences will be lost."
            }
            Confirmation::DisableLargeFilePreview => {
                "This file is very large. Would you like to temporarily disable the preview to save memory?"
            }
        }
    }

    /// Answer used when nobody is asked.
    pub fn default_answer(self) -> bool {
        match self {
            Confirmation::ResetSettings => true,
            Confirmation::DisableLargeFilePreview => false,
        }
    }
}

/// Called by the session whenever visible state changes.
///
/// All methods have default implementations so front ends only override
/// what they display.
pub trait SessionObserver: Send + Sync {
    /// The loader appeared (`Some`) or disappeared (`None`).
    fn on_loader(&self, operation: Option<Operation>) {
        let _ = operation;
    }

    /// A message was posted to the status line.
    fn on_status(&self, status: &StatusMessage) {
        let _ = status;
    }

    /// Control enablement was recomputed.
    fn on_controls(&self, controls: ControlState) {
        let _ = controls;
    }

    /// Ask the user; defaults to [`Confirmation::default_answer`].
    fn confirm(&self, question: Confirmation) -> bool {
        question.default_answer()
    }
}

/// An observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
