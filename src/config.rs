//! Configuration types: user-facing conversion settings and session knobs.
//!
//! Two kinds of configuration live here:
//!
//! * [`ConversionSettings`]: the five user preferences that shape the
//!   Markdown (image handling, list marker, line breaks, underline, preview).
//!   They are persisted as a camelCase JSON object and merged over defaults
//!   key by key on load, see [`crate::settings`].
//!
//! * [`SessionConfig`]: operational limits (size thresholds, engine timeout,
//!   where preferences are stored). Built via [`SessionConfigBuilder`], which
//!   validates the thresholds.

use crate::error::Docx2MdError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

// ── Conversion settings ──────────────────────────────────────────────────

/// User preferences controlling conversion, post-processing and preview.
///
/// Exactly one instance is active per session. Every field always holds a
/// valid value; loading never produces a partially filled struct.
///
/// # Example
/// ```rust
/// use edgequake_docx2md::{ConversionSettings, LineBreak, ListMarker};
///
/// let settings = ConversionSettings {
///     list_style: ListMarker::Asterisk,
///     line_break: LineBreak::Br,
///     ..Default::default()
/// };
/// assert_eq!(settings.list_style.as_char(), '*');
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSettings {
    /// Embed pictures as base64 data URIs, or drop them.
    pub image_handling: ImageHandling,
    /// Bullet character used for unordered lists.
    pub list_style: ListMarker,
    /// How `<br>` tags in the engine output are rendered.
    pub line_break: LineBreak,
    /// What underlined runs become in Markdown.
    pub underline_handling: UnderlineHandling,
    /// Skip HTML rendering entirely.
    pub disable_preview: bool,
}

impl ConversionSettings {
    /// JSON keys of every recognised setting, in declaration order.
    pub const KEYS: [&'static str; 5] = [
        "imageHandling",
        "listStyle",
        "lineBreak",
        "underlineHandling",
        "disablePreview",
    ];

    /// Set one setting from its JSON key and textual value.
    ///
    /// Accepts the same spellings as the persisted form (`"ignore"`, `"*"`,
    /// `"true"` …). Used by the CLI `set` command and `--set key=value`.
    pub fn set_from_str(&mut self, key: &str, value: &str) -> Result<(), Docx2MdError> {
        let bad = |expected: &str| {
            Docx2MdError::InvalidSettings(format!(
                "'{value}' is not a valid value for {key} (expected {expected})"
            ))
        };
        match key {
            "imageHandling" => {
                self.image_handling = value.parse().map_err(|_| bad("base64|ignore"))?;
            }
            "listStyle" => {
                self.list_style = value.parse().map_err(|_| bad("-|*|+"))?;
            }
            "lineBreak" => {
                self.line_break = value.parse().map_err(|_| bad("space|br"))?;
            }
            "underlineHandling" => {
                self.underline_handling = value.parse().map_err(|_| bad("ignore|u|italic"))?;
            }
            "disablePreview" => {
                self.disable_preview = match value.trim().to_ascii_lowercase().as_str() {
                    "true" | "on" | "yes" | "1" => true,
                    "false" | "off" | "no" | "0" => false,
                    _ => return Err(bad("true|false")),
                };
            }
            other => {
                return Err(Docx2MdError::InvalidSettings(format!(
                    "unknown setting '{other}' (known: {})",
                    Self::KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConversionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "imageHandling      {}", self.image_handling)?;
        writeln!(f, "listStyle          {}", self.list_style)?;
        writeln!(f, "lineBreak          {}", self.line_break)?;
        writeln!(f, "underlineHandling  {}", self.underline_handling)?;
        write!(f, "disablePreview     {}", self.disable_preview)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What happens to pictures embedded in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageHandling {
    /// Inline each picture as a `data:` URI. (default)
    #[default]
    Base64,
    /// Drop pictures from the output.
    Ignore,
}

/// Bullet character for unordered list items.
///
/// Only the three CommonMark bullet markers are representable, so a
/// persisted value like `"•"` can never reach the post-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ListMarker {
    /// `-` (default, also what the engine emits)
    #[default]
    Dash,
    /// `*`
    Asterisk,
    /// `+`
    Plus,
}

impl ListMarker {
    pub fn as_char(self) -> char {
        match self {
            ListMarker::Dash => '-',
            ListMarker::Asterisk => '*',
            ListMarker::Plus => '+',
        }
    }
}

impl TryFrom<String> for ListMarker {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListMarker> for String {
    fn from(marker: ListMarker) -> Self {
        marker.as_char().to_string()
    }
}

/// Rendering of hard line breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineBreak {
    /// Two trailing spaces and a newline, the Markdown hard-break idiom. (default)
    #[default]
    Space,
    /// Keep literal `<br>` tags.
    Br,
}

/// Treatment of underlined text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderlineHandling {
    /// Drop the underline, keep the text. (default)
    #[default]
    Ignore,
    /// Keep it as an HTML `<u>` element.
    U,
    /// Map it to emphasis.
    Italic,
}

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => $text,)+
                };
                f.write_str(s)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unrecognised value '{other}'")),
                }
            }
        }
    };
}

text_enum!(ImageHandling { Base64 => "base64", Ignore => "ignore" });
text_enum!(ListMarker { Dash => "-", Asterisk => "*", Plus => "+" });
text_enum!(LineBreak { Space => "space", Br => "br" });
text_enum!(UnderlineHandling { Ignore => "ignore", U => "u", Italic => "italic" });

// ── Size limits ──────────────────────────────────────────────────────────

/// File-size thresholds applied by intake before anything is read.
///
/// | Threshold | Default | Effect when exceeded |
/// |-----------|---------|----------------------|
/// | `note`    | 10 MiB  | informational status |
/// | `warning` | 25 MiB  | warning + offer to skip the preview for this file |
/// | `max`     | 50 MiB  | rejected, nothing read |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub note: u64,
    pub warning: u64,
    pub max: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            note: 10 * MIB,
            warning: 25 * MIB,
            max: 50 * MIB,
        }
    }
}

impl SizeLimits {
    /// Limits capped at `max` bytes. The note and warning thresholds keep
    /// their defaults when they fit below `max`, otherwise they are scaled
    /// down to half of the next threshold.
    pub fn with_max(max: u64) -> Self {
        let defaults = Self::default();
        let warning = defaults.warning.min(max / 2);
        Self {
            note: defaults.note.min(warning / 2),
            warning,
            max,
        }
    }
}

// ── Session configuration ────────────────────────────────────────────────

/// Where preferences are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageLocation {
    /// `<user config dir>/edgequake-docx2md`. (default)
    #[default]
    UserConfigDir,
    /// A specific directory.
    Directory(PathBuf),
    /// Keep everything in memory; nothing survives the process.
    Ephemeral,
}

/// Operational configuration for a [`crate::session::Session`].
///
/// Built via [`SessionConfig::builder()`] or [`SessionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docx2md::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .max_file_size(80 * 1024 * 1024)
///     .engine_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.engine_timeout.as_secs(), 30);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Intake size thresholds.
    pub limits: SizeLimits,

    /// Upper bound for one engine call. Default: 60 s.
    ///
    /// A call that exceeds it is reported as a transient failure and the
    /// cached buffer is kept so the user can retry.
    pub engine_timeout: Duration,

    /// Where settings and theme are stored.
    pub storage: StorageLocation,

    /// How long success/info messages stay on the status line by default.
    pub status_hide_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limits: SizeLimits::default(),
            engine_timeout: Duration::from_secs(60),
            storage: StorageLocation::default(),
            status_hide_after: Duration::from_millis(3000),
        }
    }
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn limits(mut self, limits: SizeLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn note_file_size(mut self, bytes: u64) -> Self {
        self.config.limits.note = bytes;
        self
    }

    pub fn warning_file_size(mut self, bytes: u64) -> Self {
        self.config.limits.warning = bytes;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.limits.max = bytes;
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout = Duration::from_secs(secs);
        self
    }

    pub fn engine_timeout(mut self, timeout: Duration) -> Self {
        self.config.engine_timeout = timeout;
        self
    }

    pub fn storage(mut self, storage: StorageLocation) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage = StorageLocation::Directory(dir.into());
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.config.storage = StorageLocation::Ephemeral;
        self
    }

    pub fn status_hide_after(mut self, after: Duration) -> Self {
        self.config.status_hide_after = after;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SessionConfig, Docx2MdError> {
        let l = &self.config.limits;
        if l.max == 0 {
            return Err(Docx2MdError::InvalidConfig(
                "maximum file size must be > 0".into(),
            ));
        }
        if !(l.note < l.warning && l.warning < l.max) {
            return Err(Docx2MdError::InvalidConfig(format!(
                "size thresholds must satisfy note < warning < max, got {} / {} / {}",
                l.note, l.warning, l.max
            )));
        }
        if self.config.engine_timeout < Duration::from_secs(1) {
            return Err(Docx2MdError::InvalidConfig(format!(
                "engine timeout must be at least 1s, got {:?}",
                self.config.engine_timeout
            )));
        }
        Ok(self.config)
    }
}
