//! Light/dark theme resolution and persistence.
//!
//! Resolution order on startup:
//!
//! 1. the persisted `theme` entry, when it reads `"light"` or `"dark"`;
//! 2. the desktop colour scheme reported by a [`ColorSchemeProbe`];
//! 3. light.
//!
//! The applied theme drives the preview's highlighting palette and the
//! `dark-mode` class of exported preview pages.

use crate::error::Recoverable;
use crate::store::{KeyValueStore, THEME_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Syntect theme used for the light palette.
pub const LIGHT_SYNTAX_THEME: &str = "InspiredGitHub";
/// Syntect theme used for the dark palette.
pub const DARK_SYNTAX_THEME: &str = "base16-ocean.dark";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    /// Parse a persisted value. Anything but the two names is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Highlighting palette for code blocks in the preview.
    pub fn syntax_theme(self) -> &'static str {
        match self {
            Theme::Light => LIGHT_SYNTAX_THEME,
            Theme::Dark => DARK_SYNTAX_THEME,
        }
    }

    /// Label of the control that switches away from this theme.
    pub fn toggle_label(self) -> &'static str {
        match self {
            Theme::Light => "Switch to Dark Mode",
            Theme::Dark => "Switch to Light Mode",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reports the desktop's colour scheme preference, if it has one.
pub trait ColorSchemeProbe: Send + Sync {
    fn preferred(&self) -> Option<Theme>;
}

/// Asks the OS through `dark-light`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemColorScheme;

impl ColorSchemeProbe for SystemColorScheme {
    fn preferred(&self) -> Option<Theme> {
        match dark_light::detect() {
            Ok(dark_light::Mode::Dark) => Some(Theme::Dark),
            Ok(dark_light::Mode::Light) => Some(Theme::Light),
            Ok(_) => None,
            Err(e) => {
                debug!("Colour scheme detection failed: {}", e);
                None
            }
        }
    }
}

/// A probe that always answers the same thing. Handy for headless runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedColorScheme(pub Option<Theme>);

impl ColorSchemeProbe for FixedColorScheme {
    fn preferred(&self) -> Option<Theme> {
        self.0
    }
}

/// Owns the applied theme.
pub struct ThemeController {
    store: Arc<dyn KeyValueStore>,
    probe: Box<dyn ColorSchemeProbe>,
    current: Theme,
}

impl ThemeController {
    /// Create a controller and apply the preferred theme without persisting it.
    pub fn new(store: Arc<dyn KeyValueStore>, probe: Box<dyn ColorSchemeProbe>) -> Self {
        let mut this = Self {
            store,
            probe,
            current: Theme::Light,
        };
        this.current = this.resolve_preferred_theme();
        this
    }

    pub fn current(&self) -> Theme {
        self.current
    }

    /// Persisted choice, else the desktop preference, else light.
    pub fn resolve_preferred_theme(&self) -> Theme {
        match self.store.get(THEME_KEY) {
            Ok(Some(saved)) => {
                if let Some(theme) = Theme::parse(&saved) {
                    debug!("Using saved theme: {}", theme);
                    return theme;
                }
                warn!("Ignoring unrecognised saved theme '{}'", saved.trim());
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read saved theme: {}", e),
        }
        self.probe.preferred().unwrap_or_default()
    }

    /// Make `theme` active and persist it.
    ///
    /// The theme changes even when the write fails; the failure comes back
    /// as a warning.
    pub fn apply(&mut self, theme: Theme) -> Recoverable<Theme> {
        self.current = theme;
        match self.store.set(THEME_KEY, theme.as_str()) {
            Ok(()) => {
                info!("Applied {} theme", theme);
                Recoverable::clean(theme)
            }
            Err(e) => {
                warn!("Could not save theme preference: {}", e);
                Recoverable::with_warnings(theme, vec![e])
            }
        }
    }

    /// Flip between light and dark.
    pub fn toggle(&mut self) -> Recoverable<Theme> {
        self.apply(self.current.flipped())
    }

    pub fn syntax_theme(&self) -> &'static str {
        self.current.syntax_theme()
    }

    pub fn toggle_label(&self) -> &'static str {
        self.current.toggle_label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Docx2MdError;
    use crate::store::MemoryStore;

    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, Docx2MdError> {
            self.0.get(key)
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), Docx2MdError> {
            Err(Docx2MdError::StorageWrite {
                key: key.into(),
                detail: "read-only".into(),
            })
        }
        fn remove(&self, key: &str) -> Result<(), Docx2MdError> {
            self.set(key, "")
        }
    }

    fn controller(saved: Option<&str>, ambient: Option<Theme>) -> ThemeController {
        let store = match saved {
            Some(v) => MemoryStore::with_entries([(THEME_KEY, v)]),
            None => MemoryStore::default(),
        };
        ThemeController::new(Arc::new(store), Box::new(FixedColorScheme(ambient)))
    }

    #[test]
    fn saved_theme_wins_over_ambient() {
        assert_eq!(controller(Some("light"), Some(Theme::Dark)).current(), Theme::Light);
        assert_eq!(controller(Some("dark"), Some(Theme::Light)).current(), Theme::Dark);
    }

    #[test]
    fn ambient_then_light_fallback() {
        assert_eq!(controller(None, Some(Theme::Dark)).current(), Theme::Dark);
        assert_eq!(controller(None, None).current(), Theme::Light);
        assert_eq!(controller(Some("sepia"), Some(Theme::Dark)).current(), Theme::Dark);
        assert_eq!(controller(Some("sepia"), None).current(), Theme::Light);
    }

    #[test]
    fn toggle_persists_and_flips_label() {
        let store = Arc::new(MemoryStore::default());
        let mut c = ThemeController::new(store.clone(), Box::new(FixedColorScheme(None)));
        assert_eq!(c.toggle_label(), "Switch to Dark Mode");
        assert_eq!(c.syntax_theme(), LIGHT_SYNTAX_THEME);

        let r = c.toggle();
        assert!(r.is_clean());
        assert_eq!(c.current(), Theme::Dark);
        assert_eq!(c.toggle_label(), "Switch to Light Mode");
        assert_eq!(c.syntax_theme(), DARK_SYNTAX_THEME);
        assert_eq!(store.get(THEME_KEY).unwrap().as_deref(), Some("dark"));

        c.toggle();
        assert_eq!(store.get(THEME_KEY).unwrap().as_deref(), Some("light"));
    }

    #[test]
    fn failed_persist_still_applies() {
        let store = ReadOnlyStore(MemoryStore::default());
        let mut c = ThemeController::new(Arc::new(store), Box::new(FixedColorScheme(None)));
        let r = c.apply(Theme::Dark);
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(c.current(), Theme::Dark);
    }
}
