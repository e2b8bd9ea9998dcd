//! Settings store: load, merge over defaults, save, reset.
//!
//! Persisted preferences are a JSON object keyed by the camelCase names in
//! [`ConversionSettings::KEYS`]. Loading is forgiving at two levels:
//!
//! 1. Storage unreadable or JSON unparseable → the whole load falls back to
//!    [`ConversionSettings::default()`] and reports a warning.
//! 2. A recognised key with a value of the wrong shape → only that key falls
//!    back to its default, with a warning naming it.
//!
//! Unknown keys are ignored, missing keys take their default. The in-memory
//! value is therefore always fully populated, whatever the store contains.

use crate::config::ConversionSettings;
use crate::error::{Docx2MdError, Recoverable};
use crate::store::{KeyValueStore, SETTINGS_KEY};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owner of the active [`ConversionSettings`].
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    current: ConversionSettings,
}

impl SettingsStore {
    /// Create a store and immediately load persisted preferences.
    ///
    /// Load warnings are returned alongside so the caller can put them on
    /// the status line.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Recoverable<Self> {
        let mut this = Self {
            store,
            current: ConversionSettings::default(),
        };
        let loaded = this.load();
        Recoverable::with_warnings(this, loaded.warnings)
    }

    /// The active settings.
    pub fn current(&self) -> ConversionSettings {
        self.current
    }

    /// Replace the active settings for this session only (not persisted).
    pub fn set_transient(&mut self, settings: ConversionSettings) {
        self.current = settings;
    }

    /// Read persisted preferences and merge them over the defaults.
    pub fn load(&mut self) -> Recoverable<ConversionSettings> {
        let raw = match self.store.get(SETTINGS_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Error reading settings from storage: {}", e);
                self.current = ConversionSettings::default();
                return Recoverable::with_warnings(self.current, vec![e]);
            }
        };

        let merged = match raw {
            None => Recoverable::clean(ConversionSettings::default()),
            Some(text) => merge_json(&text),
        };
        self.current = merged.value;
        debug!("Loaded and merged settings: {:?}", self.current);
        merged
    }

    /// Persist `settings` and make them active.
    ///
    /// The in-memory value is updated even if writing fails, so the user's
    /// choice applies for the rest of the session.
    pub fn save(&mut self, settings: ConversionSettings) -> Recoverable<()> {
        self.current = settings;
        let json = match serde_json::to_string(&settings) {
            Ok(json) => json,
            Err(e) => {
                return Recoverable::with_warnings(
                    (),
                    vec![Docx2MdError::Internal(format!("serialise settings: {e}"))],
                )
            }
        };
        match self.store.set(SETTINGS_KEY, &json) {
            Ok(()) => {
                info!("Saved settings: {}", json);
                Recoverable::clean(())
            }
            Err(e) => {
                warn!("Could not save preferences: {}", e);
                Recoverable::with_warnings((), vec![e])
            }
        }
    }

    /// Erase persisted preferences and return to the defaults.
    pub fn reset_to_default(&mut self) -> Recoverable<()> {
        self.current = ConversionSettings::default();
        match self.store.remove(SETTINGS_KEY) {
            Ok(()) => {
                info!("Settings reset to default");
                Recoverable::clean(())
            }
            Err(e) => {
                warn!("Could not erase saved preferences: {}", e);
                Recoverable::with_warnings((), vec![e])
            }
        }
    }
}

/// Merge a persisted JSON document over the defaults.
pub fn merge_json(text: &str) -> Recoverable<ConversionSettings> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => merge_object(&map),
        Ok(other) => {
            warn!("Saved settings are not a JSON object: {}", other);
            Recoverable::with_warnings(
                ConversionSettings::default(),
                vec![Docx2MdError::InvalidSettings(
                    "saved preferences are not an object; using defaults".into(),
                )],
            )
        }
        Err(e) => {
            warn!("Error parsing saved settings JSON: {}", e);
            Recoverable::with_warnings(
                ConversionSettings::default(),
                vec![Docx2MdError::InvalidSettings(format!(
                    "could not parse saved preferences ({e}); using defaults"
                ))],
            )
        }
    }
}

/// Merge a JSON object over the defaults, key by key.
pub fn merge_object(map: &Map<String, Value>) -> Recoverable<ConversionSettings> {
    let mut s = ConversionSettings::default();
    let mut warnings = Vec::new();

    take(map, "imageHandling", &mut s.image_handling, &mut warnings);
    take(map, "listStyle", &mut s.list_style, &mut warnings);
    take(map, "lineBreak", &mut s.line_break, &mut warnings);
    take(map, "underlineHandling", &mut s.underline_handling, &mut warnings);
    take(map, "disablePreview", &mut s.disable_preview, &mut warnings);

    Recoverable::with_warnings(s, warnings)
}

fn take<T: DeserializeOwned>(
    map: &Map<String, Value>,
    key: &str,
    slot: &mut T,
    warnings: &mut Vec<Docx2MdError>,
) {
    let Some(v) = map.get(key) else {
        return;
    };
    match serde_json::from_value::<T>(v.clone()) {
        Ok(value) => *slot = value,
        Err(e) => {
            warn!("Ignoring saved value for {}: {} ({})", key, v, e);
            warnings.push(Docx2MdError::InvalidSettings(format!(
                "{key} = {v} is not valid; using the default"
            )));
        }
    }
}
