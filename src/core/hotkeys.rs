//! Global hotkey dispatch
//!
//! The host registers OS-level shortcuts and forwards each press as a `KeyEvent`.
//! `HotKeyDispatcher` maps the combination to an action, filters auto-repeat and
//! bounce, and runs the action against the `ActionGateway`.
//!
//! Combinations are written like `"Control+Shift+V"`. Modifier names are case-insensitive
//! and may appear in any order; exactly one non-modifier key is required.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::ActionGateway;
use crate::shared::errors::{EngineError, EngineResult};
use crate::shared::settings::HotkeySettings;
use crate::shared::types::{ClipRecord, PasteableContent, SnippetRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotKeyAction {
    ShowHistory,
    PasteLast,
    ClearHistory,
    ShowSnippetEditor,
    ShowSnippets,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HotkeyParseError {
    #[error("empty key combination")]
    Empty,

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("combination has no key, only modifiers")]
    MissingKey,

    #[error("combination has more than one key: '{0}' and '{1}'")]
    MultipleKeys(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers {
    pub control: bool,
    pub alt: bool,
    pub shift: bool,
    pub command: bool,
}

/// A parsed key combination, compared independently of how it was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    modifiers: Modifiers,
    /// Canonical key name, e.g. "V", "F5", "Space"
    key: String,
}

impl KeyCombo {
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Canonical name for a non-modifier key
fn parse_key(name: &str) -> Option<String> {
    let upper = name.to_uppercase();
    let named = match upper.as_str() {
        "RETURN" | "ENTER" => "Enter",
        "ESCAPE" | "ESC" => "Escape",
        "SPACE" => "Space",
        "TAB" => "Tab",
        "BACKSPACE" => "Backspace",
        "DELETE" | "DEL" => "Delete",
        "UP" => "Up",
        "DOWN" => "Down",
        "LEFT" => "Left",
        "RIGHT" => "Right",
        s if s.chars().count() == 1 => {
            let ch = s.chars().next()?;
            return ch.is_ascii_alphanumeric().then(|| ch.to_string());
        }
        s if s.starts_with('F') && s.len() <= 3 => {
            let num: u32 = s[1..].parse().ok()?;
            return (1..=12).contains(&num).then(|| format!("F{}", num));
        }
        _ => return None,
    };
    Some(named.to_string())
}

impl FromStr for KeyCombo {
    type Err = HotkeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(HotkeyParseError::Empty);
        }

        let mut modifiers = Modifiers::default();
        let mut key: Option<String> = None;
        for token in s.split('+').map(str::trim) {
            if token.is_empty() {
                return Err(HotkeyParseError::Empty);
            }
            match token.to_lowercase().as_str() {
                "control" | "ctrl" => modifiers.control = true,
                "alt" | "option" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "command" | "cmd" | "super" | "meta" => modifiers.command = true,
                _ => {
                    let parsed = parse_key(token)
                        .ok_or_else(|| HotkeyParseError::UnknownKey(token.to_string()))?;
                    if let Some(existing) = key.take() {
                        return Err(HotkeyParseError::MultipleKeys(existing, parsed));
                    }
                    key = Some(parsed);
                }
            }
        }

        let key = key.ok_or(HotkeyParseError::MissingKey)?;
        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (on, name) in [
            (m.control, "Control"),
            (m.alt, "Alt"),
            (m.shift, "Shift"),
            (m.command, "Command"),
        ] {
            if on {
                write!(f, "{}+", name)?;
            }
        }
        f.write_str(&self.key)
    }
}

/// One press of a registered shortcut, as reported by the host.
#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub combo: KeyCombo,
    pub at: Instant,
    /// Set by the OS for auto-repeat while the keys are held
    pub is_repeat: bool,
}

impl KeyEvent {
    pub fn pressed(combo: KeyCombo) -> Self {
        Self {
            combo,
            at: Instant::now(),
            is_repeat: false,
        }
    }
}

/// What the UI collaborator should do after an action ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ActionOutcome {
    HistoryMenu(Vec<ClipRecord>),
    SnippetMenu(Vec<SnippetRecord>),
    Paste(PasteableContent),
    /// Nothing to paste
    Nothing,
    /// Ask the user, then call `ActionGateway::request_clear_history(true)`
    ConfirmClearHistory,
    Cleared { removed: usize },
    OpenSnippetEditor,
}

pub struct HotKeyDispatcher {
    gateway: Arc<ActionGateway>,
    bindings: RwLock<HashMap<KeyCombo, HotKeyAction>>,
    last_press: Mutex<HashMap<KeyCombo, Instant>>,
    debounce: Duration,
    confirm_before_clear: bool,
}

impl HotKeyDispatcher {
    pub fn new(gateway: Arc<ActionGateway>, debounce: Duration, confirm_before_clear: bool) -> Self {
        Self {
            gateway,
            bindings: RwLock::new(HashMap::new()),
            last_press: Mutex::new(HashMap::new()),
            debounce,
            confirm_before_clear,
        }
    }

    /// Dispatcher with every binding from the settings registered.
    pub fn from_settings(gateway: Arc<ActionGateway>, settings: &HotkeySettings) -> EngineResult<Self> {
        let dispatcher = Self::new(
            gateway,
            Duration::from_millis(settings.debounce_ms),
            settings.confirm_before_clear,
        );
        for (action, combo) in &settings.bindings {
            let combo: KeyCombo = combo.parse().map_err(|e| {
                EngineError::ConfigurationError(format!("hotkey for {:?}: {}", action, e))
            })?;
            dispatcher.register(combo, *action);
        }
        Ok(dispatcher)
    }

    /// Bind `combo` to `action`, replacing whatever the combination or the action was bound to.
    /// Returns the action previously bound to `combo`.
    pub fn register(&self, combo: KeyCombo, action: HotKeyAction) -> Option<HotKeyAction> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.retain(|existing, bound| *bound != action || *existing == combo);
        info!("[Hotkeys] {} -> {:?}", combo, action);
        bindings.insert(combo, action)
    }

    /// Remove the binding for `combo`. Unbound combinations are ignored.
    pub fn unregister(&self, combo: &KeyCombo) -> Option<HotKeyAction> {
        let removed = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(combo);
        if removed.is_some() {
            info!("[Hotkeys] Unregistered {}", combo);
        }
        self.last_press
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(combo);
        removed
    }

    pub fn action_for(&self, combo: &KeyCombo) -> Option<HotKeyAction> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(combo)
            .copied()
    }

    pub fn bindings(&self) -> Vec<(KeyCombo, HotKeyAction)> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(combo, action)| (combo.clone(), *action))
            .collect()
    }

    /// Run the action bound to the event's combination.
    ///
    /// Returns `None` for repeats, bounces and unbound combinations.
    pub fn handle(&self, event: KeyEvent) -> EngineResult<Option<ActionOutcome>> {
        if event.is_repeat {
            return Ok(None);
        }
        let Some(action) = self.action_for(&event.combo) else {
            return Ok(None);
        };

        {
            let mut last_press = self.last_press.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = last_press.insert(event.combo.clone(), event.at);
            if let Some(previous) = previous {
                if event.at.saturating_duration_since(previous) < self.debounce {
                    debug!("[Hotkeys] Ignoring bounce on {}", event.combo);
                    return Ok(None);
                }
            }
        }

        debug!("[Hotkeys] {} triggered {:?}", event.combo, action);
        self.dispatch(action).map(Some)
    }

    pub fn dispatch(&self, action: HotKeyAction) -> EngineResult<ActionOutcome> {
        match action {
            HotKeyAction::ShowHistory => Ok(ActionOutcome::HistoryMenu(
                self.gateway.history(usize::MAX, 0),
            )),
            HotKeyAction::PasteLast => match self.gateway.resolve_latest() {
                Ok(content) => Ok(ActionOutcome::Paste(content)),
                Err(EngineError::NotFound(_)) => Ok(ActionOutcome::Nothing),
                Err(e) => Err(e),
            },
            HotKeyAction::ClearHistory => {
                if self.confirm_before_clear {
                    Ok(ActionOutcome::ConfirmClearHistory)
                } else {
                    let removed = self.gateway.request_clear_history(true)?;
                    Ok(ActionOutcome::Cleared { removed })
                }
            }
            HotKeyAction::ShowSnippetEditor => Ok(ActionOutcome::OpenSnippetEditor),
            HotKeyAction::ShowSnippets => Ok(ActionOutcome::SnippetMenu(
                self.gateway.snippets(usize::MAX, 0),
            )),
        }
    }
}
