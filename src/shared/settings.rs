use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::core::clipboard::classifier::{StoreTypes, WhitespacePolicy};
use crate::core::hotkeys::{HotKeyAction, KeyCombo};
use crate::shared::errors::{EngineError, EngineResult};

const MAX_CAPACITY: usize = 10_000;
const MIN_POLL_INTERVAL_MS: u64 = 50;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineSettings {
    pub history: HistorySettings,
    pub capture: CaptureSettings,
    pub hotkeys: HotkeySettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Maximum number of non-pinned records
    pub capacity: usize,
    /// Drop non-pinned records older than this many days
    pub max_age_days: Option<u32>,
    pub keep_pinned_on_clear: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub poll_interval_ms: u64,
    pub max_payload_bytes: usize,
    pub whitespace: WhitespacePolicy,
    pub store_types: StoreTypes,
    /// Case-insensitive substrings of source application names
    pub excluded_apps: Vec<String>,
    pub block_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeySettings {
    pub bindings: BTreeMap<HotKeyAction, String>,
    pub debounce_ms: u64,
    pub confirm_before_clear: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
    pub write_timeout_ms: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: 30,
            max_age_days: None,
            keep_pinned_on_clear: true,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_payload_bytes: 10 * 1024 * 1024,
            whitespace: WhitespacePolicy::default(),
            store_types: StoreTypes::default(),
            excluded_apps: vec![
                "1password".to_string(),
                "bitwarden".to_string(),
                "keepass".to_string(),
                "keychain".to_string(),
                "lastpass".to_string(),
            ],
            block_sensitive: true,
        }
    }
}

impl Default for HotkeySettings {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(HotKeyAction::ShowHistory, "Control+Shift+V".to_string());
        bindings.insert(HotKeyAction::PasteLast, "Control+Alt+V".to_string());
        bindings.insert(HotKeyAction::ShowSnippets, "Control+Shift+B".to_string());
        Self {
            bindings,
            debounce_ms: 250,
            confirm_before_clear: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            write_timeout_ms: 2_000,
        }
    }
}

impl EngineSettings {
    pub fn get_settings_path() -> EngineResult<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load from the platform config dir, writing defaults on first run
    pub async fn load() -> EngineResult<Self> {
        let path = Self::get_settings_path()?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            let settings = Self::default();
            settings.save_to(path).await?;
            return Ok(settings);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::ConfigurationError(format!("Failed to read settings file: {}", e)))?;

        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| EngineError::ConfigurationError(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub async fn save(&self) -> EngineResult<()> {
        let path = Self::get_settings_path()?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::ConfigurationError(format!("Failed to create config directory: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigurationError(format!("Failed to serialize settings: {}", e)))?;

        fs::write(path, content)
            .await
            .map_err(|e| EngineError::ConfigurationError(format!("Failed to write settings file: {}", e)))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::ConfigurationError(msg));

        if self.history.capacity == 0 || self.history.capacity > MAX_CAPACITY {
            return invalid(format!(
                "history.capacity must be within 1..={}, got {}",
                MAX_CAPACITY, self.history.capacity
            ));
        }
        if self.history.max_age_days == Some(0) {
            return invalid("history.max_age_days must be at least 1".to_string());
        }
        let interval = self.capture.poll_interval_ms;
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&interval) {
            return invalid(format!(
                "capture.poll_interval_ms must be within {}..={}, got {}",
                MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, interval
            ));
        }
        if self.capture.max_payload_bytes == 0 {
            return invalid("capture.max_payload_bytes must be positive".to_string());
        }
        if self.storage.write_timeout_ms == 0 {
            return invalid("storage.write_timeout_ms must be positive".to_string());
        }
        for (action, combo) in &self.hotkeys.bindings {
            combo.parse::<KeyCombo>().map_err(|e| {
                EngineError::ConfigurationError(format!("hotkey for {:?}: {}", action, e))
            })?;
        }
        Ok(())
    }

    /// Directory holding the database
    pub fn data_dir(&self) -> EngineResult<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs().map(|dirs| dirs.data_dir().to_path_buf()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.capture.poll_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.write_timeout_ms)
    }
}

fn project_dirs() -> EngineResult<ProjectDirs> {
    ProjectDirs::from("com", "antigravity", "clipkeep").ok_or_else(|| {
        EngineError::ConfigurationError("Failed to determine config directory".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.history.capacity, 30);
        assert_eq!(settings.capture.whitespace, WhitespacePolicy::TrimTrailing);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut settings = EngineSettings::default();
        settings.history.capacity = 0;
        assert!(matches!(settings.validate(), Err(EngineError::ConfigurationError(_))));
    }

    #[test]
    fn test_rejects_out_of_range_interval() {
        let mut settings = EngineSettings::default();
        settings.capture.poll_interval_ms = 10;
        assert!(settings.validate().is_err());
        settings.capture.poll_interval_ms = 120_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_hotkey() {
        let mut settings = EngineSettings::default();
        settings
            .hotkeys
            .bindings
            .insert(HotKeyAction::ClearHistory, "Control+Hyper+".to_string());
        assert!(matches!(settings.validate(), Err(EngineError::ConfigurationError(_))));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"history": {"capacity": 5}}"#).unwrap();
        assert_eq!(settings.history.capacity, 5);
        assert!(settings.history.keep_pinned_on_clear);
        assert_eq!(settings.capture.poll_interval_ms, 500);
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let loaded = EngineSettings::load_from(&path).await.unwrap();
        assert_eq!(loaded, EngineSettings::default());
        assert!(path.exists());

        let mut changed = loaded.clone();
        changed.history.capacity = 7;
        changed.save_to(&path).await.unwrap();
        let reloaded = EngineSettings::load_from(&path).await.unwrap();
        assert_eq!(reloaded.history.capacity, 7);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"history": {"capacity": 0}}"#).unwrap();
        assert!(EngineSettings::load_from(&path).await.is_err());
    }
}
