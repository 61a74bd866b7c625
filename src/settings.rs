use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::AppError;

/// User-tunable options sent with every chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub auto_accepted_plan: bool,
    pub enable_background_investigation: bool,
    pub max_plan_iterations: u32,
    pub max_step_num: u32,
    pub max_search_results: u32,
    /// Tool server configuration, forwarded to the backend untouched.
    pub mcp_settings: Value,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            auto_accepted_plan: false,
            enable_background_investigation: true,
            max_plan_iterations: 1,
            max_step_num: 3,
            max_search_results: 3,
            mcp_settings: Value::Null,
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn snapshot(&self) -> ChatSettings;
    fn replace(&self, settings: ChatSettings) -> Result<(), AppError>;
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: RwLock<ChatSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: ChatSettings) -> Self {
        Self { settings: RwLock::new(settings) }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn snapshot(&self) -> ChatSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, settings: ChatSettings) -> Result<(), AppError> {
        let mut guard = self
            .settings
            .write()
            .map_err(|_| AppError::Settings { message: "settings lock poisoned".into() })?;
        *guard = settings;
        Ok(())
    }
}

/// Settings kept in memory and written through to a JSON file.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    inner: MemorySettingsStore,
}

impl FileSettingsStore {
    /// Loads `path` if it exists, otherwise starts from defaults.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let settings = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let settings: ChatSettings = serde_json::from_str(&raw).map_err(|e| {
                AppError::Settings {
                    message: format!("Invalid settings file {}: {e}", path.display()),
                }
            })?;
            debug!(path = %path.display(), "Loaded chat settings");
            settings
        } else {
            ChatSettings::default()
        };
        Ok(Self { path, inner: MemorySettingsStore::new(settings) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn snapshot(&self) -> ChatSettings {
        self.inner.snapshot()
    }

    fn replace(&self, settings: ChatSettings) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, raw)?;
        info!(path = %self.path.display(), "Persisted chat settings");
        self.inner.replace(settings)
    }
}
