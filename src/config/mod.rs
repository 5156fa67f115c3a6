use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ENV is not serializable: {0}")]
    Unreadable(String),
    #[error("invalid ENV: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Runtime knobs for the sync layer.
///
/// Read from `window.ENV` in the browser; every field falls back to its default.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(alias = "API_URL")]
    pub api_url: String,

    /// Quiet period before a content edit is written.
    pub autosave_ms: u32,

    pub retry_max_attempts: u32,
    pub retry_base_ms: u32,
    pub retry_max_delay_ms: u32,

    pub default_note_title: String,
    pub default_folder_name: String,

    #[serde(alias = "LOG")]
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:6689".to_string(),
            autosave_ms: 1000,
            retry_max_attempts: 3,
            retry_base_ms: 500,
            retry_max_delay_ms: 8000,
            default_note_title: "New note".to_string(),
            default_folder_name: "New folder".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: SyncConfig = serde_json::from_str(json)?;
        Ok(cfg.normalized())
    }

    /// Loads from the page's `window.ENV`, or defaults when absent or broken.
    pub fn load() -> Self {
        match Self::from_window() {
            Ok(Some(cfg)) => cfg,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring window.ENV");
                Self::default()
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn from_window() -> Result<Option<Self>, ConfigError> {
        Ok(None)
    }

    #[cfg(target_arch = "wasm32")]
    fn from_window() -> Result<Option<Self>, ConfigError> {
        let Some(window) = web_sys::window() else {
            return Ok(None);
        };
        let Some(env) = window.get("ENV") else {
            return Ok(None);
        };
        if env.is_undefined() || !env.is_object() {
            return Ok(None);
        }

        let json = js_sys::JSON::stringify(&env)
            .map_err(|e| ConfigError::Unreadable(format!("{e:?}")))?;
        let json: String = json.into();
        Self::from_json(&json).map(Some)
    }

    fn normalized(mut self) -> Self {
        let d = Self::default();
        self.api_url = self.api_url.trim().trim_end_matches('/').to_string();
        if self.api_url.is_empty() {
            self.api_url = d.api_url;
        }
        if self.default_note_title.trim().is_empty() {
            self.default_note_title = d.default_note_title;
        }
        if self.default_folder_name.trim().is_empty() {
            self.default_folder_name = d.default_folder_name;
        }
        self.retry_base_ms = self.retry_base_ms.max(1);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_base_ms);
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn retry_delay_ms(&self, attempt: u32) -> u32 {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_base_ms
            .saturating_mul(1 << shift)
            .min(self.retry_max_delay_ms)
    }
}
