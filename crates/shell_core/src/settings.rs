use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use serde::Deserialize;

/// Runtime tunables, loaded from `shell.toml` with environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSettings {
    pub locator_base: String,
    pub locale: String,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
    pub invalidation_interval_secs: u64,
    pub invalidation_timeout_secs: u64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            locator_base: String::new(),
            locale: "en_US".into(),
            retry_interval_ms: 3142,
            max_retries: 9,
            invalidation_interval_secs: 60,
            invalidation_timeout_secs: 300,
        }
    }
}

impl ShellSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn invalidation_interval(&self) -> Duration {
        Duration::from_secs(self.invalidation_interval_secs)
    }

    pub fn invalidation_timeout(&self) -> Duration {
        Duration::from_secs(self.invalidation_timeout_secs)
    }
}

pub fn load_settings() -> ShellSettings {
    let mut settings = ShellSettings::default();

    if let Ok(raw) = fs::read_to_string("shell.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("locator_base").and_then(|v| v.as_str()) {
                settings.locator_base = v.to_string();
            }
            if let Some(v) = file_cfg.get("locale").and_then(|v| v.as_str()) {
                settings.locale = v.to_string();
            }
            if let Some(v) = file_cfg.get("retry_interval_ms").and_then(|v| v.as_integer()) {
                settings.retry_interval_ms = v as u64;
            }
            if let Some(v) = file_cfg.get("max_retries").and_then(|v| v.as_integer()) {
                settings.max_retries = v as u32;
            }
            if let Some(v) = file_cfg
                .get("invalidation_interval_secs")
                .and_then(|v| v.as_integer())
            {
                settings.invalidation_interval_secs = v as u64;
            }
            if let Some(v) = file_cfg
                .get("invalidation_timeout_secs")
                .and_then(|v| v.as_integer())
            {
                settings.invalidation_timeout_secs = v as u64;
            }
        }
    }

    if let Ok(v) = std::env::var("SHELL__LOCATOR_BASE") {
        settings.locator_base = v;
    }
    if let Ok(v) = std::env::var("SHELL__LOCALE") {
        settings.locale = v;
    }
    if let Ok(v) = std::env::var("SHELL__RETRY_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.retry_interval_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("SHELL__MAX_RETRIES") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.max_retries = parsed;
        }
    }
    if let Ok(v) = std::env::var("SHELL__INVALIDATION_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.invalidation_interval_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("SHELL__INVALIDATION_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.invalidation_timeout_secs = parsed;
        }
    }

    settings
}
