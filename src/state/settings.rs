// SPDX-License-Identifier: MPL-2.0

use crate::atproto::MAX_PAGE_LIMIT;
use crate::config::APP_ID;
use crate::ratelimit::RateLimitConfig;
use crate::sync::{
    DEFAULT_BATCH_SIZE, DEFAULT_DAYS_BACK, DEFAULT_RETENTION_DAYS, INCREMENTAL_DAYS_BACK,
    SyncOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_NOISE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_RECIPROCITY_THRESHOLD: f64 = 0.3;

/// Fan-out and lookback knobs for sync runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub days_back: i64,
    pub incremental_days_back: i64,
    pub retention_days: i64,
    pub page_limit: u32,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            days_back: DEFAULT_DAYS_BACK,
            incremental_days_back: INCREMENTAL_DAYS_BACK,
            retention_days: DEFAULT_RETENTION_DAYS,
            page_limit: MAX_PAGE_LIMIT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SyncSettings {
    /// Orchestrator options, with out-of-range values pulled back into range.
    pub fn to_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.batch_size.max(1),
            window: chrono::Duration::days(self.days_back.max(1)),
            incremental_window: chrono::Duration::days(self.incremental_days_back.max(1)),
            retention: chrono::Duration::days(self.retention_days.max(1)),
            page_limit: self.page_limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Cache lifetime and outlier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub cache_ttl_secs: u64,
    pub noise_threshold: f64,
    pub reciprocity_threshold: f64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
            reciprocity_threshold: DEFAULT_RECIPROCITY_THRESHOLD,
        }
    }
}

impl AnalyticsSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Persistent engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
}

impl EngineSettings {
    /// Get the settings file path (~/.config/io.github.sethcottle.Rapport/settings.json)
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("settings.json");
            p
        })
    }

    /// Load settings from the default location, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load settings from `path`. A missing file means defaults; a file that
    /// doesn't parse is reported and also falls back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<(), String> {
        let path = Self::settings_path().ok_or("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {e}"))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {e}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("rapport-settings-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{ "sync": { "batch_size": 4 } }"#).unwrap();
        assert_eq!(settings.sync.batch_size, 4);
        assert_eq!(settings.sync.days_back, DEFAULT_DAYS_BACK);
        assert_eq!(settings.rate_limit, RateLimitConfig::default());
        assert_eq!(settings.analytics.cache_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn test_options_are_clamped() {
        let sync = SyncSettings {
            batch_size: 0,
            page_limit: 500,
            days_back: 7,
            ..Default::default()
        };
        let options = sync.to_options();
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.page_limit, MAX_PAGE_LIMIT);
        assert_eq!(options.window, chrono::Duration::days(7));
        assert_eq!(options.incremental_window, chrono::Duration::days(1));
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path("roundtrip");
        let mut settings = EngineSettings::default();
        settings.rate_limit.max_requests = 1000;
        settings.analytics.noise_threshold = 0.9;

        settings.save_to(&path).unwrap();
        assert_eq!(EngineSettings::load_from(&path), settings);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let path = scratch_path("corrupt");
        assert_eq!(EngineSettings::load_from(&path), EngineSettings::default());

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(EngineSettings::load_from(&path), EngineSettings::default());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
