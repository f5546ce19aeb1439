//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Defaults applied to export requests that leave a setting unset.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Encoder profile/level used when a request does not name one.
    pub video_profile: String,

    /// Container file type used when a request does not name one
    /// (e.g., "mp4", "mov", "m4v").
    pub container: String,

    /// Frame rate assumed when the source track does not report one.
    pub fallback_frame_rate: u32,

    /// Clean aperture offset, in pixels, written into the video encoder settings.
    pub clean_aperture_offset: u32,

    /// Remove an existing file at the destination before writing.
    pub overwrite_existing: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reframe=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            video_profile: "H.264 Main AutoLevel".to_string(),
            container: "mp4".to_string(),
            fallback_frame_rate: 30,
            clean_aperture_offset: 10,
            overwrite_existing: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl EngineConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_or_default(&config_file_path())
    }

    /// Load config from `path`; a missing or unreadable file yields defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load_from(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> crate::error::ReframeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reframe").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_encoder_conventions() {
        let config = EngineConfig::default();
        assert_eq!(config.export.video_profile, "H.264 Main AutoLevel");
        assert_eq!(config.export.container, "mp4");
        assert_eq!(config.export.fallback_frame_rate, 30);
        assert!(config.export.overwrite_existing);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"export":{"container":"mov"}}"#).unwrap();
        assert_eq!(config.export.container, "mov");
        assert_eq!(config.export.clean_aperture_offset, 10);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let result = EngineConfig::load_from(&path);
        assert!(matches!(result, Err(crate::error::ReframeError::Json(_))));
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reframe").join("config.json");

        let missing = EngineConfig::load_or_default(&path);
        assert_eq!(missing.export.container, "mp4");

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        let broken = EngineConfig::load_or_default(&path);
        assert_eq!(broken.export.fallback_frame_rate, 30);

        std::fs::write(&path, r#"{"export":{"overwrite_existing":false}}"#).unwrap();
        let loaded = EngineConfig::load_or_default(&path);
        assert!(!loaded.export.overwrite_existing);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_config_path_ends_in_reframe_dir() {
        assert!(config_file_path().ends_with("reframe/config.json"));
    }
}
