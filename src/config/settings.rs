//! Intake settings, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::IntakePaths;
use crate::capture::CaptureParams;

// ---------------------------------------------------------------------------
// IntakeConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level intake configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use audio_intake::config::IntakeConfig;
///
/// // Load (returns Default when the file is missing)
/// let config = IntakeConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Preferred capture endpoint id, as reported by device enumeration.
    /// `None` means the system default input.
    pub endpoint: Option<String>,
    /// Capture parameters forwarded to `CaptureSession::open`.
    pub capture: CaptureParams,
}

impl IntakeConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(IntakeConfig::default())` when the file does not exist
    /// yet (first-run scenario) so callers never need to special-case a
    /// missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&IntakePaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&IntakePaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ChannelMode;
    use tempfile::tempdir;

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = IntakeConfig::load_from(&path).expect("should not error");

        assert!(config.endpoint.is_none());
        assert_eq!(config.capture.channels, ChannelMode::Mono);
        assert!(config.capture.sample_rate.is_none());
        assert!(config.capture.buffer_ms.is_none());
    }

    /// Verify that modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = IntakeConfig::default();
        cfg.endpoint = Some("USB Microphone:1".into());
        cfg.capture.channels = ChannelMode::Stereo;
        cfg.capture.sample_rate = Some(48_000);
        cfg.capture.device_channels = Some(2);
        cfg.capture.buffer_ms = Some(20);

        cfg.save_to(&path).expect("save");
        let loaded = IntakeConfig::load_from(&path).expect("load");

        assert_eq!(loaded.endpoint.as_deref(), Some("USB Microphone:1"));
        assert_eq!(loaded.capture.channels, ChannelMode::Stereo);
        assert_eq!(loaded.capture.sample_rate, Some(48_000));
        assert_eq!(loaded.capture.device_channels, Some(2));
        assert_eq!(loaded.capture.buffer_ms, Some(20));
    }

    /// `save_to` must create missing parent directories.
    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("deep").join("settings.toml");

        IntakeConfig::default().save_to(&path).expect("save");
        assert!(path.exists());
    }

    /// A partial TOML file fills the remaining fields from defaults.
    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "endpoint = \"Built-in Microphone\"\n").expect("write");

        let config = IntakeConfig::load_from(&path).expect("load");

        assert_eq!(config.endpoint.as_deref(), Some("Built-in Microphone"));
        assert_eq!(config.capture.channels, ChannelMode::Mono);
    }
}
