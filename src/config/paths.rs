//! Cross-platform configuration paths using the `dirs` crate.
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\audio-intake\
//!   macOS:   ~/Library/Application Support/audio-intake/
//!   Linux:   ~/.config/audio-intake/

use std::path::PathBuf;

/// Holds all resolved configuration directory/file paths.
#[derive(Debug, Clone)]
pub struct IntakePaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
}

impl IntakePaths {
    const APP_NAME: &'static str = "audio-intake";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path (should be extremely rare in practice).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
        }
    }
}

impl Default for IntakePaths {
    fn default() -> Self {
        Self::new()
    }
}
