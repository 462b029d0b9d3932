//! Configuration module for the audio intake layer.
//!
//! Provides `IntakeConfig` (top-level settings), `IntakePaths` for
//! cross-platform config directories, and TOML persistence via
//! `IntakeConfig::load` / `IntakeConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::IntakePaths;
pub use settings::IntakeConfig;
