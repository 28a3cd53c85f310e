//! # crew-settings
//!
//! Settings are loaded from three layers, lowest priority first:
//! 1. compiled defaults ([`CrewSettings::default()`])
//! 2. the user file, `~/.crew/settings.json` unless a path is given
//! 3. `CREW_*` environment variables

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, crew_dir, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
