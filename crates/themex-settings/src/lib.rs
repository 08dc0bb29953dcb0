//! # themex-settings
//!
//! Layered configuration for the themex engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ThemexSettings::default()`]
//! 2. **User file**: `~/.themex/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `THEMEX_*` overrides
//!
//! There is no global instance; callers load once and pass the value (or the
//! parts they need) down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_with, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_under_home() {
        let p = settings_path();
        assert!(p.ends_with(".themex/settings.json"));
    }

    #[test]
    fn defaults_round_trip_through_json() {
        let json = serde_json::to_value(ThemexSettings::default()).unwrap();
        assert_eq!(json["pipelines"]["exploratory"]["kMin"], 30);
        assert_eq!(json["bulkhead"]["searchGlobal"], 50);
        let back: ThemexSettings = serde_json::from_value(json).unwrap();
        back.validate().unwrap();
    }
}
