//! # relay-settings
//!
//! Configuration for the scale relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.scale-relay/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `PORT` and `RELAY_*` overrides
//!
//! The loaded settings are validated before being handed back.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let settings = RelaySettings::default();
        assert_eq!(settings.relay.welcome_message, DEFAULT_WELCOME_MESSAGE);
        let _path = settings_path();
    }

    #[test]
    fn deep_merge_re_exported() {
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
