//! # wirepool-settings
//!
//! Runtime configuration for wirepool connections.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WirepoolSettings::default()`]
//! 2. **User file**: `~/.wirepool/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WIREPOOL_*` overrides (highest priority)
//!
//! The loaded value is handed to whatever builds the connection pool; there
//! is no process-wide instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = WirepoolSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = WirepoolSettings::default();
        assert_eq!(settings.name, "wirepool");
        assert_eq!(settings.socket.pong_wait_ms, 60_000);
        assert_eq!(settings.socket.write_wait_ms, 10_000);
        assert_eq!(settings.socket.max_message_size, 5120);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }
}
