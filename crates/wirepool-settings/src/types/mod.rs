//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so partial JSON is accepted and missing fields keep their default.

mod socket;

pub use socket::*;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Root settings type.
///
/// ```json
/// {
///   "name": "wirepool",
///   "socket": { "pongWaitMs": 30000, "messageKind": "text" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WirepoolSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name, used in log output.
    pub name: String,
    /// Connection timing, limits and policies.
    pub socket: SocketSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for WirepoolSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "wirepool".to_string(),
            socket: SocketSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl WirepoolSettings {
    /// Reject values the connection layer cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.socket.validate()
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`) or an
    /// `EnvFilter` directive string.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
