//! Settings file support.
//!
//! Settings are optional. They provide CAN defaults and the alias tables
//! used to resolve peripheral identifiers given on the command line.
//!
//! # Example
//!
//! ```toml
//! [can]
//! bitrate = 500000
//! tx_retries = 10
//!
//! [aliases.can]
//! vehicle = "can0"
//!
//! [aliases.gpio]
//! user_led = "gpiochip0:18"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::{HwError, Result};

/// Settings file looked up when no path is given.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/hwkit.toml";

/// Environment variable overriding [`DEFAULT_SETTINGS_PATH`].
pub const SETTINGS_ENV_VAR: &str = "HWKIT_CONFIG";

/// Tool settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// CAN defaults.
    pub can: CanDefaults,

    /// Identifier aliases per peripheral kind.
    pub aliases: AliasTable,
}

/// Defaults applied to CAN tools when not overridden on the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanDefaults {
    /// Arbitration bitrate (bits per second).
    pub bitrate: u32,

    /// Transmit attempts per frame.
    pub tx_retries: u32,

    /// Sleep between transmit attempts in milliseconds.
    pub retry_backoff_ms: u64,

    /// Socket receive buffer size in bytes.
    pub rx_buffer_length: u32,

    /// Receive poll interval in milliseconds.
    pub rx_poll_interval_ms: u64,
}

impl Default for CanDefaults {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            tx_retries: 10,
            retry_backoff_ms: 1,
            rx_buffer_length: 512 * 1024,
            rx_poll_interval_ms: 10,
        }
    }
}

/// Alias tables, keyed by alias name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AliasTable {
    /// CAN alias -> interface name.
    pub can: HashMap<String, String>,

    /// GPIO alias -> `chip:offset` or offset.
    pub gpio: HashMap<String, String>,
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| HwError::Settings(e.to_string()))
    }

    /// Load settings from `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HwError::Settings(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let settings = Self::from_toml_str(&content)?;

        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings using the lookup order: explicit path, then
    /// `$HWKIT_CONFIG`, then [`DEFAULT_SETTINGS_PATH`] if it exists,
    /// then built-in defaults.
    ///
    /// An explicitly named file (argument or environment) must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(SETTINGS_ENV_VAR) {
            return Self::from_file(&PathBuf::from(path));
        }

        let default_path = Path::new(DEFAULT_SETTINGS_PATH);
        if default_path.exists() {
            return Self::from_file(default_path);
        }

        Ok(Self::default())
    }
}

/// Sample settings file printed by `hwkit example-config`.
pub const EXAMPLE_SETTINGS: &str = r#"# hwkit settings

[can]
bitrate = 500000
tx_retries = 10
retry_backoff_ms = 1
rx_buffer_length = 524288   # 512 KiB
rx_poll_interval_ms = 10

[aliases.can]
vehicle = "can0"
diagnostics = "can1"

[aliases.gpio]
user_button = "gpiochip0:17"
user_led = "gpiochip0:18"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_example_settings_parse() {
        let settings = Settings::from_toml_str(EXAMPLE_SETTINGS).unwrap();

        assert_eq!(settings.can.bitrate, 500_000);
        assert_eq!(settings.can.rx_buffer_length, 512 * 1024);
        assert_eq!(settings.aliases.can["vehicle"], "can0");
        assert_eq!(settings.aliases.gpio["user_led"], "gpiochip0:18");
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings = Settings::from_toml_str("[can]\nbitrate = 125000\n").unwrap();

        assert_eq!(settings.can.bitrate, 125_000);
        assert_eq!(settings.can.tx_retries, 10);
        assert!(settings.aliases.can.is_empty());
    }

    #[test]
    fn test_invalid_settings() {
        let err = Settings::from_toml_str("[can]\nbitrate = \"fast\"\n").unwrap_err();
        assert!(matches!(err, HwError::Settings(_)));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[aliases.can]\nbench = \"vcan0\"").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.aliases.can["bench"], "vcan0");
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Settings::load(Some(Path::new("/nonexistent/hwkit.toml"))).unwrap_err();
        assert!(err.is_argument_error());
    }
}
