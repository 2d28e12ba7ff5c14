//! Configuration loading
//!
//! Bootstrap settings come from an optional TOML file plus command-line
//! overrides; data directories default to the usual system/user locations.
//! Log verbosity is environment-driven (`HACK_SOUND_SERVER_LOGLEVEL`).

use crate::error::{Error, Result};
use crate::focus::DEFAULT_INQUIRY_TIMEOUT;
use crate::server::DEFAULT_IDLE_RELEASE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PACKAGE: &str = "hack-sound-server";

/// Bootstrap configuration loaded from the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    /// Directory holding the system metadata.json and sounds/
    pub system_data_dir: Option<PathBuf>,
    /// Directory holding the user catalog overriding the system one
    pub user_data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutsSection {
    /// Idle period before the daemon releases its last hold
    pub idle_release_secs: Option<u64>,
    /// Budget for one focus ownership inquiry
    pub focus_inquiry_ms: Option<u64>,
}

/// Effective runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub system_data_dir: PathBuf,
    pub user_data_dir: Option<PathBuf>,
    pub idle_release: Duration,
    pub focus_inquiry: Duration,
}

impl Config {
    /// Load configuration with optional file and command-line overrides
    pub async fn load(
        config_path: Option<&Path>,
        system_data_dir_override: Option<PathBuf>,
        user_data_dir_override: Option<PathBuf>,
    ) -> Result<Self> {
        let toml_config = match config_path {
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
                toml::from_str::<TomlConfig>(&text)
                    .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?
            }
            None => TomlConfig::default(),
        };
        Ok(Self::from_parts(
            toml_config,
            system_data_dir_override,
            user_data_dir_override,
        ))
    }

    fn from_parts(
        toml_config: TomlConfig,
        system_data_dir_override: Option<PathBuf>,
        user_data_dir_override: Option<PathBuf>,
    ) -> Self {
        let system_data_dir = system_data_dir_override
            .or(toml_config.paths.system_data_dir)
            .unwrap_or_else(default_system_data_dir);
        let user_data_dir = user_data_dir_override
            .or(toml_config.paths.user_data_dir)
            .or_else(default_user_data_dir);
        let idle_release = toml_config
            .timeouts
            .idle_release_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_IDLE_RELEASE);
        let focus_inquiry = toml_config
            .timeouts
            .focus_inquiry_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INQUIRY_TIMEOUT);

        Self {
            system_data_dir,
            user_data_dir,
            idle_release,
            focus_inquiry,
        }
    }
}

fn default_system_data_dir() -> PathBuf {
    PathBuf::from("/usr/share").join(PACKAGE)
}

fn default_user_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(PACKAGE))
}

/// Map `HACK_SOUND_SERVER_LOGLEVEL` to a tracing level directive
///
/// Accepts the classic numeric logging scale (10/20/30/40/50) or a level
/// name, case-insensitive. Anything unrecognized falls back to warnings.
pub fn log_level_directive(raw: &str) -> &'static str {
    if let Ok(level) = raw.trim().parse::<i64>() {
        return if level <= 10 {
            "debug"
        } else if level <= 20 {
            "info"
        } else if level <= 30 {
            "warn"
        } else {
            "error"
        };
    }
    match raw.trim().to_ascii_lowercase().as_str() {
        "critical" | "error" => "error",
        "warning" | "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "warn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_sections_are_optional() {
        let config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_parts(config, None, None);
        assert_eq!(config.idle_release, DEFAULT_IDLE_RELEASE);
        assert_eq!(config.focus_inquiry, DEFAULT_INQUIRY_TIMEOUT);
        assert_eq!(config.system_data_dir, default_system_data_dir());
    }

    #[test]
    fn toml_values_are_honored() {
        let config: TomlConfig = toml::from_str(
            r#"
            [paths]
            system_data_dir = "/opt/sounds"

            [timeouts]
            idle_release_secs = 3
            focus_inquiry_ms = 30000
            "#,
        )
        .unwrap();
        let config = Config::from_parts(config, None, None);
        assert_eq!(config.system_data_dir, PathBuf::from("/opt/sounds"));
        assert_eq!(config.idle_release, Duration::from_secs(3));
        assert_eq!(config.focus_inquiry, Duration::from_secs(30));
    }

    #[test]
    fn overrides_win_over_the_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [paths]
            system_data_dir = "/opt/sounds"
            "#,
        )
        .unwrap();
        let config = Config::from_parts(
            toml_config,
            Some(PathBuf::from("/custom")),
            Some(PathBuf::from("/custom-user")),
        );
        assert_eq!(config.system_data_dir, PathBuf::from("/custom"));
        assert_eq!(config.user_data_dir, Some(PathBuf::from("/custom-user")));
    }

    #[test]
    fn log_levels_map_from_numbers_and_names() {
        assert_eq!(log_level_directive("10"), "debug");
        assert_eq!(log_level_directive("20"), "info");
        assert_eq!(log_level_directive("30"), "warn");
        assert_eq!(log_level_directive("40"), "error");
        assert_eq!(log_level_directive("50"), "error");
        assert_eq!(log_level_directive("DEBUG"), "debug");
        assert_eq!(log_level_directive("Warning"), "warn");
        assert_eq!(log_level_directive("critical"), "error");
        assert_eq!(log_level_directive("bogus"), "warn");
    }
}
