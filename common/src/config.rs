//! Persisted local preferences (§4.12).
//!
//! This is purely a local preference store; none of it crosses the wire.
//! It is distinct from the negotiated wire-level transfer settings the
//! session engine uses internally.

use std::{env, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration persisted to TOML under the platform configuration
/// directory:
/// - Linux: `$XDG_CONFIG_HOME/lan-file-sharer/config.toml` or
///   `$HOME/.config/lan-file-sharer/config.toml`
/// - macOS: `$HOME/Library/Application Support/lan-file-sharer/config.toml`
/// - Windows: `%APPDATA%\lan-file-sharer\config.toml`
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub default_out_dir: Option<PathBuf>,
    pub default_port: Option<u16>,
    pub profile_name: Option<String>,
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = env::var("APPDATA") {
                return Ok(PathBuf::from(appdata).join("lan-file-sharer"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                return Ok(PathBuf::from(userprofile)
                    .join(".config")
                    .join("lan-file-sharer"));
            }
            return Err(anyhow!(
                "unable to determine config directory (missing APPDATA/USERPROFILE)"
            ));
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = env::var("HOME") {
                return Ok(PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("lan-file-sharer"));
            }
            return Err(anyhow!("unable to determine config directory (missing HOME)"));
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let base = if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
                PathBuf::from(xdg)
            } else if let Ok(home) = env::var("HOME") {
                PathBuf::from(home).join(".config")
            } else {
                return Err(anyhow!(
                    "unable to determine config directory (missing XDG_CONFIG_HOME/HOME)"
                ));
            };
            Ok(base.join("lan-file-sharer"))
        }
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Loads the configuration from disk, or returns the default if no
    /// file exists yet.
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;
        if !config_file.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_file).with_context(|| {
            format!("failed to read config file: {}", config_file.display())
        })?;

        toml::from_str(&content).with_context(|| "failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        let config_file = Self::config_file()?;

        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).with_context(|| {
                format!("failed to create config directory: {}", config_dir.display())
            })?;
        }

        let content = toml::to_string_pretty(self)
            .with_context(|| "failed to serialize config")?;

        std::fs::write(&config_file, content).with_context(|| {
            format!("failed to write config file: {}", config_file.display())
        })
    }

    pub fn set_default_out_dir(&mut self, dir: PathBuf) -> Result<()> {
        self.default_out_dir = Some(dir);
        self.save()
    }

    pub fn clear_default_out_dir(&mut self) -> Result<()> {
        self.default_out_dir = None;
        self.save()
    }

    pub fn get_default_out_dir(&self) -> PathBuf {
        self.default_out_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_out_dir_falls_back_to_cwd() {
        let config = AppConfig::default();
        assert_eq!(config.get_default_out_dir(), PathBuf::from("."));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig {
            default_out_dir: Some(PathBuf::from("/tmp/downloads")),
            default_port: Some(9090),
            profile_name: Some("Ada".into()),
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_port, Some(9090));
        assert_eq!(parsed.profile_name.as_deref(), Some("Ada"));
    }
}
