//! Interpreter configuration
//!
//! Configurations are stored as pretty-printed JSON. Missing fields take
//! their defaults, so a file only needs the settings it changes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings for [`EmbeddedPerl::with_config`](crate::EmbeddedPerl::with_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Value of `$0`.
    pub script_name: String,
    /// Modules required right after start-up, in order.
    pub preload: Vec<String>,
    /// Argument stack slots allocated up front.
    pub stack_reserve: usize,
    /// `0` leaves globals to the process at teardown; `1` frees them.
    pub destruct_level: u8,
    /// Log a warning when values are still referenced at teardown.
    pub warn_on_leaks: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            script_name: "perlbridge".to_string(),
            preload: Vec::new(),
            stack_reserve: 128,
            destruct_level: 1,
            warn_on_leaks: true,
        }
    }
}

/// Invalid configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Destruct levels above 2 mean nothing to the runtime
    #[error("destruct level {0} is out of range (0-2)")]
    DestructLevel(u8),

    /// Module names are `Word::Word` sequences
    #[error("invalid module name {0:?}")]
    ModuleName(String),

    /// `$0` cannot be empty
    #[error("script name is empty")]
    EmptyScriptName,
}

fn valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split("::").all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl InterpreterConfig {
    /// Check the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script_name.is_empty() {
            return Err(ConfigError::EmptyScriptName);
        }
        if self.destruct_level > 2 {
            return Err(ConfigError::DestructLevel(self.destruct_level));
        }
        if let Some(bad) = self.preload.iter().find(|name| !valid_module_name(name)) {
            return Err(ConfigError::ModuleName(bad.clone()));
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write config")?;
    file.sync_all().context("Failed to sync config")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }
    Ok(())
}

/// Write `config` to `path`.
pub fn write_config(path: &Path, config: &InterpreterConfig) -> Result<()> {
    config.validate()?;
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    write_atomic(path, &json)
}

/// Read and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<InterpreterConfig> {
    let data = fs::read(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: InterpreterConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;
    config.validate()?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_load_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("perlbridge.json");
        let config = InterpreterConfig {
            preload: vec!["List::Util".to_string()],
            destruct_level: 0,
            ..InterpreterConfig::default()
        };

        write_config(&path, &config).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial.json");
        fs::write(&path, br#"{ "script_name": "tool" }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.script_name, "tool");
        assert_eq!(config.stack_reserve, InterpreterConfig::default().stack_reserve);
    }

    #[test]
    fn test_validation() {
        let mut config = InterpreterConfig::default();
        assert_eq!(config.validate(), Ok(()));

        config.destruct_level = 5;
        assert_eq!(config.validate(), Err(ConfigError::DestructLevel(5)));

        config.destruct_level = 1;
        config.preload = vec!["Good::Name".to_string(), "bad name".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::ModuleName("bad name".to_string()))
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, br#"{ "destruct_level": 9 }"#).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
