//! System configuration model for the Vessel runtime.
//!
//! The configuration file is a line-oriented `key = value` format. Blank
//! lines and `#` comments are ignored. The setup pipeline interprets
//! `allow setuid` and the repeatable `bind path`; unknown keys are
//! preserved for collaborators.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VesselError};

/// Parsed system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Whether the administrator permits privileged (SUID) operation.
    pub allow_setuid: bool,
    /// Host paths bound into every container, one `bind path` line each,
    /// in declaration order. Entries are `source` or `source:target`.
    pub bind_paths: Vec<String>,
    /// Raw key/value pairs for keys this crate does not interpret.
    pub extra: HashMap<String, String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            allow_setuid: true,
            bind_paths: Vec::new(),
            extra: HashMap::new(),
        }
    }
}

impl SystemConfig {
    /// Parses configuration text.
    ///
    /// Boolean values accept `yes`/`no`/`1`/`0`/`true`/`false`.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is neither blank, a comment, nor a
    /// `key = value` pair, or if a recognized key has a malformed value.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(VesselError::Config {
                    message: format!("line {}: expected `key = value`, got {line:?}", lineno + 1),
                });
            };
            let key = key.trim();
            let value = value.trim();
            if key == "allow setuid" {
                config.allow_setuid = parse_bool(key, value)?;
            } else if key == "bind path" {
                config.bind_paths.push(value.to_string());
            } else {
                let _ = config.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(config)
    }

    /// Loads and parses the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails to parse.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => Err(VesselError::Config {
            message: format!("key {key:?}: expected boolean, got {other:?}"),
        }),
    }
}

/// Returns whether `path` exists and is owned by root.
///
/// Used as a precondition check before trusting the configuration file in
/// a privileged install.
///
/// # Errors
///
/// Returns an error if the file metadata cannot be read.
#[cfg(unix)]
pub fn is_root_owned(path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path).map_err(|e| VesselError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(meta.uid() == 0)
}
