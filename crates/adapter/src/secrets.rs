//! Secret lookup: process environment first, then an optional `.env` file.
//!
//! The file never touches the process environment; values are kept in memory and only
//! consulted for keys the environment does not define (or defines as empty).

use crate::error::{AdapterError, Result};
use restbridge_openapi::auth::{EnvSecrets, SecretSource};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default)]
pub struct LayeredSecrets {
    file: HashMap<String, String>,
}

impl LayeredSecrets {
    /// Environment only.
    #[must_use]
    pub fn env_only() -> Self {
        Self::default()
    }

    /// Environment, falling back to the `KEY=value` pairs of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or contains an unparseable line.
    pub fn with_env_file(path: &Path) -> Result<Self> {
        let iter = dotenv::from_path_iter(path).map_err(|e| {
            AdapterError::Config(format!("failed to open env file '{}': {e}", path.display()))
        })?;
        let mut file = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                AdapterError::Config(format!("invalid env file '{}': {e}", path.display()))
            })?;
            file.insert(key, value);
        }
        tracing::info!(path = %path.display(), entries = file.len(), "loaded env file");
        Ok(Self { file })
    }

    /// Use `explicit` if given, else `./.env` when it exists, else the environment alone.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing or malformed.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::with_env_file(path),
            None => {
                let default = Path::new(".env");
                if default.is_file() {
                    Self::with_env_file(default)
                } else {
                    Ok(Self::env_only())
                }
            }
        }
    }
}

impl SecretSource for LayeredSecrets {
    fn get(&self, key: &str) -> Option<String> {
        EnvSecrets
            .get(key)
            .filter(|v| !v.is_empty())
            .or_else(|| self.file.get(key).cloned())
    }
}
