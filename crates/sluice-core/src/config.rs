//! Hierarchical JSON configuration.
//!
//! A single document such as
//!
//! ```json
//! {
//!     "extractor": {
//!         "sleep": 1.0,
//!         "directlink": { "archive": "~/.cache/sluice/archive.db" }
//!     },
//!     "downloader": { "http": { "retries": 3 } },
//!     "output": { "mode": "terminal" }
//! }
//! ```
//!
//! is queried with key paths. [`Config::interpolate`] lets a deeper level
//! override a value set further up, which is how per-extractor settings
//! shadow global ones.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    root: Value,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing document. Non-object values are replaced by `{}`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => Self { root: value },
            _ => Self::default(),
        }
    }

    /// Load and merge the JSON files in `paths`, in order.
    ///
    /// Missing or unreadable files are skipped unless `strict` is set.
    pub fn load(paths: &[PathBuf], strict: bool) -> Result<Self, AppError> {
        let mut config = Self::new();
        for path in paths {
            match config.load_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Loaded config file"),
                Err(e) if strict => return Err(e),
                Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping config file"),
            }
        }
        Ok(config)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), AppError> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            AppError::Config(format!("invalid JSON in {}: {e}", path.display()))
        })?;
        if !value.is_object() {
            return Err(AppError::Config(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }
        self.merge(value);
        Ok(())
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Deep-merge `value` into this document; `value` wins on conflicts.
    pub fn merge(&mut self, value: Value) {
        merge_into(&mut self.root, value);
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut node = &self.root;
        for key in path {
            node = node.as_object()?.get(*key)?;
        }
        Some(node)
    }

    /// Set `value` at `path`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &[&str], value: Value) {
        set_at(&mut self.root, path, value);
    }

    /// Look up the final key of `path` at every level along the path and
    /// return the deepest definition.
    pub fn interpolate(&self, path: &[&str]) -> Option<&Value> {
        let (key, parents) = path.split_last()?;
        let mut node = self.root.as_object()?;
        let mut value = node.get(*key);
        for parent in parents {
            node = match node.get(*parent).and_then(Value::as_object) {
                Some(next) => next,
                None => break,
            };
            if let Some(found) = node.get(*key) {
                value = Some(found);
            }
        }
        value
    }

    /// A copy of this config with `overrides` applied on top.
    pub fn with_overrides(&self, overrides: &[(Vec<String>, Value)]) -> Self {
        let mut config = self.clone();
        for (path, value) in overrides {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            config.set(&path, value.clone());
        }
        config
    }
}

/// Replace the value at `path`; non-object nodes along the way become `{}`.
fn set_at(node: &mut Value, path: &[&str], value: Value) {
    let Some((key, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(key.to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn merge_into(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_into(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, value) => *target = value,
    }
}

/// Parse a `key.path=value` option; the value is JSON if it parses as such
/// and a plain string otherwise.
pub fn parse_option(option: &str) -> Result<(Vec<String>, Value), AppError> {
    let (key, value) = option
        .split_once('=')
        .ok_or_else(|| AppError::Config(format!("invalid <key>=<value> pair: {option}")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(AppError::Config(format!("empty key in option: {option}")));
    }
    let value = value.trim();
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.split('.').map(str::to_string).collect(), value))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
            if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))
            {
                return PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']));
            }
        }
    }
    PathBuf::from(path)
}
