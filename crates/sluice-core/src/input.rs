//! Input files: one URL per line with optional per-URL settings.
//!
//! ```text
//! # global options stay in effect for all following URLs
//! -G base-directory = "/tmp/"
//!
//! # local options only apply to the next URL
//! -filename = "{id}.{extension}"
//! https://example.org/
//! ```

use serde_json::Value;

/// A `key.path = value` setting.
pub type ConfigOption = (Vec<String>, Value);

/// A URL together with the settings that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct InputUrl {
    pub url: String,
    /// Applied to the global config before this URL runs.
    pub global: Vec<ConfigOption>,
    /// Applied only while this URL runs.
    pub local: Vec<ConfigOption>,
}

impl InputUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            global: Vec::new(),
            local: Vec::new(),
        }
    }
}

/// Parse the contents of an input file.
///
/// Malformed option lines are logged and ignored.
pub fn parse_input(text: &str) -> Vec<InputUrl> {
    let mut urls = Vec::new();
    let mut global = Vec::new();
    let mut local = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(option) = line.strip_prefix('-') {
            let (target, option) = match option.strip_prefix('G') {
                Some(rest) => (&mut global, rest),
                None => (&mut local, option),
            };
            let Some((key, value)) = option.split_once('=') else {
                tracing::warn!(line = option, "input file: invalid <key>=<value> pair");
                continue;
            };
            match serde_json::from_str::<Value>(value.trim()) {
                Ok(value) => target.push((
                    key.trim().split('.').map(str::to_string).collect(),
                    value,
                )),
                Err(e) => {
                    tracing::warn!(value = value.trim(), error = %e, "input file: unable to parse value");
                }
            }
            continue;
        }

        urls.push(InputUrl {
            url: line.to_string(),
            global: std::mem::take(&mut global),
            local: std::mem::take(&mut local),
        });
    }
    urls
}
