//! Configuration file parser for reruns.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! Configuration only supplies *initialization* settings: a feed that
//! already carries reruns metadata keeps its persisted order mode and
//! decorations regardless of what the file says.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::schedule::{InitOptions, OrderMode};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emission order for a freshly initialized feed:
    /// "chronological" or "shuffled".
    pub order: OrderMode,

    /// Refill the queue once every entry has been rebroadcast, instead of
    /// failing on over-request.
    pub run_forever: bool,

    /// Title decoration defaults applied at first initialization.
    pub titles: Titles,
}

/// Title decoration configuration.
///
/// An absent key means "use the built-in default decoration"; an explicit
/// empty string means "no decoration for this field".
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Titles {
    pub feed_prefix: Option<String>,
    pub feed_suffix: Option<String>,
    /// Entry affixes may embed strftime directives; they expand against each
    /// entry's original publication date at rebroadcast time.
    pub entry_prefix: Option<String>,
    pub entry_suffix: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: OrderMode::Chronological,
            run_forever: false,
            titles: Titles::default(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid slurping a maliciously
        // large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["order", "run_forever", "titles"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), order = %config.order, "Loaded configuration");
        Ok(config)
    }

    /// Resolve this configuration into first-initialization options.
    pub fn init_options(&self) -> InitOptions {
        let defaults = InitOptions::default();
        InitOptions {
            order: self.order,
            run_forever: self.run_forever,
            title_prefix: affix(&self.titles.feed_prefix, defaults.title_prefix),
            title_suffix: affix(&self.titles.feed_suffix, defaults.title_suffix),
            entry_title_prefix: affix(&self.titles.entry_prefix, defaults.entry_title_prefix),
            entry_title_suffix: affix(&self.titles.entry_suffix, defaults.entry_title_suffix),
        }
    }
}

/// Absent key → built-in default; empty string → explicitly no decoration.
fn affix(configured: &Option<String>, default: Option<String>) -> Option<String> {
    match configured {
        None => default,
        Some(value) if value.is_empty() => None,
        Some(value) => Some(value.clone()),
    }
}

// ============================================================================
// Tests
// ============================================================================
