//! # TGMStream Configuration Module
//!
//! Configuration management for TGMStream:
//! - Embedded default configuration merged with an optional YAML file
//! - Environment variable overrides (`TGMSTREAM_*`)
//! - Typed accessors for every knob the session core consumes
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use tgmconfig::get_config;
//!
//! let config = get_config();
//! let min_members = config.min_member_count;
//! let sessions = config.session_strings.len();
//! ```

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs};
use tgmtrack::Platform;
use tracing::info;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("tgmstream.yaml");

/// Environment variable pointing at the user configuration file.
const ENV_CONFIG_FILE: &str = "TGMSTREAM_CONFIG";

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(
        Config::load(env::var(ENV_CONFIG_FILE).ok().as_deref())
            .expect("Failed to load TGMStream configuration")
    );
}

/// Returns the global configuration singleton.
pub fn get_config() -> Arc<Config> {
    Arc::clone(&CONFIG)
}

/// TGMStream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pre-authenticated session strings, one streaming identity each.
    pub session_strings: Vec<String>,
    /// Directory for downloaded media files.
    pub downloads_dir: PathBuf,
    /// Groups below this member count are rejected.
    pub min_member_count: u32,
    /// Platform used when a play command does not name one.
    pub default_platform: Platform,
    /// Fallback priority for failed resolutions.
    pub fallback_platforms: Vec<Platform>,
    /// Waiting tracks per chat.
    pub max_queue_size: usize,
    /// Concurrent resolutions across all chats.
    pub resolve_slots: usize,
    /// Seconds an idle session survives without commands.
    pub idle_grace_secs: u64,
    /// End calls nobody is listening to.
    pub auto_end_empty_calls: bool,
}

impl Default for Config {
    fn default() -> Self {
        // The derived Deserialize impl for `#[serde(default)]` calls
        // Default::default() itself, so parsing the embedded YAML through
        // it would recurse forever; a shadow struct without the attribute
        // breaks the cycle.
        #[derive(Deserialize)]
        struct Embedded {
            session_strings: Vec<String>,
            downloads_dir: PathBuf,
            min_member_count: u32,
            default_platform: Platform,
            fallback_platforms: Vec<Platform>,
            max_queue_size: usize,
            resolve_slots: usize,
            idle_grace_secs: u64,
            auto_end_empty_calls: bool,
        }

        let embedded: Embedded =
            serde_yaml::from_str(DEFAULT_CONFIG).expect("embedded default configuration is valid");
        Self {
            session_strings: embedded.session_strings,
            downloads_dir: embedded.downloads_dir,
            min_member_count: embedded.min_member_count,
            default_platform: embedded.default_platform,
            fallback_platforms: embedded.fallback_platforms,
            max_queue_size: embedded.max_queue_size,
            resolve_slots: embedded.resolve_slots,
            idle_grace_secs: embedded.idle_grace_secs,
            auto_end_empty_calls: embedded.auto_end_empty_calls,
        }
    }
}

impl Config {
    /// Load configuration: embedded defaults, then the user file (if
    /// any), then environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) if Path::new(path).exists() => {
                info!("Loading configuration from {}", path);
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Cannot read configuration file {}", path))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("Invalid configuration file {}", path))?
            }
            Some(path) => {
                info!("Configuration file {} not found, using defaults", path);
                Config::default()
            }
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = env::var("TGMSTREAM_SESSION_STRINGS") {
            self.session_strings = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(value) = env::var("TGMSTREAM_DOWNLOADS_DIR") {
            self.downloads_dir = PathBuf::from(value);
        }
        if let Ok(value) = env::var("TGMSTREAM_MIN_MEMBER_COUNT") {
            self.min_member_count = value
                .parse()
                .context("TGMSTREAM_MIN_MEMBER_COUNT must be an integer")?;
        }
        if let Ok(value) = env::var("TGMSTREAM_DEFAULT_PLATFORM") {
            self.default_platform = value
                .parse()
                .map_err(|e| anyhow::anyhow!("TGMSTREAM_DEFAULT_PLATFORM: {}", e))?;
        }
        Ok(())
    }

    /// Downloads directory, created on first use.
    pub fn ensure_downloads_dir(&self) -> Result<&Path> {
        fs::create_dir_all(&self.downloads_dir).with_context(|| {
            format!(
                "Cannot create downloads directory {}",
                self.downloads_dir.display()
            )
        })?;
        Ok(&self.downloads_dir)
    }
}
