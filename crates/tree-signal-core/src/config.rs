//! Layered configuration: defaults < TOML file < environment
//!
//! ```toml
//! [decay]
//! hold_seconds = 30.0
//! decay_seconds = 10.0
//!
//! [cleanup]
//! interval_seconds = 60.0
//!
//! [tree]
//! max_channel_depth = 8
//!
//! [layout]
//! min_extent = 0.02
//! split = "fixed"
//! ```

use crate::layout::SplitAxis;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "TREE_SIGNAL_CONFIG";

/// Upper bound for either decay duration: one year
pub const MAX_DECAY_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {var}={value:?} is not valid")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Decay timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Seconds a node stays at full weight after its last own message
    pub hold_seconds: f64,
    /// Seconds to fade linearly from full weight to zero
    pub decay_seconds: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            hold_seconds: 30.0,
            decay_seconds: 10.0,
        }
    }
}

impl DecayConfig {
    /// Explicit timings; call [`validate`](Self::validate) before use
    #[inline]
    #[must_use]
    pub fn new(hold_seconds: f64, decay_seconds: f64) -> Self {
        Self {
            hold_seconds,
            decay_seconds,
        }
    }

    /// Hold plus fade: the full lifetime of a message-less-since node
    #[inline]
    #[must_use]
    pub fn window_seconds(&self) -> f64 {
        self.hold_seconds + self.decay_seconds
    }

    /// # Errors
    /// Both durations must be positive, finite and at most
    /// [`MAX_DECAY_SECONDS`]
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("hold_seconds", self.hold_seconds),
            ("decay_seconds", self.decay_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{name} must be a positive number of seconds"));
            }
            if value > MAX_DECAY_SECONDS {
                return Err(format!("{name} must be at most {MAX_DECAY_SECONDS} seconds"));
            }
        }
        Ok(())
    }
}

/// Background decay task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Seconds between background decay passes
    pub interval_seconds: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60.0,
        }
    }
}

impl CleanupConfig {
    /// Tick period, floored at one millisecond
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds.max(0.001))
    }
}

/// Message history retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Messages kept per channel
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_messages: 100 }
    }
}

/// Channel tree limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Deepest accepted channel path
    pub max_channel_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_channel_depth: 8,
        }
    }
}

/// Layout generator settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Minimum share of the children region any materialized child receives
    pub min_extent: f64,
    /// Orientation of nested regions
    pub split: SplitAxis,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_extent: 0.02,
            split: SplitAxis::Fixed,
        }
    }
}

/// Palette assignment, consumed by the color service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// `increment` or `hash`
    pub assignment_mode: String,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            assignment_mode: "increment".to_string(),
        }
    }
}

/// Root configuration for Tree Signal
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSignalConfig {
    /// Hold and fade timings
    pub decay: DecayConfig,
    /// Background task cadence
    pub cleanup: CleanupConfig,
    /// Per-channel message retention
    pub history: HistoryConfig,
    /// Tree limits
    pub tree: TreeConfig,
    /// Layout generator settings
    pub layout: LayoutConfig,
    /// Palette settings
    pub colors: ColorsConfig,
}

impl TreeSignalConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With decay timings
    #[inline]
    #[must_use]
    pub fn with_decay(mut self, hold_seconds: f64, decay_seconds: f64) -> Self {
        self.decay = DecayConfig::new(hold_seconds, decay_seconds);
        self
    }

    /// With maximum channel depth
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.tree.max_channel_depth = depth;
        self
    }

    /// With minimum child extent
    #[inline]
    #[must_use]
    pub fn with_min_extent(mut self, min_extent: f64) -> Self {
        self.layout.min_extent = min_extent;
        self
    }

    /// With split axis convention
    #[inline]
    #[must_use]
    pub fn with_split(mut self, split: SplitAxis) -> Self {
        self.layout.split = split;
        self
    }

    /// Load from the discovered file (if any) and the process environment
    ///
    /// # Errors
    /// Unreadable or malformed file, bad environment values, or a result that
    /// fails [`validate`](Self::validate)
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match discover(explicit)? {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration");
                Self::from_file(&path)?
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults
    ///
    /// # Errors
    /// I/O or TOML syntax errors
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup`
    ///
    /// # Errors
    /// A variable that is set but does not parse
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_parse(&lookup, "TREE_SIGNAL_HOLD_SECONDS")? {
            self.decay.hold_seconds = v;
        }
        if let Some(v) = env_parse(&lookup, "TREE_SIGNAL_DECAY_SECONDS")? {
            self.decay.decay_seconds = v;
        }
        if let Some(v) = env_parse(&lookup, "TREE_SIGNAL_CLEANUP_INTERVAL_SECONDS")? {
            self.cleanup.interval_seconds = v;
        }
        if let Some(v) = env_parse(&lookup, "TREE_SIGNAL_MAX_CHANNEL_DEPTH")? {
            self.tree.max_channel_depth = v;
        }
        if let Some(v) = env_parse(&lookup, "TREE_SIGNAL_MIN_EXTENT")? {
            self.layout.min_extent = v;
        }
        if let Some(mode) = lookup("COLOR_ASSIGNMENT_MODE").filter(|m| !m.is_empty()) {
            self.colors.assignment_mode = mode;
        }
        Ok(())
    }

    /// # Errors
    /// Non-positive durations, zero depth, or `min_extent` outside `[0, 0.5]`
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decay.validate().map_err(ConfigError::Invalid)?;
        if !self.cleanup.interval_seconds.is_finite() || self.cleanup.interval_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "cleanup.interval_seconds must be positive".into(),
            ));
        }
        if self.tree.max_channel_depth == 0 {
            return Err(ConfigError::Invalid(
                "tree.max_channel_depth must be at least 1".into(),
            ));
        }
        if self.history.max_messages == 0 {
            return Err(ConfigError::Invalid(
                "history.max_messages must be at least 1".into(),
            ));
        }
        if !(0.0..=0.5).contains(&self.layout.min_extent) {
            return Err(ConfigError::Invalid(
                "layout.min_extent must lie within [0, 0.5]".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}

/// Find the configuration file
///
/// 1. explicit path (must exist)
/// 2. `TREE_SIGNAL_CONFIG`
/// 3. `./config.toml`
/// 4. `<config dir>/tree-signal/config.toml` (platform config directory)
/// 5. `~/.config/tree-signal/config.toml`
///
/// # Errors
/// An explicit path that does not exist
pub fn discover(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        });
    }

    let mut candidates = Vec::new();
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("./config.toml"));
    candidates.extend(user_config_paths());

    Ok(candidates.into_iter().find(|p| p.exists()))
}

/// Per-user locations: the platform config dir, then `~/.config`
fn user_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("tree-signal").join("config.toml"));
    }
    if let Some(home) = dirs::home_dir() {
        let path = home.join(".config").join("tree-signal").join("config.toml");
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = TreeSignalConfig::default();
        assert_eq!(config.decay.hold_seconds, 30.0);
        assert_eq!(config.decay.decay_seconds, 10.0);
        assert_eq!(config.cleanup.interval_seconds, 60.0);
        assert_eq!(config.history.max_messages, 100);
        assert_eq!(config.layout.min_extent, 0.02);
        assert_eq!(config.layout.split, SplitAxis::Fixed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[decay]\nhold_seconds = 5.0\n\n[layout]\nsplit = \"alternate\"").unwrap();

        let config = TreeSignalConfig::from_file(file.path()).unwrap();
        assert_eq!(config.decay.hold_seconds, 5.0);
        assert_eq!(config.decay.decay_seconds, 10.0);
        assert_eq!(config.layout.split, SplitAxis::Alternate);
        assert_eq!(config.tree.max_channel_depth, 8);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[decay\nhold_seconds = ").unwrap();
        let result = TreeSignalConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("TREE_SIGNAL_HOLD_SECONDS", "12.5"),
            ("TREE_SIGNAL_MAX_CHANNEL_DEPTH", "4"),
            ("COLOR_ASSIGNMENT_MODE", "hash"),
        ]
        .into_iter()
        .collect();

        let mut config = TreeSignalConfig::new().with_decay(1.0, 2.0);
        config
            .apply_env(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.decay.hold_seconds, 12.5);
        assert_eq!(config.decay.decay_seconds, 2.0);
        assert_eq!(config.tree.max_channel_depth, 4);
        assert_eq!(config.colors.assignment_mode, "hash");
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = TreeSignalConfig::new();
        let result =
            config.apply_env(|k| (k == "TREE_SIGNAL_MIN_EXTENT").then(|| "wide".to_string()));
        assert!(matches!(
            result,
            Err(ConfigError::Env { var: "TREE_SIGNAL_MIN_EXTENT", .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(TreeSignalConfig::new().with_decay(1.0, 0.0).validate().is_err());
        assert!(TreeSignalConfig::new().with_decay(-1.0, 1.0).validate().is_err());
        assert!(TreeSignalConfig::new().with_decay(1.0e13, 1.0).validate().is_err());
        assert!(TreeSignalConfig::new()
            .with_decay(MAX_DECAY_SECONDS, MAX_DECAY_SECONDS)
            .validate()
            .is_ok());
        assert!(TreeSignalConfig::new().with_max_depth(0).validate().is_err());
        assert!(TreeSignalConfig::new().with_min_extent(0.9).validate().is_err());
    }

    #[test]
    fn user_paths_end_in_tree_signal_config() {
        let paths = user_config_paths();
        assert!(paths
            .iter()
            .all(|p| p.ends_with(Path::new("tree-signal").join("config.toml"))));
        let unique: std::collections::HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
    }

    #[test]
    fn explicit_missing_file_errors() {
        let result = discover(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = TreeSignalConfig::new().with_decay(3.0, 4.0);
        let text = toml::to_string(&config).unwrap();
        let parsed: TreeSignalConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
