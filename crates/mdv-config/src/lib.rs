//! Configuration management for mdv.
//!
//! Parses `mdv.toml` files with serde and discovers them in the current
//! directory or its parents. Missing files are not an error: every section
//! has defaults that match the stock viewer markup.
//!
//! ```toml
//! [viewer]
//! container_class = "markdown-viewer"
//! content_class = "markdown-body"
//!
//! [render]
//! frame_interval_ms = 16
//! busy_mutation = "drop"   # or "rerun"
//!
//! [theme]
//! default = "auto"         # light | dark | auto
//!
//! [diagrams]
//! kroki_url = "${KROKI_URL:-https://kroki.io}"
//! timeout_secs = 30
//! cache_entries = 256
//!
//! [copy]
//! feedback_ms = 2000
//! ```
//!
//! ## Environment Variable Expansion
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields: `viewer.container_class`, `viewer.content_class`,
//! `diagrams.kroki_url`.

mod expand;

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "mdv.toml";

/// Viewer configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Viewer markup conventions.
    pub viewer: ViewerConfig,
    /// Render scheduling.
    pub render: RenderConfig,
    /// Theme defaults.
    pub theme: ThemeConfig,
    /// Diagram rendering (optional section).
    pub diagrams: Option<DiagramsConfig>,
    /// Copy affordance.
    pub copy: CopyConfig,

    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Class names locating the observed container and the content root.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Class of the element the coordinator observes.
    pub container_class: String,
    /// Class of the element holding the rendered markdown body.
    pub content_class: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            container_class: "markdown-viewer".to_owned(),
            content_class: "markdown-body".to_owned(),
        }
    }
}

/// What the coordinator does with external mutations seen mid-pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyMutationPolicy {
    /// Ignore them; the pass is presumed to have caused them.
    #[default]
    Drop,
    /// Schedule one more full pass once the current one ends.
    Rerun,
}

/// Render scheduling configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Delay between a schedule request and the pass, in milliseconds.
    pub frame_interval_ms: u64,
    /// Handling of external mutations that arrive during a pass.
    pub busy_mutation: BusyMutationPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            busy_mutation: BusyMutationPolicy::Drop,
        }
    }
}

impl RenderConfig {
    /// Frame interval as a [`Duration`].
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// User's theme choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    /// Always light.
    Light,
    /// Always dark.
    Dark,
    /// Follow the system appearance.
    #[default]
    Auto,
}

impl ThemePreference {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemePreference {
    type Err = std::convert::Infallible;

    /// Unknown values fall back to [`ThemePreference::Auto`], matching how a
    /// corrupt stored value is treated. Config files are stricter: serde
    /// rejects unknown names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "light" => Self::Light,
            "dark" => Self::Dark,
            _ => Self::Auto,
        })
    }
}

/// Theme configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Preference used when nothing is stored yet.
    pub default: ThemePreference,
}

/// Kroki diagram rendering configuration.
#[derive(Debug, Deserialize)]
pub struct DiagramsConfig {
    /// Kroki server URL.
    pub kroki_url: String,
    /// HTTP timeout for one diagram, in seconds.
    #[serde(default = "default_diagram_timeout")]
    pub timeout_secs: u64,
    /// Rendered SVGs kept in memory, least recently used evicted first.
    #[serde(default = "default_diagram_cache_entries")]
    pub cache_entries: usize,
}

impl DiagramsConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Cache capacity as a [`NonZeroUsize`], clamping to 1 if zero.
    #[must_use]
    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

fn default_diagram_timeout() -> u64 {
    30
}

fn default_diagram_cache_entries() -> usize {
    256
}

/// Copy affordance configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// How long success/error feedback stays visible, in milliseconds.
    pub feedback_ms: u64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self { feedback_ms: 2000 }
    }
}

impl CopyConfig {
    /// Feedback delay as a [`Duration`].
    #[must_use]
    pub fn feedback_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`diagrams.kroki_url`").
        field: String,
        /// Error message (e.g., "${`KROKI_URL`} not set").
        message: String,
    },
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn require_class_name(value: &str, field: &str) -> Result<(), ConfigError> {
    require_non_empty(value, field)?;
    if value.split_whitespace().count() > 1 {
        return Err(ConfigError::Validation(format!(
            "{field} must be a single class name"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `mdv.toml` in the current directory and its parents, falling back
    /// to defaults when none is found.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit `config_path` doesn't exist, or if
    /// reading, parsing, expansion or validation fails.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::load_from_file(path);
        }

        let discovered = std::env::current_dir()
            .ok()
            .and_then(|cwd| Self::discover_from(&cwd));
        match discovered {
            Some(path) => Self::load_from_file(&path),
            None => {
                tracing::debug!("No mdv.toml found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Search for `mdv.toml` in `start` and its parents.
    #[must_use]
    pub fn discover_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;
        config.config_path = Some(path.to_path_buf());
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_class_name(&self.viewer.container_class, "viewer.container_class")?;
        require_class_name(&self.viewer.content_class, "viewer.content_class")?;

        if self.render.frame_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "render.frame_interval_ms must be greater than 0".to_owned(),
            ));
        }

        if let Some(diagrams) = &self.diagrams {
            require_non_empty(&diagrams.kroki_url, "diagrams.kroki_url")?;
            require_http_url(&diagrams.kroki_url, "diagrams.kroki_url")?;
            if diagrams.timeout_secs == 0 {
                return Err(ConfigError::Validation(
                    "diagrams.timeout_secs must be greater than 0".to_owned(),
                ));
            }
            if diagrams.cache_entries == 0 {
                return Err(ConfigError::Validation(
                    "diagrams.cache_entries must be greater than 0".to_owned(),
                ));
            }
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.viewer.container_class =
            expand::expand_env(&self.viewer.container_class, "viewer.container_class")?;
        self.viewer.content_class =
            expand::expand_env(&self.viewer.content_class, "viewer.content_class")?;

        if let Some(ref mut diagrams) = self.diagrams {
            diagrams.kroki_url = expand::expand_env(&diagrams.kroki_url, "diagrams.kroki_url")?;
        }

        Ok(())
    }
}
