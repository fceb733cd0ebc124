//! Configuration for reelsmith.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{ReelError, ReelResult};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "reelsmith.toml";

/// Main configuration for reelsmith.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Task dispatch settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Candidate selection settings.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// External command used to download candidate media.
    #[serde(default)]
    pub fetcher: CommandConfig,

    /// Named generation tasks backed by external commands.
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Default timeout for external commands (in seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enabled. When disabled the store is purely in-memory.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Size budget for all live entries, in bytes of serialized JSON.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,

    /// TTL applied when a task does not define its own.
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Snapshot file location.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Parameter fields ignored when computing cache keys.
    #[serde(default = "default_volatile_fields")]
    pub volatile_fields: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: default_max_size_bytes(),
            default_ttl_secs: default_cache_ttl(),
            snapshot_path: default_snapshot_path(),
            volatile_fields: default_volatile_fields(),
        }
    }
}

impl CacheConfig {
    /// Default TTL as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

fn default_max_size_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(".reelsmith/cache.json")
}

fn default_volatile_fields() -> Vec<String> {
    [
        "request_id",
        "correlation_id",
        "trace_id",
        "timeout",
        "timeout_secs",
        "timestamp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Task dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of executors running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-task timeout (in seconds).
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

impl DispatchConfig {
    /// Per-task timeout as a [`Duration`].
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_task_timeout() -> u64 {
    120
}

/// Candidate selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Weight of the external relevance score (0.0 - 1.0).
    #[serde(default = "default_relevance_weight")]
    pub relevance_weight: f64,

    /// Weight of the local quality heuristic (0.0 - 1.0).
    #[serde(default = "default_quality_weight")]
    pub quality_weight: f64,

    /// Bonus added the first time a category is chosen.
    #[serde(default = "default_diversity_bonus")]
    pub diversity_bonus: f64,

    /// Maximum picks per category before the cap is relaxed.
    #[serde(default = "default_category_cap")]
    pub category_cap: usize,

    /// Maximum simultaneous media downloads.
    #[serde(default = "default_max_parallel_fetches")]
    pub max_parallel_fetches: usize,

    /// Per-download timeout (in seconds).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Clip length the quality heuristic favours.
    #[serde(default = "default_target_duration")]
    pub target_duration_secs: f64,

    /// Favour vertical footage.
    #[serde(default = "default_true")]
    pub prefer_portrait: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            relevance_weight: default_relevance_weight(),
            quality_weight: default_quality_weight(),
            diversity_bonus: default_diversity_bonus(),
            category_cap: default_category_cap(),
            max_parallel_fetches: default_max_parallel_fetches(),
            fetch_timeout_secs: default_fetch_timeout(),
            target_duration_secs: default_target_duration(),
            prefer_portrait: true,
        }
    }
}

impl SelectionConfig {
    /// Per-download timeout as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_relevance_weight() -> f64 {
    0.7
}

fn default_quality_weight() -> f64 {
    0.3
}

fn default_diversity_bonus() -> f64 {
    0.05
}

fn default_category_cap() -> usize {
    2
}

fn default_max_parallel_fetches() -> usize {
    3
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_target_duration() -> f64 {
    10.0
}

/// An external command and its fixed arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Command to execute.
    #[serde(default)]
    pub command: String,

    /// Default arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    /// Creates a new command configuration.
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether a command has been configured.
    pub fn is_configured(&self) -> bool {
        !self.command.trim().is_empty()
    }
}

/// A generation task backed by an external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Command to execute.
    pub command: String,

    /// Default arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Cache TTL for this task (in seconds). Falls back to the cache default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// Text returned when the command fails.
    #[serde(default)]
    pub fallback: String,
}

impl TaskConfig {
    /// Creates a new task configuration.
    pub fn new(command: &str, args: &[&str], fallback: &str) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ttl_secs: None,
            fallback: fallback.to_string(),
        }
    }

    /// The command invocation of this task.
    pub fn invocation(&self) -> CommandConfig {
        CommandConfig {
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> ReelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ReelResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Creates default configuration.
    pub fn default_config() -> Self {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            "theme".to_string(),
            TaskConfig::new("llm", &["generate", "--task"], "Why do cats always land on their feet?"),
        );
        tasks.insert(
            "script".to_string(),
            TaskConfig::new(
                "llm",
                &["generate", "--task"],
                "Here is a surprising fact you probably did not know.",
            ),
        );

        Self {
            general: GeneralConfig::default(),
            cache: CacheConfig::default(),
            dispatch: DispatchConfig::default(),
            selection: SelectionConfig::default(),
            fetcher: CommandConfig::default(),
            tasks,
        }
    }

    /// Tries to load configuration from the current directory, then from the
    /// user configuration directory, or uses the default.
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::load(CONFIG_FILE_NAME) {
            return config;
        }

        dirs::config_dir()
            .map(|dir| dir.join("reelsmith").join(CONFIG_FILE_NAME))
            .and_then(|path| Self::load(path).ok())
            .unwrap_or_else(Self::default_config)
    }

    /// Rejects settings the orchestration core cannot operate with.
    pub fn validate(&self) -> ReelResult<()> {
        let timeouts = [
            ("general.timeout_secs", self.general.timeout_secs),
            ("dispatch.task_timeout_secs", self.dispatch.task_timeout_secs),
            ("selection.fetch_timeout_secs", self.selection.fetch_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(ReelError::config(format!("{} must be greater than 0", name)));
            }
        }

        if self.cache.max_size_bytes == 0 {
            return Err(ReelError::config("cache.max_size_bytes must be greater than 0"));
        }
        if self.dispatch.max_concurrency == 0 {
            return Err(ReelError::config("dispatch.max_concurrency must be greater than 0"));
        }
        if self.selection.max_parallel_fetches == 0 {
            return Err(ReelError::config(
                "selection.max_parallel_fetches must be greater than 0",
            ));
        }

        let weights = [
            ("relevance_weight", self.selection.relevance_weight),
            ("quality_weight", self.selection.quality_weight),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ReelError::config(format!(
                    "selection.{} must be within [0, 1], got {}",
                    name, weight
                )));
            }
        }
        if self.selection.relevance_weight + self.selection.quality_weight == 0.0 {
            return Err(ReelError::config("selection weights cannot both be zero"));
        }
        if self.selection.diversity_bonus.is_nan() || self.selection.diversity_bonus < 0.0 {
            return Err(ReelError::config("selection.diversity_bonus must be non-negative"));
        }
        let target = self.selection.target_duration_secs;
        if !target.is_finite() || target <= 0.0 {
            return Err(ReelError::config(
                "selection.target_duration_secs must be a positive number",
            ));
        }

        for (name, task) in &self.tasks {
            if task.command.trim().is_empty() {
                return Err(ReelError::config(format!("tasks.{} has no command", name)));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
