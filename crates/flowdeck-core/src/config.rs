use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowdeckError, Result};
use crate::types::Variant;

/// Top-level Flowdeck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub workbench: WorkbenchConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbenchConfig {
    /// Which element palette and behaviours to enable.
    #[serde(default)]
    pub variant: Variant,
    /// Maximum number of log entries kept; the oldest are evicted first.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Buffer size of the change-event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            log_capacity: default_log_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_log_capacity() -> usize { 1000 }
fn default_event_capacity() -> usize { 256 }

/// Timing and outcome knobs of the simulated executor.
///
/// Delay bounds left unset fall back to the variant's defaults
/// (generic 400-1200 ms, agent 800-1200 ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub min_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Pause between auto-run steps. Unset uses 1200 ms (generic) or 1000 ms (agent).
    #[serde(default)]
    pub step_interval_ms: Option<u64>,
    /// Delay between the final step and the automatic stop.
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,
    /// Probability that a condition element passes.
    #[serde(default = "default_condition_pass_rate")]
    pub condition_pass_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: None,
            max_delay_ms: None,
            step_interval_ms: None,
            completion_delay_ms: default_completion_delay_ms(),
            condition_pass_rate: default_condition_pass_rate(),
        }
    }
}

fn default_completion_delay_ms() -> u64 { 500 }
fn default_condition_pass_rate() -> f64 { 0.7 }

impl ExecutionConfig {
    /// Resolve the executor delay bounds for a variant. Always `min <= max`.
    pub fn delay_range(&self, variant: Variant) -> (u64, u64) {
        let (min, max) = match variant {
            Variant::Generic => (400, 1200),
            Variant::Agent => (800, 1200),
        };
        let min = self.min_delay_ms.unwrap_or(min);
        let max = self.max_delay_ms.unwrap_or(max).max(min);
        (min, max)
    }

    /// Resolve the auto-run inter-step interval for a variant.
    pub fn step_interval(&self, variant: Variant) -> u64 {
        self.step_interval_ms.unwrap_or(match variant {
            Variant::Generic => 1200,
            Variant::Agent => 1000,
        })
    }

    /// Pass rate clamped to `[0, 1]`.
    pub fn pass_rate(&self) -> f64 {
        if self.condition_pass_rate.is_nan() {
            return default_condition_pass_rate();
        }
        self.condition_pass_rate.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Key the saved workflow lives under.
    #[serde(default = "default_storage_key")]
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            key: default_storage_key(),
        }
    }
}

fn default_storage_path() -> String { "~/.flowdeck/workflows.db".to_string() }
fn default_storage_key() -> String { "workflow_data".to_string() }

impl StorageConfig {
    /// Resolve the database path (expand ~).
    pub fn db_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowdeckError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowdeckError::Config(e.to_string()))
    }

    /// Config file in the user's home directory, if `HOME` is set.
    pub fn home_config_path() -> Option<PathBuf> {
        dirs_home().map(|h| h.join(".flowdeck").join("config.toml"))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
