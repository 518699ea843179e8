use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Main configuration structure for Sleuth
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Directory holding the records of the current run
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Run parameters
    #[serde(default)]
    pub run: RunConfig,

    /// Retry policy for a single unit of work
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker invocation configuration
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_state_dir() -> String {
    ".sleuth/run".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            run: RunConfig::default(),
            retry: RetryConfig::default(),
            workers: WorkersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunConfig {
    /// Hard ceiling on worker dispatches per run
    #[serde(default = "default_max_dispatches")]
    pub max_dispatches: u32,

    /// Maximum simultaneously running worker invocations
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Split fan-out analysis into sequential batches of this size
    #[serde(default)]
    pub analysis_batch_size: Option<usize>,

    /// Poll interval for background dispatches in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Phase or worker-kind names to skip
    #[serde(default)]
    pub skip: Vec<String>,

    /// Second defect-history reference bounding the forward history search
    #[serde(default)]
    pub forward_boundary: Option<String>,

    /// Word-set similarity at or above which two proposals with the same
    /// symbol set are the same theory (0, 1]
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f64,

    /// Evidence markers that indicate an external crash-reporting system
    #[serde(default = "default_crash_report_markers")]
    pub crash_report_markers: Vec<String>,
}

const fn default_max_dispatches() -> u32 {
    12
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_dedup_similarity() -> f64 {
    0.8
}

fn default_crash_report_markers() -> Vec<String> {
    vec![
        "syzbot".to_string(),
        "syzkaller".to_string(),
        "bugzilla".to_string(),
    ]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_dispatches: default_max_dispatches(),
            max_concurrency: default_max_concurrency(),
            analysis_batch_size: None,
            poll_interval_ms: default_poll_interval_ms(),
            skip: Vec::new(),
            forward_boundary: None,
            dedup_similarity: default_dedup_similarity(),
            crash_report_markers: default_crash_report_markers(),
        }
    }
}

impl RunConfig {
    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum worker invocations per unit of work (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_attempts() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    2_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Worker invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkersConfig {
    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Command used for worker kinds without their own entry
    #[serde(default)]
    pub default_command: Option<WorkerCommandConfig>,

    /// Commands keyed by worker-kind name (e.g. `hypothesis`)
    #[serde(default)]
    pub commands: BTreeMap<String, WorkerCommandConfig>,
}

const fn default_timeout_secs() -> u64 {
    1800
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            default_command: None,
            commands: BTreeMap::new(),
        }
    }
}

/// External command implementing one worker kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerCommandConfig {
    /// Program to execute
    pub command: String,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (defaults to the current directory)
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation for file logs: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
