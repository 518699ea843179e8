use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::WorkerKind;
use crate::services::task_graph::{known_skip_names, MANDATORY_PHASES};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be at least 1")]
    InvalidMaxConcurrency(usize),

    #[error("Invalid poll_interval_ms: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid dedup_similarity: {0}. Must be in (0, 1]")]
    InvalidSimilarity(f64),

    #[error("Invalid analysis_batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Unknown skip name: {0}")]
    UnknownSkip(String),

    #[error("Phase {0} cannot be skipped")]
    MandatoryPhase(String),

    #[error("Unknown worker kind in workers.commands: {0}")]
    UnknownWorkerKind(String),

    #[error("State directory cannot be empty")]
    EmptyStateDir,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .sleuth/config.yaml (project config)
    /// 3. .sleuth/local.yaml (local overrides, optional)
    /// 4. Environment variables (SLEUTH_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sleuth/config.yaml"))
            .merge(Yaml::file(".sleuth/local.yaml"))
            .merge(Env::prefixed("SLEUTH_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring `SLEUTH_*`
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SLEUTH_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.state_dir.trim().is_empty() {
            return Err(ConfigError::EmptyStateDir);
        }

        let run = &config.run;
        if run.max_concurrency == 0 {
            return Err(ConfigError::InvalidMaxConcurrency(run.max_concurrency));
        }
        if run.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(run.poll_interval_ms));
        }
        if !(run.dedup_similarity > 0.0 && run.dedup_similarity <= 1.0) {
            return Err(ConfigError::InvalidSimilarity(run.dedup_similarity));
        }
        if run.analysis_batch_size == Some(0) {
            return Err(ConfigError::InvalidBatchSize(0));
        }

        let known = known_skip_names();
        for name in &run.skip {
            let normalized = name.trim().to_lowercase();
            if MANDATORY_PHASES.contains(&normalized.as_str()) {
                return Err(ConfigError::MandatoryPhase(normalized));
            }
            if !known.contains(normalized.as_str()) {
                return Err(ConfigError::UnknownSkip(name.clone()));
            }
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.max_attempts > 1
            && config.retry.initial_backoff_ms >= config.retry.max_backoff_ms
        {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if let Some(name) = config
            .workers
            .commands
            .keys()
            .find(|k| WorkerKind::from_str(k).is_none())
        {
            return Err(ConfigError::UnknownWorkerKind(name.clone()));
        }
        let commands = config
            .workers
            .commands
            .iter()
            .map(|(kind, cmd)| (kind.as_str(), cmd))
            .chain(config.workers.default_command.iter().map(|cmd| ("default", cmd)));
        for (kind, command) in commands {
            if command.command.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "worker command for '{kind}' cannot be empty"
                )));
            }
        }
        if config.workers.timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "workers.timeout_secs must be at least 1".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::WorkerCommandConfig;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.run.max_dispatches, 12);
        assert_eq!(config.run.max_concurrency, 4);
        assert_eq!(config.state_dir, ".sleuth/run");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
state_dir: /tmp/sleuth-run
run:
  max_dispatches: 5
  skip: [crash-report]
  forward_boundary: v6.9
retry:
  max_attempts: 3
workers:
  timeout_secs: 60
  commands:
    hypothesis:
      command: ./bin/hypothesis
      args: [--json]
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.state_dir, "/tmp/sleuth-run");
        assert_eq!(config.run.max_dispatches, 5);
        assert_eq!(config.run.max_concurrency, 4);
        assert!(config.run.is_skipped("Crash-Report"));
        assert_eq!(config.run.forward_boundary.as_deref(), Some("v6.9"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.workers.commands["hypothesis"].args, vec!["--json"]);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.run.max_concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrency(0))
        ));
    }

    #[test]
    fn test_validate_similarity_bounds() {
        let mut config = Config::default();
        config.run.dedup_similarity = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidSimilarity(_))
        ));
        config.run.dedup_similarity = 1.0;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_skip_names() {
        let mut config = Config::default();
        config.run.skip = vec!["history-search".to_string(), "analysis".to_string()];
        assert!(ConfigLoader::validate(&config).is_ok());

        config.run.skip = vec!["Aggregation".to_string()];
        match ConfigLoader::validate(&config) {
            Err(ConfigError::MandatoryPhase(name)) => assert_eq!(name, "aggregation"),
            other => panic!("Expected MandatoryPhase error, got {other:?}"),
        }

        config.run.skip = vec!["bisect".to_string()];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownSkip(_))
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30000, 10000))
        ));

        config.retry.max_attempts = 1;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_unknown_worker_kind() {
        let mut config = Config::default();
        config.workers.commands.insert(
            "bisect".to_string(),
            WorkerCommandConfig {
                command: "./bisect".to_string(),
                args: vec![],
                working_dir: None,
                env: Default::default(),
            },
        );
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownWorkerKind(_))
        ));
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogFormat(format)) => assert_eq!(format, "xml"),
            _ => panic!("Expected InvalidLogFormat error"),
        }
    }

    #[test]
    fn test_env_override() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "run:\n  max_dispatches: 5\nlogging:\n  level: warn").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("SLEUTH_RUN__MAX_DISPATCHES", Some("20")),
                ("SLEUTH_LOGGING__FORMAT", Some("json")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.run.max_dispatches, 20, "Env should win over the file");
                assert_eq!(config.logging.level, "warn");
                assert_eq!(config.logging.format, "json");
            },
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "run:\n  max_concurrency: 0").unwrap();
        file.flush().unwrap();

        temp_env::with_vars_unset(["SLEUTH_RUN__MAX_CONCURRENCY"], || {
            let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
            assert!(err.to_string().contains("max_concurrency"));
        });
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "run:\n  max_dispatches: 5\nlogging:\n  level: info\n  format: json").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "run:\n  max_dispatches: 15\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.run.max_dispatches, 15, "Override should win");
        assert_eq!(config.logging.level, "debug", "Override should win for nested fields");
        assert_eq!(config.logging.format, "json", "Base value should persist when not overridden");
    }
}
