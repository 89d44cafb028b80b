//! Configuration validation

use crate::error::{ConfigError, Result};
use crate::HostConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate configuration, reporting every problem found
pub fn validate_config(config: &HostConfig) -> Result<()> {
    let mut problems = Vec::new();

    validate_server(config, &mut problems);
    validate_plugins(config, &mut problems);
    validate_database(config, &mut problems);
    validate_logging(config, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

fn validate_server(config: &HostConfig, problems: &mut Vec<String>) {
    if config.server.shutdown_timeout_secs == 0 {
        problems.push("server.shutdown_timeout_secs must be > 0".to_string());
    }

    if config.server.shutdown_timeout_secs > 300 {
        tracing::warn!("server.shutdown_timeout_secs is very high (>5 minutes)");
    }
}

fn validate_plugins(config: &HostConfig, problems: &mut Vec<String>) {
    if config.plugins.dir.as_os_str().is_empty() {
        problems.push("plugins.dir cannot be empty".to_string());
    }

    if config.plugins.packages_dir.is_some() && config.plugins.package_prefix.is_empty() {
        problems.push(
            "plugins.package_prefix cannot be empty when packages_dir is set".to_string(),
        );
    }
}

fn validate_database(config: &HostConfig, problems: &mut Vec<String>) {
    if !config.database.url.starts_with("sqlite:") {
        problems.push(format!(
            "database.url must be a sqlite: URL, got '{}'",
            config.database.url
        ));
    }

    if config.database.pool_size == 0 {
        problems.push("database.pool_size must be > 0".to_string());
    }
}

fn validate_logging(config: &HostConfig, problems: &mut Vec<String>) {
    // Full filter directives ("info,atrium=debug") are passed through as-is
    let level = config.logging.level.trim();
    if level.is_empty() {
        problems.push("logging.level cannot be empty".to_string());
    } else if !level.contains(&['=', ','][..]) && !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        problems.push(format!(
            "logging.level '{level}' is not one of {}",
            LOG_LEVELS.join(", ")
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&HostConfig::default()).is_ok());
    }

    #[test]
    fn test_every_problem_reported() {
        let mut config = HostConfig::default();
        config.server.shutdown_timeout_secs = 0;
        config.database.url = "postgres://localhost/atrium".to_string();
        config.database.pool_size = 0;
        config.logging.level = "loud".to_string();

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.problems().len(), 4);
    }

    #[test]
    fn test_empty_plugins_dir() {
        let mut config = HostConfig::default();
        config.plugins.dir = PathBuf::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_filter_directive_accepted() {
        let mut config = HostConfig::default();
        config.logging.level = "info,atrium_plugin_runtime=debug".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
