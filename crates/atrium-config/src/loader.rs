//! Configuration loading

use crate::error::{ConfigError, Result};
use crate::{ConfigFormat, HostConfig};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::Path;
use tracing::debug;

// ${VAR} or ${VAR:-default}
static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("env var pattern is valid")
});

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let value = read_value(path.as_ref())?;
    into_config(value)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<HostConfig> {
    into_config(parse_value(content, format)?)
}

/// Load a file and validate it
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let config = load_from_file(path)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}

/// Load and merge multiple configuration files
///
/// Files are merged in order, later files overriding earlier ones key by key.
/// The merged result is validated.
///
/// ```no_run
/// use atrium_config::load_and_merge;
///
/// let config = load_and_merge(&["config/base.yaml", "config/production.yaml"])?;
/// # Ok::<(), atrium_config::ConfigError>(())
/// ```
pub fn load_and_merge<P: AsRef<Path>>(paths: &[P]) -> Result<HostConfig> {
    if paths.is_empty() {
        return Err(ConfigError::Invalid(vec![
            "no configuration files provided".to_string(),
        ]));
    }

    let layers = paths
        .iter()
        .map(|p| read_value(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let merged = crate::merger::merge_layers(layers);
    let config = into_config(merged)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}

fn read_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let format = ConfigFormat::from_path(path)?;
    debug!(path = %path.display(), ?format, "Loading configuration");
    parse_value(&content, format)
}

fn parse_value(content: &str, format: ConfigFormat) -> Result<Value> {
    let expanded = expand_env_vars(content)?;

    match format {
        ConfigFormat::Yaml => {
            let value: Option<Value> =
                serde_yaml::from_str(&expanded).map_err(|e| ConfigError::parse("YAML", e))?;
            // An empty YAML document is null
            Ok(value.unwrap_or_else(|| Value::Object(serde_json::Map::new())))
        }
        ConfigFormat::Toml => {
            toml::from_str(&expanded).map_err(|e| ConfigError::parse("TOML", e))
        }
        ConfigFormat::Json => {
            serde_json::from_str(&expanded).map_err(|e| ConfigError::parse("JSON", e))
        }
    }
}

fn into_config(value: Value) -> Result<HostConfig> {
    serde_json::from_value(value).map_err(|e| ConfigError::parse("configuration", e))
}

/// Expand `${VAR}` and `${VAR:-default}` references
pub fn expand_env_vars(content: &str) -> Result<String> {
    let mut missing = None;

    let expanded = ENV_VAR.replace_all(content, |cap: &Captures<'_>| {
        let name = &cap[1];
        match (env::var(name), cap.get(3)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingEnvVar(name)),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const YAML_CONFIG: &str = r#"
server:
  listen: "0.0.0.0:9000"

plugins:
  dir: "/srv/atrium/plugins"
  packages_dir: "/srv/atrium/node_modules"
  watch: true

database:
  url: "sqlite:///var/lib/atrium/registry.db"
  pool_size: 8

logging:
  level: "debug"
  json: true
"#;

    #[test]
    fn test_load_yaml() {
        let config = load_from_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.plugins.dir, PathBuf::from("/srv/atrium/plugins"));
        assert_eq!(
            config.plugins.packages_dir,
            Some(PathBuf::from("/srv/atrium/node_modules"))
        );
        assert!(config.plugins.watch);
        assert_eq!(config.database.pool_size, 8);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = r#"
[database]
url = "sqlite::memory:"
"#;
        let config = load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.pool_size, 5);

        let json = r#"{"logging":{"level":"warn"}}"#;
        let config = load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = load_from_str("", ConfigFormat::Yaml).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = load_from_str("server: [yaml", ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("ATRIUM_TEST_PORT", "9090");
        env::set_var("ATRIUM_TEST_HOST", "0.0.0.0");

        let config = load_from_str(
            "server:\n  listen: \"${ATRIUM_TEST_HOST}:${ATRIUM_TEST_PORT}\"\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert_eq!(config.server.listen.to_string(), "0.0.0.0:9090");

        env::remove_var("ATRIUM_TEST_PORT");
        env::remove_var("ATRIUM_TEST_HOST");
    }

    #[test]
    fn test_env_var_with_default() {
        env::remove_var("ATRIUM_UNDEFINED_URL");

        let config = load_from_str(
            "database:\n  url: \"${ATRIUM_UNDEFINED_URL:-sqlite::memory:}\"\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
    }

    #[test]
    fn test_missing_env_var_no_default() {
        env::remove_var("ATRIUM_MISSING_VAR");

        let err = expand_env_vars("url: ${ATRIUM_MISSING_VAR}").unwrap_err();
        assert!(err.to_string().contains("ATRIUM_MISSING_VAR"));
    }

    #[test]
    fn test_load_and_merge_layers() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let local = dir.path().join("local.toml");
        fs::write(&base, YAML_CONFIG).unwrap();
        fs::write(&local, "[logging]\nlevel = \"trace\"\n").unwrap();

        let config = load_and_merge(&[&base, &local]).unwrap();
        assert_eq!(config.logging.level, "trace");
        // untouched keys of the same section survive
        assert!(config.logging.json);
        assert_eq!(config.database.pool_size, 8);
    }

    #[test]
    fn test_missing_file() {
        let err = load_from_file("/nonexistent/atrium.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
