//! Plugin manifest model and validation
//!
//! A manifest is the static descriptor shipped with every plugin package.
//! Manifests are validated as raw documents first so that every violation is
//! reported, then deserialized into [`Manifest`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Plugin id pattern: lowercase kebab-case starting with a letter
pub static PLUGIN_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("plugin id pattern is valid"));

/// Fields every manifest must carry as non-empty strings
pub const REQUIRED_FIELDS: [&str; 4] = ["id", "name", "version", "entryPoint"];

/// File names probed for a manifest inside a plugin directory, in order
pub const MANIFEST_FILE_NAMES: [&str; 4] =
    ["plugin.json", "plugin.yaml", "plugin.yml", "plugin.toml"];

/// Check whether a string is a valid plugin id
pub fn is_valid_plugin_id(id: &str) -> bool {
    PLUGIN_ID_PATTERN.is_match(id)
}

/// Validated plugin manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Globally unique plugin id
    pub id: String,

    /// Display name
    pub name: String,

    /// Semantic version
    pub version: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Author
    #[serde(default)]
    pub author: String,

    /// Reference to the plugin's entry module
    pub entry_point: String,

    /// Optional front-end counterpart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_entry_point: Option<String>,

    /// Icon name or path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Permission key -> human readable description
    #[serde(default)]
    pub permissions: BTreeMap<String, String>,

    /// UI menu registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<MenuDescriptor>,

    /// Recognized configuration options
    #[serde(default)]
    pub config: BTreeMap<String, ConfigOption>,

    /// Plugins that must be installed and active first
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Menu entry a plugin contributes to the host UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuDescriptor {
    /// Menu label
    pub label: String,

    /// Client route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Sort order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,

    /// Anything else the client understands
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Type of a configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    /// Single line string
    String,
    /// Multi line text
    Text,
    /// Number
    Number,
    /// Boolean
    Boolean,
    /// One of a fixed set of values
    Select,
}

/// A recognized configuration option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    /// Option type
    #[serde(rename = "type")]
    pub kind: ConfigType,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values for `select` options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

impl Manifest {
    /// Parse and validate a manifest document
    pub fn parse(content: &str, format: ManifestFormat) -> Result<Self, ManifestError> {
        let value = format.to_value(content)?;
        Self::from_value(value)
    }

    /// Read, parse and validate a manifest file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let format = ManifestFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::single(format!("failed to read manifest: {e}")))?;
        Self::parse(&content, format)
    }

    /// Validate a raw document and deserialize it
    pub fn from_value(value: Value) -> Result<Self, ManifestError> {
        let violations = ManifestValidator::new().validate(&value);
        if !violations.is_empty() {
            return Err(ManifestError { violations });
        }

        serde_json::from_value(value).map_err(|e| ManifestError::single(e.to_string()))
    }

    /// Configuration object holding every option's default value
    pub fn default_config(&self) -> Map<String, Value> {
        self.config
            .iter()
            .filter_map(|(key, option)| option.default.clone().map(|v| (key.clone(), v)))
            .collect()
    }
}

/// Manifest validation failure listing every violation found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestError {
    /// Violations, in the order they were detected
    pub violations: Vec<String>,
}

impl ManifestError {
    fn single(msg: impl Into<String>) -> Self {
        Self {
            violations: vec![msg.into()],
        }
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid manifest: {}", self.violations.join("; "))
    }
}

impl std::error::Error for ManifestError {}

/// Manifest document format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// JSON
    Json,
    /// YAML
    Yaml,
    /// TOML
    Toml,
}

impl ManifestFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ManifestError::single(format!(
                "unsupported manifest format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    fn to_value(self, content: &str) -> Result<Value, ManifestError> {
        let parsed = match self {
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| ManifestError::single(format!("failed to parse manifest: {e}")))
    }
}

/// Validates raw manifest documents against the fixed manifest schema
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestValidator;

impl ManifestValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self
    }

    /// Validate a document, returning every violation (empty when valid)
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let Some(doc) = value.as_object() else {
            return vec!["manifest must be an object".to_string()];
        };

        let mut violations = Vec::new();

        for field in REQUIRED_FIELDS {
            match doc.get(field) {
                None | Some(Value::Null) => violations.push(format!("{field} is required")),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    violations.push(format!("{field} must not be empty"));
                }
                Some(Value::String(_)) => {}
                Some(_) => violations.push(format!("{field} must be a string")),
            }
        }

        let id = doc.get("id").and_then(Value::as_str);
        if let Some(id) = id {
            if !id.is_empty() && !is_valid_plugin_id(id) {
                violations.push(format!(
                    "id '{id}' must match {}",
                    PLUGIN_ID_PATTERN.as_str()
                ));
            }
        }

        if let Some(version) = doc.get("version").and_then(Value::as_str) {
            if !version.is_empty() && semver::Version::parse(version).is_err() {
                violations.push(format!("version '{version}' is not a semantic version"));
            }
        }

        if let Some(deps) = doc.get("dependencies") {
            match deps.as_array() {
                Some(items) => {
                    for dep in items {
                        match dep.as_str() {
                            Some(dep) if Some(dep) == id => {
                                violations.push(format!("plugin cannot depend on itself ({dep})"));
                            }
                            Some(dep) if !is_valid_plugin_id(dep) => {
                                violations.push(format!("dependency '{dep}' is not a valid plugin id"));
                            }
                            Some(_) => {}
                            None => violations.push("dependencies must be strings".to_string()),
                        }
                    }
                }
                None => violations.push("dependencies must be an array".to_string()),
            }
        }

        if let Some(permissions) = doc.get("permissions") {
            match permissions.as_object() {
                Some(map) if map.values().all(Value::is_string) => {}
                _ => violations.push("permissions must map keys to descriptions".to_string()),
            }
        }

        if let Some(config) = doc.get("config") {
            match config.as_object() {
                Some(options) => {
                    for (key, option) in options {
                        if let Err(e) = serde_json::from_value::<ConfigOption>(option.clone()) {
                            violations.push(format!("config option '{key}': {e}"));
                        }
                    }
                }
                None => violations.push("config must be an object".to_string()),
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> Value {
        json!({
            "id": "hello-world",
            "name": "Hello World",
            "version": "1.0.0",
            "entryPoint": "hello_world",
            "permissions": { "read": "read access" },
            "config": {
                "greeting": { "type": "string", "label": "Greeting", "default": "hello" },
                "loud": { "type": "boolean", "label": "Shout" }
            },
            "menu": { "label": "Hello", "path": "/hello", "badge": "new" }
        })
    }

    #[test]
    fn test_valid_manifest() {
        let manifest = Manifest::from_value(valid_doc()).unwrap();
        assert_eq!(manifest.id, "hello-world");
        assert_eq!(manifest.entry_point, "hello_world");
        assert_eq!(manifest.permissions.len(), 1);
        assert_eq!(manifest.config["greeting"].kind, ConfigType::String);

        let menu = manifest.menu.unwrap();
        assert_eq!(menu.label, "Hello");
        assert_eq!(menu.extra["badge"], "new");
    }

    #[test]
    fn test_missing_required_fields_are_all_reported() {
        let err = Manifest::from_value(json!({ "name": "No id" })).unwrap_err();
        assert!(err.violations.contains(&"id is required".to_string()));
        assert!(err.violations.contains(&"version is required".to_string()));
        assert!(err.violations.contains(&"entryPoint is required".to_string()));
        assert!(!err.violations.iter().any(|v| v.starts_with("name")));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        for bad in ["Hello", "1plugin", "hello_world", "-x", "hello world"] {
            let mut doc = valid_doc();
            doc["id"] = json!(bad);
            assert!(Manifest::from_value(doc).is_err(), "{bad} should be rejected");
        }
        assert!(is_valid_plugin_id("a"));
        assert!(is_valid_plugin_id("payroll-export-2"));
    }

    #[test]
    fn test_non_semver_version_rejected() {
        let mut doc = valid_doc();
        doc["version"] = json!("1.0");
        let err = Manifest::from_value(doc).unwrap_err();
        assert!(err.to_string().contains("not a semantic version"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut doc = valid_doc();
        doc["dependencies"] = json!(["hello-world"]);
        assert!(Manifest::from_value(doc).is_err());
    }

    #[test]
    fn test_bad_config_option_type_rejected() {
        let mut doc = valid_doc();
        doc["config"]["greeting"]["type"] = json!("color");
        let err = Manifest::from_value(doc).unwrap_err();
        assert!(err.violations[0].starts_with("config option 'greeting'"));
    }

    #[test]
    fn test_default_config() {
        let manifest = Manifest::from_value(valid_doc()).unwrap();
        let defaults = manifest.default_config();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["greeting"], "hello");
    }

    #[test]
    fn test_parse_yaml_and_toml() {
        let yaml = "id: payroll\nname: Payroll\nversion: 0.2.0\nentryPoint: payroll\n";
        let manifest = Manifest::parse(yaml, ManifestFormat::Yaml).unwrap();
        assert_eq!(manifest.id, "payroll");

        let toml = "id = \"tasks\"\nname = \"Tasks\"\nversion = \"2.1.0-beta.1\"\nentryPoint = \"tasks\"\n";
        let manifest = Manifest::parse(toml, ManifestFormat::Toml).unwrap();
        assert_eq!(manifest.version, "2.1.0-beta.1");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ManifestFormat::from_path(Path::new("plugin.yml")).unwrap(),
            ManifestFormat::Yaml
        );
        assert!(ManifestFormat::from_path(Path::new("plugin.ini")).is_err());
    }
}
