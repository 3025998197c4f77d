//! Configuration module for the resource resolution service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `STRATA_` and use double underscores
//! to separate nested levels:
//! - `STRATA_POLL__INTERVAL_MS=500` sets `poll.interval_ms`
//! - `STRATA_WEIGHTS__RULES_FILE=/etc/strata/weights.toml` sets `weights.rules_file`
//! - `STRATA_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directory holding the workspace configuration.
pub const CONFIG_DIR: &str = ".strata";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .strata is located).
    /// Relative provider roots are resolved against it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Change poller settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Weight rules for ordering providers and candidate locations
    #[serde(default)]
    pub weights: WeightsConfig,

    /// Namespaces by kind, in declaration order
    #[serde(default)]
    pub namespaces: IndexMap<String, NamespaceConfig>,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollConfig {
    /// Interval between poll ticks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Process-wide floor for any watcher delay or poll interval
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WeightsConfig {
    /// Optional TOML file with `[[rule]]` entries, hot-reloaded when it changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,

    /// Inline rules, consulted before the rules file
    #[serde(default)]
    pub rules: Vec<WeightRuleConfig>,

    /// Watch the rules file and rebuild the rule table on change
    #[serde(default = "default_true")]
    pub watch_rules_file: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WeightRuleConfig {
    /// Regular expression matched against physical location identifiers
    pub pattern: String,
    pub weight: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NamespaceConfig {
    /// Logical context the namespace is rooted at
    #[serde(default = "default_context")]
    pub context: String,

    /// Provider declarations; order breaks ties when no weight is given
    #[serde(default)]
    pub providers: Vec<ProviderDecl>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Filesystem,
    Bundle,
    Host,
    Naming,
    Null,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderDecl {
    pub kind: ProviderKind,

    /// Backend root: a directory for filesystem/host, a list of bundle
    /// directories separated by the platform path separator for bundles
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Explicit weight; overrides weight rules and declaration order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,

    /// Refuse writes even when the backend could accept them
    #[serde(default = "default_false")]
    pub read_only: bool,

    /// Manifest file name inside each bundle directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,

    /// Environment variable prefix for the naming provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `strata::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_interval_ms() -> u64 { 2000 }
fn default_min_interval_ms() -> u64 { 100 }
fn default_context() -> String { "/".to_string() }
fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_log_level() -> String { "warn".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            poll: PollConfig::default(),
            weights: WeightsConfig::default(),
            namespaces: IndexMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            rules: Vec::new(),
            watch_rules_file: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl ProviderDecl {
    /// A filesystem provider rooted at `root`.
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: ProviderKind::Filesystem,
            root: Some(root.into()),
            weight: None,
            read_only: false,
            manifest: None,
            prefix: None,
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Namespaces used when the configuration declares none.
pub fn default_namespaces() -> IndexMap<String, NamespaceConfig> {
    let mut namespaces = IndexMap::new();

    namespaces.insert(
        "config".to_string(),
        NamespaceConfig {
            context: default_context(),
            providers: vec![ProviderDecl::filesystem("config")],
        },
    );

    namespaces.insert(
        "app".to_string(),
        NamespaceConfig {
            context: default_context(),
            providers: vec![ProviderDecl::filesystem(".")],
        },
    );

    namespaces
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .strata directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings.restore_declaration_order(&config_path);
                settings.fill_defaults();
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                settings.restore_declaration_order(path.as_ref());
                settings.fill_defaults();
                settings
            })
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore
            // stays inside field names
            .merge(Env::prefixed("STRATA_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Put namespaces back in the order the config file declares them.
    ///
    /// Figment merges into sorted dictionaries, so the order is read again
    /// from the file itself. Namespaces only set through the environment
    /// follow the declared ones.
    fn restore_declaration_order(&mut self, config_path: &Path) {
        let Ok(content) = std::fs::read_to_string(config_path) else {
            return;
        };
        let table: toml::Table = match toml::from_str(&content) {
            Ok(table) => table,
            Err(e) => {
                tracing::debug!("[config] namespace order not restored: {e}");
                return;
            }
        };
        let Some(declared) = table.get("namespaces").and_then(toml::Value::as_table) else {
            return;
        };

        let mut ordered = IndexMap::with_capacity(self.namespaces.len());
        for name in declared.keys() {
            if let Some(config) = self.namespaces.shift_remove(name) {
                ordered.insert(name.clone(), config);
            }
        }
        ordered.extend(self.namespaces.drain(..));
        self.namespaces = ordered;
    }

    fn fill_defaults(&mut self) {
        if self.namespaces.is_empty() {
            self.namespaces = default_namespaces();
        }
    }

    /// Find the workspace config by looking for a .strata directory,
    /// searching from the current directory up to the filesystem root.
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .strata is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }

    /// Resolve a configured path against the workspace root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.workspace_root {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file and a commented weight rules file
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_dir = PathBuf::from(CONFIG_DIR);
        let config_path = config_dir.join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        settings.fill_defaults();
        settings.weights.rules_file = Some(config_dir.join("weights.toml"));

        settings.save(&config_path)?;
        Self::create_default_weights_file(&config_dir, force)?;

        Ok(config_path)
    }

    fn create_default_weights_file(
        config_dir: &Path,
        force: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let weights_path = config_dir.join("weights.toml");

        if !force && weights_path.exists() {
            return Ok(());
        }

        let default_content = r#"# Weight rules for provider and candidate ordering.
#
# Each rule's pattern is a regular expression matched against a physical
# location identifier (e.g. "fs:/srv/app/config" or "bundle:/opt/ext/core").
# Rules are checked in order; the first match wins. Unmatched locations get
# weight 0. Higher weights take precedence.
#
# [[rule]]
# pattern = "^fs:.*/overrides"
# weight = 100
#
# [[rule]]
# pattern = "^bundle:.*/core$"
# weight = -10
"#;

        std::fs::write(&weights_path, default_content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.poll.interval_ms, 2000);
        assert_eq!(settings.poll.min_interval_ms, 100);
        assert!(settings.weights.watch_rules_file);
        assert!(settings.namespaces.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[poll]
interval_ms = 250

[[weights.rules]]
pattern = "overrides"
weight = 50

[namespaces.config]
context = "/"

[[namespaces.config.providers]]
kind = "filesystem"
root = "/srv/overrides"
weight = 10

[[namespaces.config.providers]]
kind = "bundle"
root = "/opt/bundles"
manifest = "MANIFEST"

[[namespaces.config.providers]]
kind = "naming"
prefix = "APP"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.poll.interval_ms, 250);
        // Unspecified values keep their defaults
        assert_eq!(settings.poll.min_interval_ms, 100);
        assert_eq!(
            settings.weights.rules,
            vec![WeightRuleConfig {
                pattern: "overrides".to_string(),
                weight: 50
            }]
        );

        assert_eq!(settings.namespaces.len(), 1);
        let providers = &settings.namespaces["config"].providers;
        assert_eq!(providers.len(), 3);
        assert_eq!(providers[0].kind, ProviderKind::Filesystem);
        assert_eq!(providers[0].weight, Some(10));
        assert_eq!(providers[1].kind, ProviderKind::Bundle);
        assert_eq!(providers[1].manifest.as_deref(), Some("MANIFEST"));
        assert_eq!(providers[2].prefix.as_deref(), Some("APP"));
    }

    #[test]
    fn test_partial_config_gets_default_namespaces() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        fs::write(&config_path, "[logging]\ndefault = \"debug\"\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.logging.default, "debug");
        assert!(settings.namespaces.contains_key("config"));
        assert!(settings.namespaces.contains_key("app"));
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.poll.interval_ms = 750;
        settings.namespaces = default_namespaces();

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.poll.interval_ms, 750);
        assert_eq!(loaded.namespaces.len(), 2);
        // Declaration order survives a round trip
        assert_eq!(loaded.namespaces.get_index(0).unwrap().0, "config");
    }

    #[test]
    fn test_namespace_declaration_order_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(
            &config_path,
            r#"
[namespaces.zeta]
context = "/z"

[namespaces.alpha]
context = "/a"

[namespaces.mid]
context = "/m"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        let names: Vec<&str> = settings.namespaces.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(settings.namespaces["alpha"].context, "/a");
    }

    #[test]
    fn test_resolve_path_uses_workspace_root() {
        let settings = Settings {
            workspace_root: Some(PathBuf::from("/work")),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve_path(Path::new("config")),
            PathBuf::from("/work/config")
        );
        assert_eq!(
            settings.resolve_path(Path::new("/abs")),
            PathBuf::from("/abs")
        );
    }
}
