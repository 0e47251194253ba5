//! TOML configuration.
//!
//! Every section implements `Default`, so a missing or partial file behaves
//! like the built-in settings.
//!
//! ```toml
//! [storage]
//! environment = "extension"
//! path = "proxy-rules.json"
//! quota_bytes = 5242880
//!
//! [storage.keys]
//! table_collection = "proxy_rules.table"
//!
//! [rules]
//! seed_pattern = "^https://example\\.com/new/(.*)"
//! seed_target = "http://localhost:8080/\\1"
//!
//! [[rules.default_rules]]
//! pattern = "^https://api\\.example\\.com/(.*)"
//! target = "http://localhost:3000/\\1"
//!
//! [engine]
//! max_rules = 5000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ProxyError, Result};
use crate::store::{StoreOptions, SEED_PATTERN, SEED_TARGET};
use crate::types::{ProxyMode, ProxyRule};

/// Environment variable that selects the storage environment
pub const ENVIRONMENT_VAR: &str = "PROXY_RULES_ENV";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub rules: RulesConfig,
    pub engine: EngineConfig,
}

/// Where state is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit environment. Unset means [`Environment::detect`].
    pub environment: Option<Environment>,
    /// Backing file for the extension environment
    pub path: PathBuf,
    /// Byte budget of the backing file. Unset means unlimited.
    pub quota_bytes: Option<u64>,
    pub keys: StorageKeys,
}

/// Storage keys for each persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    /// Rule collection edited in table mode
    pub table_collection: String,
    /// Rule collection edited in editor mode
    pub editor_collection: String,
    /// Global enabled flag and editing mode
    pub settings: String,
    /// Saved query-parameter notes
    pub query_notes: String,
}

/// Seed content for new groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub seed_pattern: String,
    pub seed_target: String,
    pub default_rules: Vec<RuleEntry>,
}

/// A rule as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub pattern: String,
    pub target: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Limits of the in-process redirect engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest directive set the engine accepts. Unset means unlimited.
    pub max_rules: Option<usize>,
}

/// Runtime environment, which decides the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// In-memory storage, nothing survives the process
    Development,
    /// File-backed storage
    Extension,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            environment: None,
            path: PathBuf::from("proxy-rules.json"),
            quota_bytes: None,
            keys: StorageKeys::default(),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            table_collection: "proxy_rules.table".to_string(),
            editor_collection: "proxy_rules.editor".to_string(),
            settings: "proxy_rules.settings".to_string(),
            query_notes: "proxy_rules.query_notes".to_string(),
        }
    }
}

impl StorageKeys {
    /// Key of the rule collection for `mode`
    pub fn collection(&self, mode: ProxyMode) -> &str {
        match mode {
            ProxyMode::Table => &self.table_collection,
            ProxyMode::Editor => &self.editor_collection,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        let defaults = StoreOptions::default();
        Self {
            seed_pattern: SEED_PATTERN.to_string(),
            seed_target: SEED_TARGET.to_string(),
            default_rules: defaults
                .default_rules
                .into_iter()
                .map(|r| RuleEntry {
                    pattern: r.pattern,
                    target: r.target,
                    enabled: r.enabled,
                })
                .collect(),
        }
    }
}

impl Environment {
    /// Read the environment from `PROXY_RULES_ENV`.
    ///
    /// `development` or `dev` selects [`Environment::Development`]; anything
    /// else, including an unset variable, selects [`Environment::Extension`].
    pub fn detect() -> Self {
        Self::from_name(std::env::var(ENVIRONMENT_VAR).ok().as_deref())
    }

    fn from_name(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
            Some("development") | Some("dev") => Environment::Development,
            _ => Environment::Extension,
        }
    }
}

impl StorageConfig {
    /// Configured environment, falling back to detection
    pub fn environment(&self) -> Environment {
        self.environment.unwrap_or_else(Environment::detect)
    }
}

impl RulesConfig {
    /// Store options carrying these seeds. Default rules are numbered from 1.
    pub fn store_options(&self) -> StoreOptions {
        let rules = self
            .default_rules
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                ProxyRule::new(idx as u64 + 1, entry.pattern.trim(), entry.target.trim())
                    .with_enabled(entry.enabled)
            })
            .collect();
        StoreOptions::new()
            .with_default_rules(rules)
            .with_seed_rule(self.seed_pattern.as_str(), self.seed_target.as_str())
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProxyError::Config(e.to_string()))
    }

    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content).inspect_err(|e| {
            warn!(path = %path.display(), error = %e, "Invalid config");
        })?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ProxyError::Config(e.to_string()))
    }
}
