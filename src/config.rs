//! Configuration module for Stackform
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/stackform/stackform.toml)
//! - User configuration (~/.stackform.toml)
//! - Project configuration (./stackform.toml)
//! - `STACKFORM_CONFIG` and `--config`
//! - Environment variables
//!
//! Later sources win. Files are merged key by key, so a project file only
//! needs the settings it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use stackform::resources::Runtime;
use stackform::stack::{App, Environment, StackProps};
use stackform::stacks::emailer::{self, EmailerStackProps};
use stackform::template::RemovalPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stack identity and target environment
    pub stack: StackConfig,

    /// VPC settings
    pub network: NetworkConfig,

    /// Database settings
    pub database: DatabaseConfig,

    /// Website bucket settings
    pub website: WebsiteConfig,

    /// Handler settings
    pub handlers: HandlersConfig,

    /// REST API settings
    pub api: ApiConfig,

    /// Cloud assembly and terminal output
    pub output: OutputConfig,

    /// Local deploy target
    pub state: StateConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Stack identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Stack name
    pub name: String,

    /// Template description
    pub description: Option<String>,

    /// Target account; env-agnostic when unset
    pub account: Option<String>,

    /// Target region; env-agnostic when unset
    pub region: Option<String>,

    /// Directory code assets are resolved against
    pub base_dir: PathBuf,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: emailer::DEFAULT_STACK_NAME.to_string(),
            description: None,
            account: None,
            region: None,
            base_dir: PathBuf::from("."),
        }
    }
}

/// VPC settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Availability zones spanned by the VPC
    pub max_azs: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { max_azs: 2 }
    }
}

/// Database settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Instance class
    pub instance_class: String,

    /// Removal policy
    pub removal_policy: RemovalPolicy,

    /// Open the database port to the handlers
    pub allow_handler_access: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            instance_class: "db.m5.large".to_string(),
            removal_policy: RemovalPolicy::Delete,
            allow_handler_access: true,
        }
    }
}

/// Website bucket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsiteConfig {
    /// Index document
    pub index_document: String,

    /// Grant anonymous reads
    pub public_read_access: bool,

    /// Removal policy
    pub removal_policy: RemovalPolicy,

    /// Purge objects before the bucket is deleted
    pub auto_delete_objects: bool,
}

impl Default for WebsiteConfig {
    fn default() -> Self {
        Self {
            index_document: "index.html".to_string(),
            public_read_access: false,
            removal_policy: RemovalPolicy::Delete,
            auto_delete_objects: false,
        }
    }
}

/// Handler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlersConfig {
    /// Runtime of every handler
    pub runtime: String,

    /// Directory with one code directory per handler
    pub lambdas_dir: PathBuf,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            runtime: Runtime::default().to_string(),
            lambdas_dir: PathBuf::from("lambdas"),
        }
    }
}

/// REST API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API description
    pub description: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            description: EmailerStackProps::default().api_description,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Cloud assembly directory
    pub outdir: PathBuf,

    /// Colored terminal output
    pub color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("cdk.out"),
            color: true,
        }
    }
}

/// Local deploy target settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding deployed stack state
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".stackform/state"),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when neither `-v` nor `RUST_LOG` is given
    pub level: Option<String>,

    /// Log format
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut merged = Value::Object(serde_json::Map::new());

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                merge_values(&mut merged, read_file(&path)?);
            } else if config_path == Some(&path) {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid configuration")?;

        config.apply_env_overrides();

        Ok(config)
    }

    /// Configuration file paths, lowest precedence first
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/stackform/stackform.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".stackform.toml"));
        }

        paths.push(PathBuf::from("stackform.toml"));

        if let Ok(env_config) = std::env::var("STACKFORM_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        if let Some(path) = explicit_path {
            paths.push(path.clone());
        }

        paths
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("STACKFORM_STACK_NAME") {
            self.stack.name = name;
        }

        if let Ok(region) = std::env::var("STACKFORM_REGION") {
            self.stack.region = Some(region);
        }

        if let Ok(account) = std::env::var("STACKFORM_ACCOUNT") {
            self.stack.account = Some(account);
        }

        if let Ok(outdir) = std::env::var("STACKFORM_OUTDIR") {
            self.output.outdir = PathBuf::from(outdir);
        }

        if let Ok(dir) = std::env::var("STACKFORM_STATE_DIR") {
            self.state.dir = PathBuf::from(dir);
        }

        if let Ok(runtime) = std::env::var("STACKFORM_RUNTIME") {
            self.handlers.runtime = runtime;
        }

        if let Ok(level) = std::env::var("STACKFORM_LOG_LEVEL") {
            self.logging.level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.output.color = false;
        }
    }

    /// Load from a single file, without other sources
    #[cfg(test)]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let value = read_file(path.as_ref())?;
        serde_json::from_value(value)
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))
    }

    /// Target environment of the stack
    pub fn environment(&self) -> Environment {
        Environment {
            account: self.stack.account.clone(),
            region: self.stack.region.clone(),
        }
    }

    /// App rooted at the configured base directory
    pub fn app(&self) -> App {
        App::new()
            .with_base_dir(&self.stack.base_dir)
            .with_outdir(&self.output.outdir)
    }

    /// Properties of the emailer stack
    pub fn emailer_props(&self) -> Result<EmailerStackProps> {
        let runtime: Runtime = self
            .handlers
            .runtime
            .parse()
            .with_context(|| format!("Invalid handler runtime '{}'", self.handlers.runtime))?;

        Ok(EmailerStackProps {
            stack: StackProps {
                env: self.environment(),
                description: self.stack.description.clone(),
            },
            max_azs: self.network.max_azs,
            instance_class: self.database.instance_class.clone(),
            database_removal_policy: self.database.removal_policy,
            website_index_document: self.website.index_document.clone(),
            public_read_access: self.website.public_read_access,
            bucket_removal_policy: self.website.removal_policy,
            auto_delete_objects: self.website.auto_delete_objects,
            runtime,
            lambdas_dir: self.handlers.lambdas_dir.clone(),
            api_description: self.api.description.clone(),
            allow_database_port: self.database.allow_handler_access,
            ..EmailerStackProps::default()
        })
    }
}

/// Parse a config file into a generic value, choosing the format by extension
fn read_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let value = match extension {
        "yml" | "yaml" => serde_yaml::from_str(&content)?,
        "json" => serde_json::from_str(&content)?,
        "toml" => toml::from_str(&content)?,
        _ => toml::from_str(&content)
            .or_else(|_| serde_yaml::from_str(&content))
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
    };

    Ok(value)
}

/// Deep-merge `overlay` into `base`; objects merge per key, everything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
