// src/config.rs
//! Function configuration (lambda.json)
//!
//! The configuration file is parsed and validated once into a typed
//! [`FunctionConfig`]. Missing optional keys take their documented defaults at
//! load time; nothing is resolved lazily afterwards.

use crate::package::{DependencySpec, PackageOptions};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file name looked up in the function directory
pub const CONFIG_FILE_NAME: &str = "lambda.json";

/// Requirements file picked up when no explicit requirements are configured
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";

/// Runtime used when the configuration does not name one
pub const DEFAULT_RUNTIME: &str = "python3.12";

/// Format of `starting_position_timestamp`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Config file {0} not found")]
    NotFound(PathBuf),

    #[error("Function directory {0} not found")]
    FunctionDirNotFound(PathBuf),

    #[error("Config must have {0} set")]
    MissingField(&'static str),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// VPC attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcConfig {
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

/// Active tracing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(alias = "Mode")]
    pub mode: String,
}

/// Where a stream subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingPosition {
    TrimHorizon,
    Latest,
    AtTimestamp,
}

impl StartingPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrimHorizon => "TRIM_HORIZON",
            Self::Latest => "LATEST",
            Self::AtTimestamp => "AT_TIMESTAMP",
        }
    }
}

/// Kinesis stream subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KinesisSubscription {
    /// Stream ARN
    pub stream: String,
    pub batch_size: u32,
    pub starting_position: StartingPosition,
    /// Set exactly when `starting_position` is `AtTimestamp`
    pub starting_position_timestamp: Option<DateTime<Utc>>,
}

/// Event-source subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    pub kinesis: Option<KinesisSubscription>,
}

/// Validated function configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConfig {
    pub name: String,
    pub description: String,
    pub region: String,
    pub handler: String,
    pub role: String,
    /// Seconds
    pub timeout: u32,
    /// Megabytes
    pub memory: u32,
    pub runtime: String,
    pub requirements: Vec<String>,
    /// Exclusion patterns for packaging
    pub ignore: Vec<String>,
    pub extra_files: Vec<PathBuf>,
    pub publish: bool,
    pub alias: Option<String>,
    alias_description: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub vpc: Option<VpcConfig>,
    pub tracing: Option<TracingConfig>,
    pub subscription: Subscriptions,
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub architectures: Option<Vec<String>>,
}

/// On-disk shape of lambda.json
#[derive(Debug, Deserialize)]
struct RawConfig {
    name: Option<String>,
    description: Option<String>,
    region: Option<String>,
    handler: Option<String>,
    role: Option<String>,
    timeout: Option<u32>,
    memory: Option<u32>,
    runtime: Option<String>,
    requirements: Option<Vec<String>>,
    ignore: Option<Vec<String>>,
    extra_files: Option<Vec<PathBuf>>,
    publish: Option<bool>,
    alias: Option<String>,
    alias_description: Option<String>,
    variables: Option<BTreeMap<String, String>>,
    vpc: Option<VpcConfig>,
    tracing: Option<TracingConfig>,
    subscription: Option<RawSubscriptions>,
    s3_bucket: Option<String>,
    s3_key: Option<String>,
    tags: Option<BTreeMap<String, String>>,
    architectures: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptions {
    kinesis: Option<RawKinesis>,
}

#[derive(Debug, Deserialize)]
struct RawKinesis {
    stream: String,
    batch_size: u32,
    starting_position: StartingPosition,
    starting_position_timestamp: Option<String>,
}

impl FunctionConfig {
    /// Load `lambda.json` for a function directory
    ///
    /// `config_file` overrides the default `<function_dir>/lambda.json`.
    pub fn load(function_dir: &Path, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        if !function_dir.is_dir() {
            return Err(ConfigError::FunctionDirNotFound(function_dir.to_path_buf()));
        }

        let path = match config_file {
            Some(path) => path.to_path_buf(),
            None => function_dir.join(CONFIG_FILE_NAME),
        };
        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration JSON
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let subscription = match raw.subscription {
            Some(RawSubscriptions { kinesis: Some(k) }) => Subscriptions {
                kinesis: Some(validate_kinesis(k)?),
            },
            _ => Subscriptions::default(),
        };

        let config = Self {
            name: raw.name.ok_or(ConfigError::MissingField("name"))?,
            description: raw.description.ok_or(ConfigError::MissingField("description"))?,
            region: raw.region.ok_or(ConfigError::MissingField("region"))?,
            handler: raw.handler.ok_or(ConfigError::MissingField("handler"))?,
            role: raw.role.ok_or(ConfigError::MissingField("role"))?,
            timeout: raw.timeout.ok_or(ConfigError::MissingField("timeout"))?,
            memory: raw.memory.ok_or(ConfigError::MissingField("memory"))?,
            runtime: raw.runtime.unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            requirements: raw.requirements.unwrap_or_default(),
            ignore: raw.ignore.unwrap_or_default(),
            extra_files: raw.extra_files.unwrap_or_default(),
            // A configured alias only makes sense for a published version
            publish: raw.publish.unwrap_or(false) || raw.alias.is_some(),
            alias: raw.alias,
            alias_description: raw.alias_description,
            variables: raw.variables.unwrap_or_default(),
            vpc: raw.vpc,
            tracing: raw.tracing,
            subscription,
            s3_bucket: raw.s3_bucket,
            s3_key: raw.s3_key,
            tags: raw.tags.unwrap_or_default(),
            architectures: raw.architectures,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        if self.handler.is_empty() {
            return Err(ConfigError::MissingField("handler"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1 second".to_string()));
        }
        if self.memory == 0 {
            return Err(ConfigError::Invalid("memory must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Alias description, falling back to the function description
    pub fn alias_description(&self) -> &str {
        self.alias_description.as_deref().unwrap_or(&self.description)
    }

    /// Publish uploads as an immutable version
    pub fn set_publish(&mut self) {
        self.publish = true;
    }

    /// Point an alias at the published version; implies publish
    pub fn set_alias(&mut self, alias: &str, description: Option<&str>) {
        self.alias = Some(alias.to_string());
        self.alias_description = description.map(String::from);
        self.publish = true;
    }

    pub fn set_role(&mut self, role: &str) {
        self.role = role.to_string();
    }

    pub fn set_runtime(&mut self, runtime: &str) {
        self.runtime = runtime.to_string();
    }

    /// Upload through an object-store bucket instead of inline bytes
    pub fn set_s3(&mut self, bucket: &str, key: Option<&str>) {
        self.s3_bucket = Some(bucket.to_string());
        if let Some(key) = key {
            self.s3_key = Some(key.to_string());
        }
    }

    /// Merge environment variables, overriding existing keys
    pub fn set_variables(&mut self, variables: impl IntoIterator<Item = (String, String)>) {
        self.variables.extend(variables);
    }

    /// Object key used for bucket uploads
    pub fn s3_package_name(&self) -> String {
        self.s3_key
            .clone()
            .unwrap_or_else(|| format!("{}.zip", self.name))
    }

    /// Interpreter matching the runtime, e.g. `python3.12`
    ///
    /// Non-Python runtimes fall back to `python3`.
    pub fn python_interpreter(&self) -> String {
        if self.runtime.starts_with("python") {
            self.runtime.clone()
        } else {
            "python3".to_string()
        }
    }

    /// What the dependency step should install
    ///
    /// Explicit requirements win; otherwise a `requirements.txt` in the
    /// function directory is used when present.
    pub fn dependency_spec(&self, function_dir: &Path) -> DependencySpec {
        if !self.requirements.is_empty() {
            return DependencySpec::Requirements(self.requirements.clone());
        }

        let file = function_dir.join(REQUIREMENTS_FILE_NAME);
        if file.is_file() {
            DependencySpec::File(file)
        } else {
            DependencySpec::None
        }
    }

    /// Packaging options derived from this configuration
    pub fn package_options(&self) -> PackageOptions {
        PackageOptions::default()
            .with_exclude(self.ignore.clone())
            .with_extra_paths(self.extra_files.clone())
    }
}

fn validate_kinesis(raw: RawKinesis) -> Result<KinesisSubscription, ConfigError> {
    if raw.batch_size == 0 {
        return Err(ConfigError::Invalid(
            "subscription.kinesis.batch_size must be greater than 0".to_string(),
        ));
    }

    let starting_position_timestamp = match raw.starting_position {
        StartingPosition::AtTimestamp => {
            let ts = raw.starting_position_timestamp.ok_or_else(|| {
                ConfigError::Invalid(
                    "starting_position AT_TIMESTAMP requires starting_position_timestamp"
                        .to_string(),
                )
            })?;
            let parsed = NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).map_err(|e| {
                ConfigError::Invalid(format!(
                    "invalid starting_position_timestamp '{}': {}",
                    ts, e
                ))
            })?;
            Some(parsed.and_utc())
        }
        _ => None,
    };

    Ok(KinesisSubscription {
        stream: raw.stream,
        batch_size: raw.batch_size,
        starting_position: raw.starting_position,
        starting_position_timestamp,
    })
}
