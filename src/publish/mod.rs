// src/publish/mod.rs
//! Publishing to the compute platform
//!
//! The platform's control plane is reached through the [`ControlPlane`]
//! trait. [`PackageUploader`] decides between creating and updating a
//! function, handles version publishing and aliases, and
//! [`create_subscriptions`] wires up event sources.

mod aws_cli;

pub use aws_cli::AwsCliControlPlane;

use crate::config::{FunctionConfig, StartingPosition, TracingConfig, VpcConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Version name of the unpublished function code
pub const LATEST_VERSION: &str = "$LATEST";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to read archive: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Unexpected control plane response: {0}")]
    InvalidResponse(String),

    #[error("No alias configured")]
    NoAlias,

    #[error("Cannot create alias {0}: no version was published")]
    NotPublished(String),
}

/// Function state reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub version: String,
    /// Base64 SHA-256 of the deployed archive
    pub code_sha256: Option<String>,
}

/// Alias state reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    pub name: String,
    pub function_version: String,
    pub description: Option<String>,
}

/// Where the function code comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSource {
    /// Archive on local disk, sent inline
    ZipFile(PathBuf),
    /// Archive already uploaded to an object-store bucket
    S3 { bucket: String, key: String },
}

/// Mutable function settings, applied on create and update
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSettings {
    pub handler: String,
    pub role: String,
    pub description: String,
    pub timeout: u32,
    pub memory: u32,
    pub runtime: String,
    pub variables: BTreeMap<String, String>,
    pub vpc: Option<VpcConfig>,
    pub tracing: Option<TracingConfig>,
}

impl FunctionSettings {
    pub fn from_config(config: &FunctionConfig) -> Self {
        Self {
            handler: config.handler.clone(),
            role: config.role.clone(),
            description: config.description.clone(),
            timeout: config.timeout,
            memory: config.memory,
            runtime: config.runtime.clone(),
            variables: config.variables.clone(),
            vpc: config.vpc.clone(),
            tracing: config.tracing.clone(),
        }
    }
}

/// Everything needed to create a new function
#[derive(Debug, Clone, PartialEq)]
pub struct CreateFunction {
    pub name: String,
    pub settings: FunctionSettings,
    pub code: CodeSource,
    pub publish: bool,
    pub tags: BTreeMap<String, String>,
    pub architectures: Option<Vec<String>>,
}

/// Stream-to-function event source mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSourceMapping {
    pub event_source_arn: String,
    pub function_name: String,
    pub batch_size: u32,
    pub starting_position: StartingPosition,
    pub starting_position_timestamp: Option<DateTime<Utc>>,
}

/// Control-plane operations used for publishing
pub trait ControlPlane {
    /// Current function state, `None` when the function does not exist
    fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>, PublishError>;

    fn create_function(&self, request: &CreateFunction) -> Result<FunctionInfo, PublishError>;

    fn update_function_code(
        &self,
        name: &str,
        code: &CodeSource,
        publish: bool,
    ) -> Result<FunctionInfo, PublishError>;

    fn update_function_configuration(
        &self,
        name: &str,
        settings: &FunctionSettings,
    ) -> Result<FunctionInfo, PublishError>;

    /// Store a file in an object-store bucket
    fn upload_object(&self, bucket: &str, key: &str, file: &Path) -> Result<(), PublishError>;

    fn get_alias(&self, function: &str, alias: &str) -> Result<Option<AliasInfo>, PublishError>;

    fn create_alias(
        &self,
        function: &str,
        alias: &str,
        version: &str,
        description: &str,
    ) -> Result<AliasInfo, PublishError>;

    fn update_alias(
        &self,
        function: &str,
        alias: &str,
        version: &str,
        description: &str,
    ) -> Result<AliasInfo, PublishError>;

    /// Returns [`PublishError::Conflict`] when the mapping already exists
    fn create_event_source_mapping(&self, mapping: &EventSourceMapping) -> Result<(), PublishError>;
}

/// Base64 SHA-256 of archive bytes, the form the control plane reports
pub fn code_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Uploads a built archive and manages the published version
pub struct PackageUploader<'a> {
    config: &'a FunctionConfig,
    client: &'a dyn ControlPlane,
    version: Option<String>,
}

impl<'a> PackageUploader<'a> {
    pub fn new(config: &'a FunctionConfig, client: &'a dyn ControlPlane) -> Self {
        Self {
            config,
            client,
            version: None,
        }
    }

    /// Version published by the last upload, if publishing was enabled
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Create or update the function from `archive`
    pub fn upload(&mut self, archive: &Path) -> Result<FunctionInfo, PublishError> {
        let bytes = fs::read(archive)?;
        let local_hash = code_sha256(&bytes);
        info!("Uploading {} ({} bytes, sha256 {})", archive.display(), bytes.len(), local_hash);

        let code = match &self.config.s3_bucket {
            Some(bucket) => {
                let key = self.config.s3_package_name();
                info!("Uploading archive to s3://{}/{}", bucket, key);
                self.client.upload_object(bucket, &key, archive)?;
                CodeSource::S3 {
                    bucket: bucket.clone(),
                    key,
                }
            }
            None => CodeSource::ZipFile(archive.to_path_buf()),
        };

        let settings = FunctionSettings::from_config(self.config);
        let name = &self.config.name;

        let info = match self.client.get_function(name)? {
            Some(existing) => {
                debug!("Function {} exists at version {}", name, existing.version);
                let info = self.client.update_function_code(name, &code, self.config.publish)?;
                debug!("Updating configuration of {}", name);
                self.client.update_function_configuration(name, &settings)?;
                info
            }
            None => {
                debug!("Function {} not found, creating it", name);
                self.client.create_function(&CreateFunction {
                    name: name.clone(),
                    settings,
                    code,
                    publish: self.config.publish,
                    tags: self.config.tags.clone(),
                    architectures: self.config.architectures.clone(),
                })?
            }
        };

        if let Some(remote) = &info.code_sha256
            && *remote != local_hash
        {
            warn!("Deployed code hash {} does not match local archive {}", remote, local_hash);
        }

        if self.config.publish && info.version != LATEST_VERSION {
            info!("Published {} version {}", name, info.version);
            self.version = Some(info.version.clone());
        }

        Ok(info)
    }

    /// Point the configured alias at the published version
    pub fn alias(&self) -> Result<AliasInfo, PublishError> {
        let alias = self.config.alias.as_deref().ok_or(PublishError::NoAlias)?;
        let version = self
            .version
            .as_deref()
            .ok_or_else(|| PublishError::NotPublished(alias.to_string()))?;
        let name = &self.config.name;
        let description = self.config.alias_description();

        match self.client.get_alias(name, alias)? {
            Some(current) => {
                info!(
                    "Moving alias {} from version {} to {}",
                    alias, current.function_version, version
                );
                self.client.update_alias(name, alias, version, description)
            }
            None => {
                info!("Creating alias {} for version {}", alias, version);
                self.client.create_alias(name, alias, version, description)
            }
        }
    }
}

/// Create the event-source subscriptions named in the configuration
///
/// Returns the number of subscriptions created. Existing subscriptions are
/// left alone and not counted.
pub fn create_subscriptions(
    config: &FunctionConfig,
    client: &dyn ControlPlane,
) -> Result<usize, PublishError> {
    let mut created = 0;

    if let Some(kinesis) = &config.subscription.kinesis {
        let mapping = EventSourceMapping {
            event_source_arn: kinesis.stream.clone(),
            function_name: config.name.clone(),
            batch_size: kinesis.batch_size,
            starting_position: kinesis.starting_position,
            starting_position_timestamp: kinesis.starting_position_timestamp,
        };

        debug!("Creating Kinesis subscription to {}", mapping.event_source_arn);
        match client.create_event_source_mapping(&mapping) {
            Ok(()) => {
                debug!("Subscription created");
                created += 1;
            }
            Err(PublishError::Conflict(_)) => {
                debug!("Subscription exists");
            }
            Err(e) => {
                error!("Subscription failed, error={}", e);
                return Err(e);
            }
        }
    }

    Ok(created)
}
