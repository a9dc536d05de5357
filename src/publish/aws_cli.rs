// src/publish/aws_cli.rs
//! Control plane backed by the `aws` command line tool
//!
//! Credentials, request signing and endpoint selection stay with the CLI.
//! Every call runs `aws <service> <operation> ... --output json` and parses
//! the JSON document printed on stdout.

use super::{
    AliasInfo, CodeSource, ControlPlane, CreateFunction, EventSourceMapping, FunctionInfo,
    FunctionSettings, PublishError,
};
use crate::config::TIMESTAMP_FORMAT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

const NOT_FOUND_CODE: &str = "ResourceNotFoundException";
const CONFLICT_CODE: &str = "ResourceConflictException";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FunctionConfiguration {
    function_name: String,
    version: String,
    code_sha256: Option<String>,
}

impl From<FunctionConfiguration> for FunctionInfo {
    fn from(conf: FunctionConfiguration) -> Self {
        Self {
            name: conf.function_name,
            version: conf.version,
            code_sha256: conf.code_sha256,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliasConfiguration {
    name: String,
    function_version: String,
    description: Option<String>,
}

impl From<AliasConfiguration> for AliasInfo {
    fn from(conf: AliasConfiguration) -> Self {
        Self {
            name: conf.name,
            function_version: conf.function_version,
            description: conf.description,
        }
    }
}

/// [`ControlPlane`] implemented by running the `aws` CLI
#[derive(Debug, Clone)]
pub struct AwsCliControlPlane {
    region: String,
    profile: Option<String>,
    program: String,
}

impl AwsCliControlPlane {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
            program: "aws".to_string(),
        }
    }

    /// Named credentials profile
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Override the CLI executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, service: &str, operation: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(service).arg(operation);
        cmd.arg("--region").arg(&self.region);
        if let Some(profile) = &self.profile {
            cmd.arg("--profile").arg(profile);
        }
        cmd.arg("--output").arg("json");
        cmd
    }

    /// Run a command and return its stdout
    fn run(&self, operation: &str, mut cmd: Command) -> Result<String, PublishError> {
        debug!("Running {:?}", cmd);
        let output = cmd.output().map_err(|e| PublishError::CommandFailed {
            command: operation.to_string(),
            message: format!("failed to run {}: {}", self.program, e),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("{} stdout: {}", operation, stdout.trim_end());
        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", operation, stderr.trim_end());
        }

        if !output.status.success() {
            return Err(classify_failure(operation, &stderr));
        }
        Ok(stdout)
    }

    fn run_json<T: DeserializeOwned>(&self, operation: &str, cmd: Command) -> Result<T, PublishError> {
        let stdout = self.run(operation, cmd)?;
        parse_response(operation, &stdout)
    }
}

/// Map a failed invocation to a typed error by the service error code on stderr
fn classify_failure(operation: &str, stderr: &str) -> PublishError {
    let message = stderr.trim().to_string();
    if message.contains(NOT_FOUND_CODE) {
        PublishError::NotFound(message)
    } else if message.contains(CONFLICT_CODE) {
        PublishError::Conflict(message)
    } else {
        PublishError::CommandFailed {
            command: operation.to_string(),
            message,
        }
    }
}

fn parse_response<T: DeserializeOwned>(operation: &str, stdout: &str) -> Result<T, PublishError> {
    serde_json::from_str(stdout)
        .map_err(|e| PublishError::InvalidResponse(format!("{}: {}", operation, e)))
}

fn fileb(path: &Path) -> OsString {
    let mut arg = OsString::from("fileb://");
    arg.push(path.as_os_str());
    arg
}

fn push_code(cmd: &mut Command, code: &CodeSource) {
    match code {
        CodeSource::ZipFile(path) => {
            cmd.arg("--zip-file").arg(fileb(path));
        }
        CodeSource::S3 { bucket, key } => {
            cmd.arg("--s3-bucket").arg(bucket).arg("--s3-key").arg(key);
        }
    }
}

fn push_settings(cmd: &mut Command, settings: &FunctionSettings) {
    cmd.arg("--handler").arg(&settings.handler);
    cmd.arg("--role").arg(&settings.role);
    cmd.arg("--description").arg(&settings.description);
    cmd.arg("--timeout").arg(settings.timeout.to_string());
    cmd.arg("--memory-size").arg(settings.memory.to_string());
    cmd.arg("--runtime").arg(&settings.runtime);
    cmd.arg("--environment")
        .arg(json!({ "Variables": settings.variables }).to_string());

    // An empty VPC config detaches the function from any VPC
    let (subnets, groups) = settings
        .vpc
        .as_ref()
        .map(|vpc| (vpc.subnets.clone(), vpc.security_groups.clone()))
        .unwrap_or_default();
    cmd.arg("--vpc-config").arg(
        json!({ "SubnetIds": subnets, "SecurityGroupIds": groups }).to_string(),
    );

    if let Some(tracing_config) = &settings.tracing {
        cmd.arg("--tracing-config")
            .arg(json!({ "Mode": tracing_config.mode }).to_string());
    }
}

fn publish_flag(publish: bool) -> &'static str {
    if publish { "--publish" } else { "--no-publish" }
}

impl ControlPlane for AwsCliControlPlane {
    fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>, PublishError> {
        let mut cmd = self.command("lambda", "get-function-configuration");
        cmd.arg("--function-name").arg(name);

        match self.run_json::<FunctionConfiguration>("get-function-configuration", cmd) {
            Ok(conf) => Ok(Some(conf.into())),
            Err(PublishError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_function(&self, request: &CreateFunction) -> Result<FunctionInfo, PublishError> {
        let mut cmd = self.command("lambda", "create-function");
        cmd.arg("--function-name").arg(&request.name);
        push_settings(&mut cmd, &request.settings);
        push_code(&mut cmd, &request.code);
        cmd.arg(publish_flag(request.publish));
        if !request.tags.is_empty() {
            cmd.arg("--tags").arg(json!(request.tags).to_string());
        }
        if let Some(architectures) = &request.architectures {
            cmd.arg("--architectures").args(architectures);
        }

        self.run_json::<FunctionConfiguration>("create-function", cmd)
            .map(Into::into)
    }

    fn update_function_code(
        &self,
        name: &str,
        code: &CodeSource,
        publish: bool,
    ) -> Result<FunctionInfo, PublishError> {
        let mut cmd = self.command("lambda", "update-function-code");
        cmd.arg("--function-name").arg(name);
        push_code(&mut cmd, code);
        cmd.arg(publish_flag(publish));

        self.run_json::<FunctionConfiguration>("update-function-code", cmd)
            .map(Into::into)
    }

    fn update_function_configuration(
        &self,
        name: &str,
        settings: &FunctionSettings,
    ) -> Result<FunctionInfo, PublishError> {
        let mut cmd = self.command("lambda", "update-function-configuration");
        cmd.arg("--function-name").arg(name);
        push_settings(&mut cmd, settings);

        self.run_json::<FunctionConfiguration>("update-function-configuration", cmd)
            .map(Into::into)
    }

    fn upload_object(&self, bucket: &str, key: &str, file: &Path) -> Result<(), PublishError> {
        let mut cmd = self.command("s3api", "put-object");
        cmd.arg("--bucket").arg(bucket);
        cmd.arg("--key").arg(key);
        cmd.arg("--body").arg(file);

        self.run("put-object", cmd).map(|_| ())
    }

    fn get_alias(&self, function: &str, alias: &str) -> Result<Option<AliasInfo>, PublishError> {
        let mut cmd = self.command("lambda", "get-alias");
        cmd.arg("--function-name").arg(function);
        cmd.arg("--name").arg(alias);

        match self.run_json::<AliasConfiguration>("get-alias", cmd) {
            Ok(conf) => Ok(Some(conf.into())),
            Err(PublishError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_alias(
        &self,
        function: &str,
        alias: &str,
        version: &str,
        description: &str,
    ) -> Result<AliasInfo, PublishError> {
        let mut cmd = self.command("lambda", "create-alias");
        cmd.arg("--function-name").arg(function);
        cmd.arg("--name").arg(alias);
        cmd.arg("--function-version").arg(version);
        cmd.arg("--description").arg(description);

        self.run_json::<AliasConfiguration>("create-alias", cmd)
            .map(Into::into)
    }

    fn update_alias(
        &self,
        function: &str,
        alias: &str,
        version: &str,
        description: &str,
    ) -> Result<AliasInfo, PublishError> {
        let mut cmd = self.command("lambda", "update-alias");
        cmd.arg("--function-name").arg(function);
        cmd.arg("--name").arg(alias);
        cmd.arg("--function-version").arg(version);
        cmd.arg("--description").arg(description);

        self.run_json::<AliasConfiguration>("update-alias", cmd)
            .map(Into::into)
    }

    fn create_event_source_mapping(&self, mapping: &EventSourceMapping) -> Result<(), PublishError> {
        let mut cmd = self.command("lambda", "create-event-source-mapping");
        cmd.arg("--event-source-arn").arg(&mapping.event_source_arn);
        cmd.arg("--function-name").arg(&mapping.function_name);
        cmd.arg("--batch-size").arg(mapping.batch_size.to_string());
        cmd.arg("--starting-position")
            .arg(mapping.starting_position.as_str());
        if let Some(ts) = &mapping.starting_position_timestamp {
            cmd.arg("--starting-position-timestamp")
                .arg(ts.format(TIMESTAMP_FORMAT).to_string());
        }

        self.run("create-event-source-mapping", cmd).map(|_| ())
    }
}
