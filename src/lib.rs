// src/lib.rs

//! lambda-uploader
//!
//! Packages a Python function project into a deployment archive and
//! publishes it to a serverless compute platform.
//!
//! # Architecture
//!
//! - `package`: staging workspace, dependency materialization, filtered tree
//!   copies and the zip writer
//! - `config`: typed, validated `lambda.json`
//! - `publish`: create/update, versions, aliases and event subscriptions
//!   behind a `ControlPlane` trait

pub mod config;
mod error;
pub mod package;
pub mod publish;

pub use config::{ConfigError, FunctionConfig};
pub use error::{Error, Result};
pub use package::{Package, PackageOptions, PackagePhase, PackageResult};
pub use publish::{ControlPlane, PackageUploader, PublishError};
