// src/cli.rs
//! CLI definitions for lambda-uploader
//!
//! The command implementation lives in the `commands` module.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[cfg(test)]
#[path = "../build.rs"]
#[allow(dead_code)]
mod man_page;

#[derive(Parser, Debug)]
#[command(name = "lambda-uploader")]
#[command(version)]
#[command(about = "Package and upload a Python function to Lambda", long_about = None)]
pub struct Cli {
    /// Function directory (default: current directory)
    #[arg(default_value = ".")]
    pub function_dir: PathBuf,

    /// Build the package but do not upload it
    #[arg(long)]
    pub no_upload: bool,

    /// Leave the staging directory in place
    #[arg(long)]
    pub no_clean: bool,

    /// Upload an already built archive
    #[arg(long)]
    pub no_build: bool,

    /// Publish the upload as a new version
    #[arg(short, long)]
    pub publish: bool,

    /// Named credentials profile
    #[arg(long)]
    pub profile: Option<String>,

    /// Alias to point at the published version (implies --publish)
    #[arg(short, long)]
    pub alias: Option<String>,

    /// Alias description (default: function description)
    #[arg(short = 'm', long, requires = "alias")]
    pub alias_description: Option<String>,

    /// Additional requirement to install (repeatable)
    #[arg(short, long = "requirements", value_name = "REQUIREMENT")]
    pub requirements: Vec<String>,

    /// Additional file or directory to package (repeatable)
    #[arg(short = 'x', long = "extra-file", value_name = "PATH")]
    pub extra_files: Vec<PathBuf>,

    /// Use an existing virtualenv instead of building one
    #[arg(short = 'e', long, value_name = "PATH", conflicts_with = "no_virtualenv")]
    pub virtualenv: Option<PathBuf>,

    /// Do not package any dependencies
    #[arg(long)]
    pub no_virtualenv: bool,

    /// Execution role, overrides the config
    #[arg(long)]
    pub role: Option<String>,

    /// Upload through this bucket instead of sending the archive inline
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Object key for --s3-bucket (default: <name>.zip)
    #[arg(long, requires = "s3_bucket")]
    pub s3_key: Option<String>,

    /// Runtime, overrides the config
    #[arg(long)]
    pub runtime: Option<String>,

    /// Config file (default: <FUNCTION_DIR>/lambda.json)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Archive path, relative to the function directory unless absolute
    #[arg(long, value_name = "PATH")]
    pub archive_name: Option<PathBuf>,

    /// Environment variable to set on the function (repeatable)
    #[arg(long = "variables", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Create the event subscriptions in the config
    #[arg(short, long)]
    pub subscribe: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Parse `KEY=VALUE`; the value may itself contain `=`
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}
