// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Boolean switch
fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

/// Repeatable option
fn multi(name: &'static str, short: char, value: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .value_name(value)
        .action(ArgAction::Append)
        .help(help)
}

pub fn build_cli() -> Command {
    Command::new("lambda-uploader")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Package and upload a Python function to Lambda")
        .arg(
            Arg::new("function_dir")
                .default_value(".")
                .help("Function directory (default: current directory)"),
        )
        .arg(flag("no-upload", "Build the package but do not upload it"))
        .arg(flag("no-clean", "Leave the staging directory in place"))
        .arg(flag("no-build", "Upload an already built archive"))
        .arg(flag("publish", "Publish the upload as a new version").short('p'))
        .arg(Arg::new("profile").long("profile").help("Named credentials profile"))
        .arg(
            Arg::new("alias")
                .short('a')
                .long("alias")
                .help("Alias to point at the published version (implies --publish)"),
        )
        .arg(
            Arg::new("alias-description")
                .short('m')
                .long("alias-description")
                .help("Alias description (default: function description)"),
        )
        .arg(multi("requirements", 'r', "REQUIREMENT", "Additional requirement to install (repeatable)"))
        .arg(multi("extra-file", 'x', "PATH", "Additional file or directory to package (repeatable)"))
        .arg(
            Arg::new("virtualenv")
                .short('e')
                .long("virtualenv")
                .value_name("PATH")
                .help("Use an existing virtualenv instead of building one"),
        )
        .arg(flag("no-virtualenv", "Do not package any dependencies"))
        .arg(Arg::new("role").long("role").help("Execution role, overrides the config"))
        .arg(
            Arg::new("s3-bucket")
                .long("s3-bucket")
                .help("Upload through this bucket instead of sending the archive inline"),
        )
        .arg(Arg::new("s3-key").long("s3-key").help("Object key for --s3-bucket (default: <name>.zip)"))
        .arg(Arg::new("runtime").long("runtime").help("Runtime, overrides the config"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Config file (default: <FUNCTION_DIR>/lambda.json)"),
        )
        .arg(
            Arg::new("archive-name")
                .long("archive-name")
                .value_name("PATH")
                .help("Archive path, relative to the function directory unless absolute"),
        )
        .arg(
            Arg::new("variables")
                .long("variables")
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Environment variable to set on the function (repeatable)"),
        )
        .arg(flag("subscribe", "Create the event subscriptions in the config").short('s'))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = out_dir.join("lambda-uploader.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
