// src/commands.rs
//! Command handler for the lambda-uploader CLI

use crate::cli::Cli;
use anyhow::{Context, Result};
use lambda_uploader::package::{
    DependencyMaterializer, EnvironmentDirective, NoDependencies, VirtualenvMaterializer,
};
use lambda_uploader::publish::{create_subscriptions, AwsCliControlPlane};
use lambda_uploader::{FunctionConfig, Package, PackageUploader};
use std::path::Path;
use tracing::{debug, info};

/// Print a progress line for the user
pub fn status(message: &str) {
    if cfg!(windows) {
        println!("{}", message);
    } else {
        println!("\u{03bb} {}", message);
    }
}

/// Apply command-line overrides on top of the loaded config
pub fn apply_overrides(cli: &Cli, config: &mut FunctionConfig) {
    if cli.publish {
        config.set_publish();
    }
    if let Some(alias) = &cli.alias {
        config.set_alias(alias, cli.alias_description.as_deref());
    }
    if let Some(role) = &cli.role {
        config.set_role(role);
    }
    if let Some(runtime) = &cli.runtime {
        config.set_runtime(runtime);
    }
    if let Some(bucket) = &cli.s3_bucket {
        config.set_s3(bucket, cli.s3_key.as_deref());
    }
    config.requirements.extend(cli.requirements.iter().cloned());
    config.extra_files.extend(cli.extra_files.iter().cloned());
    config.set_variables(cli.variables.iter().cloned());
}

/// Pick the dependency step for this run
fn materializer(
    cli: &Cli,
    config: &FunctionConfig,
    function_dir: &Path,
) -> Box<dyn DependencyMaterializer> {
    let directive = if cli.no_virtualenv {
        EnvironmentDirective::Skip
    } else if let Some(venv) = &cli.virtualenv {
        EnvironmentDirective::Existing(venv.clone())
    } else {
        EnvironmentDirective::Build
    };

    let spec = config.dependency_spec(function_dir);
    if directive == EnvironmentDirective::Build && spec.is_none() {
        info!("No requirements found, skipping virtualenv");
        return Box::new(NoDependencies);
    }

    Box::new(
        VirtualenvMaterializer::new(directive, spec).with_python(config.python_interpreter()),
    )
}

/// Build, upload and publish a function
pub fn cmd_run(cli: &Cli) -> Result<()> {
    let function_dir = cli.function_dir.as_path();
    let mut config = FunctionConfig::load(function_dir, cli.config.as_deref())
        .context("Failed to load function config")?;
    apply_overrides(cli, &mut config);
    debug!("Effective config: {:?}", config);

    let mut options = config.package_options();
    if let Some(archive) = &cli.archive_name {
        options = options.with_archive_name(archive.clone());
    }
    let mut pkg = Package::new(
        function_dir,
        options,
        materializer(cli, &config, function_dir),
    );

    if cli.no_build {
        if !pkg.archive_path().is_file() {
            anyhow::bail!(
                "No archive at {} to upload; run without --no-build first",
                pkg.archive_path().display()
            );
        }
        status(&format!("Using existing package {}", pkg.archive_path().display()));
    } else {
        status("Building Package");
        let result = pkg.build().context("Failed to build package")?;
        info!(
            "Packaged {} source files, {} dependency files, {} extra files",
            result.source_stats.files, result.dependency_stats.files, result.extra_stats.files
        );
    }

    if !cli.no_clean {
        pkg.clean_workspace()
            .context("Failed to clean staging directory")?;
    }

    if !cli.no_upload {
        let client = AwsCliControlPlane::new(config.region.clone()).with_profile(cli.profile.clone());
        let mut uploader = PackageUploader::new(&config, &client);

        status("Uploading Package");
        uploader
            .upload(pkg.archive_path())
            .with_context(|| format!("Failed to upload {}", config.name))?;

        if config.alias.is_some() {
            status("Creating alias");
            uploader.alias().context("Failed to create alias")?;
        }

        if cli.subscribe {
            status("Creating subscriptions");
            create_subscriptions(&config, &client).context("Failed to create subscriptions")?;
        }

        pkg.clean_artifact().context("Failed to remove archive")?;
    }

    status("Fin");
    Ok(())
}
