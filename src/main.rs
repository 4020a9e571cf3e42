use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tomcat_reinstall::core::{InstallationOrchestrator, InstallerPackage};
use tomcat_reinstall::{adapters, config::AppConfig, context::AppContext, logging, prompt};

#[derive(Parser)]
#[command(name = "tomcat-reinstall")]
#[command(about = "Reinstall or upgrade the Tomcat application server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: tomcat-reinstall.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Stop the services, reinstall Tomcat and repair the installation
    Install(InstallArgs),
    /// Show the service states and the installed version
    Status,
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(rename = "json_logs", skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    json: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,
}

#[derive(Args, Serialize)]
struct InstallArgs {
    /// Installer executable, prompted for when omitted
    #[serde(skip)]
    installer: Option<PathBuf>,

    /// Do not ask for confirmation
    #[serde(skip)]
    #[arg(long, short = 'y', visible_alias = "noconfirm")]
    yes: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    icm_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    java_home: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    backup_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Serialize)]
struct Overrides<'a> {
    #[serde(flatten)]
    global: &'a GlobalArgs,
    #[serde(flatten)]
    install: Option<&'a InstallArgs>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let install_args = match &cli.command {
        Commands::Install(args) => Some(args),
        _ => None,
    };
    let overrides = Overrides {
        global: &cli.global,
        install: install_args,
    };
    let config = AppConfig::load(cli.config.as_deref(), Some(&overrides))
        .context("Failed to load configuration")?;

    let succeeded = match &cli.command {
        Commands::Install(args) => run_install(config, args)
            .await
            .context("Installation failed")?,
        Commands::Status => run_status(config).await.context("Failed to query status")?,
        Commands::Config => run_config(&config)?,
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_install(mut config: AppConfig, args: &InstallArgs) -> Result<bool> {
    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        results_dir: Some(config.results_directory.clone()),
    })?;

    let path = match &args.installer {
        Some(path) => path.clone(),
        None => prompt::prompt_installer_path()?,
    };
    let package =
        InstallerPackage::from_path(&path, &config.installer_prefix, &config.installer_extension)?;

    if !args.yes && !prompt::prompt_confirm_install(&package)? {
        println!("Installation cancelled.");
        return Ok(false);
    }

    if config.simulation && config.icm_root.is_none() {
        let root = config.results_directory.join("simulated-icm");
        adapters::seed_product_media(&root)?;
        config.icm_root = Some(root);
    }

    let results_dir = config.results_directory.clone();
    let platform = adapters::get_platform(&config);
    let ctx = AppContext::new(config, platform);
    let orchestrator = InstallationOrchestrator::new(ctx)?;

    let report = orchestrator.run(&package).await;
    let report_path = report.write_json(&results_dir).await?;

    if report.succeeded() {
        println!("Tomcat {} installed successfully.", package.version);
    } else {
        println!(
            "Tomcat installation finished with errors. Check {} and {}.",
            results_dir.join(logging::RESULTS_LOG_FILE).display(),
            report_path.display()
        );
    }
    Ok(report.succeeded())
}

async fn run_status(config: AppConfig) -> Result<bool> {
    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        results_dir: None,
    })?;

    let platform = adapters::get_platform(&config);
    let ctx = AppContext::new(config, platform);
    let version = ctx.platform.settings.read_version().await?;
    let orchestrator = InstallationOrchestrator::new(ctx)?;

    for controller in [orchestrator.tomcat(), orchestrator.web()] {
        println!(
            "{:<12} {}",
            controller.name(),
            controller.query_state().await
        );
    }
    println!(
        "{:<12} {}",
        "Version",
        version.as_deref().unwrap_or("not installed")
    );
    Ok(true)
}

fn run_config(config: &AppConfig) -> Result<bool> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    print!("{rendered}");
    Ok(true)
}
