use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deploycheck::options::{configuration, RuntimeOption};
use deploycheck::{LocalModuleRuntime, ScenarioReport, ScenarioSettings, WebAppScenario};
use deploycheck_bootstrap::{parse_key_value, AppConfig, CliArgs, BUNDLE_LOCATION_PROPERTY};
use helloworld_webapp::HelloWorldConfig;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// deploycheck - deploys the example web application into an in-process
/// module runtime and verifies its endpoints
#[derive(Parser)]
#[command(name = "deploycheck")]
#[command(about = "Deploy a web application into a module runtime and verify its endpoints")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Container port override (overrides config and properties)
    #[arg(short, long)]
    port: Option<u16>,

    /// Set a runtime property, e.g. -D jersey.bundle.location=file:///app.war
    #[arg(short = 'D', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    define: Vec<(String, String)>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy and verify the web application
    Run,
    /// Validate configuration, print the runtime options and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        port: cli.port,
        properties: cli.define.clone(),
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    // Held until main returns so the final records reach stderr.
    let _log_guard = deploycheck_bootstrap::logging::init_logging_unified(
        &logging_config,
        Path::new(&config.server.home_dir),
    );

    tracing::info!("deploycheck starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_scenario(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_scenario(config: AppConfig) -> Result<()> {
    let options = configuration(&config, Vec::new()).context("Invalid runtime options")?;
    let location = options
        .system_property(BUNDLE_LOCATION_PROPERTY)
        .context("No bundle location in runtime options")?
        .to_string();

    let webapp_config = HelloWorldConfig::from_value(config.module_config(helloworld_webapp::MODULE_NAME))
        .context("Invalid helloworld_webapp config")?;

    tracing::info!("Phase: boot runtime");
    let runtime = Arc::new(LocalModuleRuntime::default());
    helloworld_webapp::register(&runtime, location, webapp_config);
    runtime
        .apply_options(&options)
        .await
        .context("Failed to apply runtime options")?;

    let settings = ScenarioSettings::from_config(&config, &*runtime)?;
    let scenario = WebAppScenario::new(
        runtime.clone(),
        Arc::new(runtime.events().clone()),
        settings,
    );

    let outcome = tokio::select! {
        res = scenario.run() => Some(res),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; shutting down");
            None
        }
    };

    tracing::info!("Phase: shutdown");
    runtime.shutdown().await;

    match outcome {
        Some(Ok(report)) => {
            print_report(&report);
            Ok(())
        }
        Some(Err(err)) => {
            tracing::error!(error = %err, "Deployment check failed");
            Err(err.into())
        }
        None => anyhow::bail!("deployment check interrupted"),
    }
}

fn print_report(report: &ScenarioReport) {
    println!(
        "Deployed {} {} from {}",
        report.deployed.symbolic_name, report.deployed.version, report.deployed.location
    );
    print!("{}", report.activation);
    for r in &report.responses {
        println!("[{}] GET {} -> {} {:?}", r.step, r.url, r.status, r.body);
    }
    println!("OK");
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let options = configuration(&config, Vec::new()).context("Invalid runtime options")?;
    HelloWorldConfig::from_value(config.module_config(helloworld_webapp::MODULE_NAME))
        .context("Invalid helloworld_webapp config")?;

    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    println!("Runtime options:");
    for option in &options {
        match option {
            RuntimeOption::SystemProperty { key, value } => println!("  property {key}={value}"),
            RuntimeOption::Bundle(artifact) => println!("  bundle   {artifact}"),
        }
    }
    Ok(())
}
