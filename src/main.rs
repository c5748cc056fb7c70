//! Proxy Speed Test - command line front-end

use clap::Parser;
use proxy_speedtest::{
    catalog::{JsonFileCatalog, ProfileStore},
    cli::{Cli, Command, RunArgs},
    config::{display_config_summary, load_config, EnvManager, ProfileOverrides},
    defaults,
    error::{AppError, ErrorReporter, Result},
    geo::HttpGeoResolver,
    hosts::DnsHostResolver,
    logging::{Logger, LoggerFactory},
    measure::HttpMeasurer,
    models::Config,
    output::SummaryFormatter,
    pipeline::{Collaborators, SpeedTestPipeline},
    task::{LogNotifier, TaskManager, TaskTrigger},
    PKG_NAME, VERSION,
};
use std::process;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for host upserts and hooks before exiting
const SIDE_EFFECT_DRAIN_LIMIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose || cli.debug);

    match run_application(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            reporter.report_error(&e);
            process::exit(e.exit_code());
        }
    }
}

/// Main application logic; returns the process exit code
async fn run_application(cli: Cli) -> Result<i32> {
    if let Command::EnvHelp = cli.command {
        println!("{}", EnvManager::display_env_help());
        return Ok(0);
    }

    let config = load_config(cli.clone())?;
    if config.debug {
        eprintln!("{} v{}", PKG_NAME, VERSION);
        eprintln!("{}", display_config_summary(&config));
    }

    let factory = LoggerFactory::new(config.clone());
    let logger = factory.create_logger("PST").await;
    let formatter = SummaryFormatter::new(config.enable_color, config.verbose || config.debug);
    let catalog = Arc::new(JsonFileCatalog::open(&config.catalog_path).await?);

    match &cli.command {
        Command::Profiles => {
            let profiles = catalog.list_profiles().await?;
            println!("{}", formatter.format_profiles(&profiles));
            Ok(0)
        }
        Command::Run(args) => run_speed_test(args, &config, catalog, logger, &formatter).await,
        Command::EnvHelp => Ok(0),
    }
}

async fn run_speed_test(
    args: &RunArgs,
    config: &Config,
    catalog: Arc<JsonFileCatalog>,
    logger: Logger,
    formatter: &SummaryFormatter,
) -> Result<i32> {
    let mut profile = catalog.get_profile(args.profile).await?;
    let overrides = ProfileOverrides::from_env()?.merge(args.overrides());
    if !overrides.is_empty() {
        overrides.apply(&mut profile)?;
        logger
            .debug("Applied profile overrides")
            .field("profile_id", profile.id)
            .field("mode", profile.mode.as_str())
            .field("timeout_seconds", profile.timeout_seconds)
            .log()
            .await;
    }

    let tasks = Arc::new(
        TaskManager::new()
            .with_notifier(Arc::new(LogNotifier::new(logger.named("NOTIFY"))))
            .with_logger(logger.named("TASK")),
    );
    let geo = HttpGeoResolver::new(config.geo_endpoint.clone(), defaults::DEFAULT_TIMEOUT)?;

    let collab = Collaborators::new(Arc::new(HttpMeasurer::new()), catalog.clone(), catalog.clone(), tasks)
        .with_geo(Arc::new(geo))
        .with_hosts(Arc::new(DnsHostResolver::from_system_conf()));
    let pipeline = SpeedTestPipeline::new(collab, logger.clone());

    let target_ids = args.target_ids();
    let handle = pipeline
        .start_with_profile(profile, target_ids.clone(), TaskTrigger::Manual)
        .await?;

    let cancel = handle.cancellation_token();
    let interrupt_logger = logger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_logger.warn("Interrupted, cancelling run").log().await;
            cancel.cancel();
        }
    });

    let summary = handle.wait().await?;
    pipeline.drain_side_effects(SIDE_EFFECT_DRAIN_LIMIT).await;

    if args.json {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| AppError::internal(format!("Failed to serialize run summary: {}", e)))?;
        println!("{}", json);
    } else {
        let targets = catalog.document().await.select_targets(target_ids.as_deref());
        println!("{}", formatter.format_run(&summary, &targets));
    }

    if summary.failed {
        let message = summary.error.clone().unwrap_or_else(|| "run aborted".to_string());
        return Err(AppError::internal(message));
    }
    if summary.cancelled {
        return Ok(AppError::cancelled("interrupted").exit_code());
    }
    Ok(0)
}
