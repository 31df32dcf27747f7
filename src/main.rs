/*!
 * Conveyor CLI
 */

use clap::{Parser, Subcommand, ValueEnum};
use conveyor::error::{EXIT_PARTIAL, EXIT_SUCCESS};
use conveyor::jobparams::{registry, PluginRegistry};
use conveyor::requests::{self, CatalogManifest};
use conveyor::{logging, CancelToken, ConveyorConfig, Daemon, LogLevel, PassReport, Result, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(version, about = "Transfer scheduling: claim requests, build paths, emit job parameters", long_about = None)]
struct Cli {
    /// Log level (overrides the config file)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a TOML catalog manifest into a catalog
    Seed {
        /// Catalog database path (`:memory:` for an in-memory catalog)
        #[arg(long)]
        db: String,

        /// Manifest describing endpoints, distances, replicas and requests
        manifest: PathBuf,
    },

    /// Run scheduling passes and print each report as JSON
    Schedule {
        #[arg(long)]
        db: String,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Endpoint to schedule for (repeatable; overrides the config file)
        #[arg(long = "rse")]
        rses: Vec<String>,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,

        /// Seconds between passes (overrides the config file)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show request counts per state
    Stats {
        #[arg(long)]
        db: String,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.command {
        Commands::Schedule {
            config: Some(path), ..
        } => ConveyorConfig::from_file(path)?,
        _ => ConveyorConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    config.verbose = config.verbose || cli.verbose;
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let plugins = registry::install(PluginRegistry::with_builtins())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(handle_command(cli.command, config, plugins))
}

async fn handle_command(
    command: Commands,
    mut config: ConveyorConfig,
    plugins: Arc<PluginRegistry>,
) -> Result<i32> {
    match command {
        Commands::Seed { db, manifest } => {
            let manifest = CatalogManifest::from_file(&manifest)?;
            let catalog = requests::open(&db).await?;
            let ids = requests::seed(catalog.as_ref(), &manifest).await?;
            println!(
                "Seeded {} RSE(s), {} distance(s), {} replica(s), {} request(s)",
                manifest.rses.len(),
                manifest.distances.len(),
                manifest.replicas.len(),
                ids.len()
            );
            Ok(EXIT_SUCCESS)
        }

        Commands::Stats { db } => {
            let catalog = requests::open(&db).await?;
            let stats = catalog.request_store().stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(EXIT_SUCCESS)
        }

        Commands::Schedule {
            db,
            rses,
            once,
            interval,
            ..
        } => {
            if !rses.is_empty() {
                config.scheduler.rses = rses.into_iter().map(Into::into).collect();
            }
            if let Some(interval) = interval {
                config.scheduler.interval_secs = interval;
            }

            let catalog = requests::open(&db).await?;
            let scheduler = Scheduler::from_config(catalog, &config, &plugins)?;

            if once {
                let report = scheduler.run_pass(&CancelToken::new()).await?;
                print_report(&report);
                return Ok(if report.stats.unscheduled() > 0 {
                    EXIT_PARTIAL
                } else {
                    EXIT_SUCCESS
                });
            }

            let daemon = Daemon::new(scheduler, Duration::from_secs(config.scheduler.interval_secs))
                .with_report_sink(Arc::new(print_report));
            let shutdown = daemon.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
            });

            daemon.run().await?;
            Ok(EXIT_SUCCESS)
        }
    }
}

fn print_report(report: &PassReport) {
    match serde_json::to_string(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Warning: Failed to serialize pass report: {}", e),
    }
}
