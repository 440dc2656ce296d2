use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use watchtower::config::Config;
use watchtower::error::ConfigError;
use watchtower::Orchestrator;

/// Command-line arguments for the watchtower monitoring core
#[derive(Parser, Debug)]
#[command(
    name = "watchtower",
    about = "Operational monitoring core - correlates alerts, predicts threshold breaches and manages incidents",
    long_about = "Polls monitoring producers, keeps a bounded metric history, trains simple trend \
                  models, correlates raw alerts and promotes qualifying alerts to incidents with \
                  automated responses. Reports are written as JSON."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run the monitoring, analysis and reporting loops until interrupted
    Run,
    /// Run one full cycle, print the report and exit with its status code
    Analyze {
        /// Print the report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Inspect or close incidents
    Incidents {
        #[command(subcommand)]
        action: IncidentAction,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum IncidentAction {
    /// List open incidents with their age
    List,
    /// Close an open incident
    Close {
        /// Incident id
        id: String,
    },
}

impl Cli {
    /// Reject a config path that exists but is not a file
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }
                if config_path.extension().is_some_and(|ext| ext != "toml") {
                    warn!(
                        "Configuration file does not have .toml extension: {}",
                        config_path.display()
                    );
                }
            }
        }
        Ok(())
    }
}

/// Load configuration, falling back to defaults when the file is missing
///
/// An unreadable file is not fatal; a file that exists but fails to parse
/// or validate is.
fn load_config(config_path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file unreadable ({}), using defaults", e);
                    Ok(Config::default())
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

async fn run(orchestrator: Orchestrator) -> i32 {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        if shutdown_tx.send(true).is_err() {
            error!("Failed to send shutdown signal: loops already stopped");
        }
    }) {
        error!("Error setting interrupt handler: {}", e);
        return 1;
    }

    info!("Watchtower is running. Press Ctrl+C to stop.");
    match Arc::new(orchestrator).start(shutdown_rx).await {
        Ok(()) => {
            info!("Watchtower shutdown complete");
            0
        }
        Err(e) => {
            error!("Failed to start: {:#}", e);
            1
        }
    }
}

async fn analyze(orchestrator: Orchestrator, json: bool) -> i32 {
    let report = orchestrator.analyze_once().await;
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return 1;
            }
        }
    } else {
        println!("{}", report.summary());
    }
    report
        .exit_status(orchestrator.config().reporting.noise_threshold)
        .code()
}

async fn incidents(orchestrator: Orchestrator, action: IncidentAction) -> i32 {
    match action {
        IncidentAction::List => {
            let open = orchestrator.open_incidents().await;
            if open.is_empty() {
                println!("No open incidents");
            }
            for incident in open {
                println!(
                    "{}  {:<8}  {:>5}m  {}",
                    incident.id,
                    incident.severity.as_str(),
                    incident.age_minutes,
                    incident.description
                );
            }
            0
        }
        IncidentAction::Close { id } => match orchestrator.close_incident(&id).await {
            Ok(Some(incident)) => {
                println!("Closed incident {}", incident.id);
                0
            }
            Ok(None) => {
                eprintln!("No open incident with id {}", id);
                1
            }
            Err(e) => {
                error!("{:#}", e);
                1
            }
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to initialize watchtower: {:#}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Command::Run => run(orchestrator).await,
        Command::Analyze { json } => analyze(orchestrator, json).await,
        Command::Incidents { action } => incidents(orchestrator, action).await,
    };
    std::process::exit(code);
}
