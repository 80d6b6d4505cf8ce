//! Tree Signal daemon
//!
//! Reads JSON-lines commands on stdin and writes a JSON layout line to stdout
//! whenever the channel tree changes. Logs go to stderr.

mod ingest;
mod sink;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tree_signal_core::prelude::*;
use tree_signal_core::simulator::{run_simulator, SimulatorConfig};
use tree_signal_palette::{AssignmentMode, ColorService};

fn cli() -> Command {
    Command::new("tree-signal")
        .version(tree_signal_core::VERSION)
        .about("Hierarchical channel dashboard engine")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (overrides TREE_SIGNAL_CONFIG and ./config.toml)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("run").about("Ingest commands from stdin and stream layouts to stdout"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the randomized invariant simulator")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config_path = matches.get_one::<PathBuf>("config").cloned();

    let outcome = match matches.subcommand() {
        Some(("run", _)) => run(config_path).await,
        Some(("simulate", args)) => simulate(args, config_path),
        Some(("config", _)) => print_config(config_path),
        _ => Ok(ExitCode::SUCCESS),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = ?err, "tree-signal failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let config = TreeSignalConfig::load(config_path.as_deref()).context("loading configuration")?;
    let mode: AssignmentMode = config.colors.assignment_mode.parse()?;
    let colors = Arc::new(ColorService::new(mode));
    let service = Arc::new(TreeSignal::new(&config, Arc::new(SystemClock))?);

    tracing::info!(
        version = tree_signal_core::VERSION,
        hold = config.decay.hold_seconds,
        decay = config.decay.decay_seconds,
        colors = %mode,
        "tree-signal started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let decay = service.spawn_decay_task(config.cleanup.interval(), shutdown_rx.clone());

    let updates = service.subscribe();
    let broadcaster = tokio::spawn(async move {
        let mut sink = sink::JsonLinesSink::new(tokio::io::stdout(), colors);
        sink::broadcast(updates, &mut sink, shutdown_rx).await
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => ingest::handle_line(&service, &line),
                Ok(None) => {
                    tracing::info!("input closed");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to read input");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                tracing::info!("interrupt received");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let ticks = decay.await.context("decay task panicked")?;
    let published = broadcaster.await.context("broadcaster panicked")??;
    tracing::info!(ticks, published, channels = service.len(), "tree-signal stopped");
    Ok(ExitCode::SUCCESS)
}

fn simulate(args: &ArgMatches, config_path: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let service = TreeSignalConfig::load(config_path.as_deref()).context("loading configuration")?;
    let config = SimulatorConfig {
        service,
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        ..SimulatorConfig::default()
    }
    .with_seed(args.get_one::<u64>("seed").copied().unwrap_or(42))
    .with_operations(args.get_one::<u64>("operations").copied().unwrap_or(1_000));

    let report = run_simulator(config)?;
    println!("{}", report.generate_text());

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_config(config_path: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let config = TreeSignalConfig::load(config_path.as_deref()).context("loading configuration")?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}
