use clap::{Parser, Subcommand};
use lbprobe::orchestrator::{self, Orchestrator};
use lbprobe::worker;
use lbprobe_common::config::{Config, ParallelismMethod};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Run API test cases against a load-balancer management API
#[derive(Parser, Debug)]
#[command(name = "lbprobe", version, about)]
struct Cli {
    /// Path to the YAML run configuration
    #[arg(short, long, default_value = "test_config.yaml")]
    config: PathBuf,

    /// Override parallelism.method (sequential, threading, multiprocessing, cooperative)
    #[arg(short, long, value_name = "METHOD")]
    parallel: Option<ParallelismMethod>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve jobs from a process-pool supervisor over stdin/stdout
    #[command(hide = true)]
    Worker {
        #[arg(long, hide = true, value_name = "TEST_ID")]
        fault_on: Option<String>,
    },
}

fn main() -> ExitCode {
    // stdout is reserved for the summary and the worker result channel
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Command::Worker { fault_on }) = &cli.command {
        return match worker::serve(fault_on.as_deref()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Worker failed");
                ExitCode::from(2)
            }
        };
    }

    ExitCode::from(run(&cli))
}

fn run(cli: &Cli) -> u8 {
    info!(config = %cli.config.display(), "lbprobe starting");

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return 2;
        }
    };

    let mut orchestrator = Orchestrator::new(config);
    if let Some(method) = cli.parallel {
        orchestrator = orchestrator.with_method(method);
    }

    let outcome = orchestrator.run();
    if let Ok(report) = &outcome {
        println!("{}", orchestrator::render_summary(report));
    }

    let code = orchestrator::exit_code(&outcome);
    info!(exit_code = code, "lbprobe finished");
    code
}
