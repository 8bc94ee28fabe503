mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    check::CheckSubcommand, config::ConfigSubcommand, delivery::DeliverySubcommand,
    eval::EvalSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "drip",
    about = "Condition-gated drip communications: schedule, gate, and deliver per recipient",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .drip/)
    #[arg(long, global = true, env = "DRIP_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize drip in the current project
    Init,

    /// Probe an expression without recipient data
    Check {
        #[command(subcommand)]
        subcommand: CheckSubcommand,
    },

    /// Evaluate an expression against a recipient
    Eval {
        #[command(subcommand)]
        subcommand: EvalSubcommand,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Create delivery records for every recipient of a communication
    Schedule { communication: String },

    /// Process due deliveries once
    Tick,

    /// Poll for due deliveries until interrupted
    Run {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect and manage delivery records
    Delivery {
        #[command(subcommand)]
        subcommand: DeliverySubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Check { subcommand } => cmd::check::run(subcommand, cli.json),
        Commands::Eval { subcommand } => cmd::eval::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Schedule { communication } => {
            cmd::schedule::run(&root, &communication, cli.json)
        }
        Commands::Tick => cmd::tick::run(&root, cli.json),
        Commands::Run { once } => cmd::run::run(&root, once, cli.json),
        Commands::Delivery { subcommand } => cmd::delivery::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
