#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use shipyard_core::Mode;
use std::path::PathBuf;

use commands::BuildAction;

#[derive(Parser, Debug)]
#[command(name = "shipyard")]
#[command(author, version, about = "A deterministic front-end asset pipeline", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build the project once
    Build(BuildArgs),

    /// Build, then rebuild whenever a source file changes
    Watch(BuildArgs),
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Build mode: production or development
    #[arg(long, short = 'm', env = "SHIPYARD_MODE")]
    mode: Option<Mode>,

    /// Path to config file (default: shipyard.json in the project root)
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output directory, relative to the project root
    #[arg(long, short = 'o', value_name = "DIR")]
    out: Option<PathBuf>,

    /// Entry specifier (default: ./src/main.js)
    #[arg(long)]
    entry: Option<String>,

    /// Number of transform workers (0 = one per CPU)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,
}

impl BuildArgs {
    fn into_action(self, cwd: PathBuf) -> BuildAction {
        BuildAction {
            cwd,
            mode: self.mode,
            config: self.config,
            out: self.out,
            entry: self.entry,
            jobs: self.jobs,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Build(args) => commands::build::run(args.into_action(cwd), cli.json),
        Commands::Watch(args) => commands::watch::run(args.into_action(cwd), cli.json),
    }
}
