//! kitenv CLI - bake compiler toolkit environments into CMake presets

use anyhow::Result;
use clap::Parser;
use kitenv::util::diagnostic::from_error;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprint!("{}", from_error(e.as_ref()));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.global.verbose {
        EnvFilter::new("kitenv=debug")
    } else {
        EnvFilter::new("kitenv=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::List(args) => commands::list::execute(args),
        Commands::Scan(args) => commands::scan::execute(args, &cli.global),
        Commands::Generate(args) => commands::generate::execute(args, &cli.global),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
