use anyhow::Result;
use berth::cli::{Cli, Command};
use berth::commands;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::io;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Map -v flags onto the log filter.
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match cli.command {
        Command::Up(args) => commands::up::run(&args),
        Command::Down => commands::down::run(),
        Command::Plan(args) => commands::plan::run(&args),
        Command::Validate(args) => commands::validate::run(&args),
        Command::Status => commands::status::run(),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "berth", &mut io::stdout());
            Ok(())
        }
    }
}
