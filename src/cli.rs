//! Command-line interface definitions

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "berth")]
#[command(version)]
#[command(about = "Declarative local development stacks on your container runtime", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a stack, creating or updating its resources
    Up(StackArgs),

    /// Destroy everything recorded in state
    Down,

    /// Preview what an apply would change
    Plan(StackArgs),

    /// Check a stack for errors without touching anything
    Validate(StackArgs),

    /// Show the resources recorded in state
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct StackArgs {
    /// Stack file or directory
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Set a variable (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// TOML file of variable values
    #[arg(long, value_name = "FILE")]
    pub vars_file: Option<PathBuf>,
}
