//! `berth up` - apply a stack

use anyhow::Result;
use colored::Colorize;

use crate::cli::StackArgs;
use crate::resource::Status;

pub fn run(args: &StackArgs) -> Result<()> {
    let path = super::absolute(&args.path)?;
    let vars = super::parse_vars(&args.vars)?;
    let mut engine = super::build_engine()?;

    let result = engine
        .apply_with_variables(&path, &vars, args.vars_file.as_deref())
        .map(|_| ());

    // State is persisted either way; show what we ended up with.
    print_outcome(engine.config());

    match result {
        Ok(_) => {
            println!();
            println!("  {} Stack is up", "✓".green().bold());
            Ok(())
        }
        Err(err) => {
            println!();
            println!("  {} Stack applied with errors", "⚠".yellow().bold());
            Err(err)
        }
    }
}

fn print_outcome(config: &crate::config::Config) {
    println!();
    for resource in &config.resources {
        let status = resource.status();
        let symbol = match status {
            Status::Created => "✓".green(),
            Status::Failed => "✗".red(),
            Status::Disabled => "⊘".dimmed(),
            Status::Pending | Status::Tainted => "…".yellow(),
        };
        println!(
            "  {} {:<40} {}",
            symbol,
            resource.id(),
            status.to_string().dimmed()
        );
    }
}
