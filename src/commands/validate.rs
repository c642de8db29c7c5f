//! `berth validate` - parse a stack and report errors

use anyhow::Result;
use colored::Colorize;

use crate::cli::StackArgs;

pub fn run(args: &StackArgs) -> Result<()> {
    let path = super::absolute(&args.path)?;
    let vars = super::parse_vars(&args.vars)?;
    let mut engine = super::build_engine()?;

    match engine.parse_config_with_variables(&path, &vars, args.vars_file.as_deref()) {
        Ok(config) => {
            println!();
            println!(
                "  {} Stack is valid ({} resources)",
                "✓".green(),
                config.resource_count()
            );
            Ok(())
        }
        Err(err) => {
            println!();
            println!("  {} Stack has errors", "✗".red());
            Err(err)
        }
    }
}
