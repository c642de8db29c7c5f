//! `berth plan` - preview what an apply would change

use anyhow::Result;
use colored::Colorize;

use crate::cli::StackArgs;
use crate::engine::Diff;
use crate::resource::Resource;

pub fn run(args: &StackArgs) -> Result<()> {
    let path = super::absolute(&args.path)?;
    let vars = super::parse_vars(&args.vars)?;
    let mut engine = super::build_engine()?;

    let diff = engine.diff(&path, &vars, args.vars_file.as_deref())?;
    display(&diff);
    Ok(())
}

fn display(diff: &Diff) {
    if diff.new.is_empty() && diff.changed.is_empty() && diff.removed.is_empty() {
        println!();
        println!("  {} No changes, stack matches state", "✓".green());
        return;
    }

    println!();
    section("+", &diff.new, |s| s.green());
    section("~", &diff.changed, |s| s.yellow());
    section("-", &diff.removed, |s| s.red());

    println!();
    println!(
        "  {} to create, {} to replace, {} to destroy ({} unchanged)",
        diff.new.len().to_string().green(),
        diff.changed.len().to_string().yellow(),
        diff.removed.len().to_string().red(),
        diff.unchanged.len()
    );
}

fn section(
    symbol: &str,
    resources: &[Resource],
    paint: impl Fn(&str) -> colored::ColoredString,
) {
    for resource in resources {
        println!("  {} {}", paint(symbol), resource.id());
    }
}
