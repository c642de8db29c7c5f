//! `berth down` - destroy the stack recorded in state

use anyhow::Result;
use colored::Colorize;

pub fn run() -> Result<()> {
    let mut engine = super::build_engine()?;

    match engine.destroy() {
        Ok(()) => {
            println!();
            println!("  {} Stack destroyed", "✓".green().bold());
            Ok(())
        }
        Err(err) => {
            println!();
            println!(
                "  {} Destroy failed; state was kept so you can retry",
                "✗".red().bold()
            );
            Err(err)
        }
    }
}
