//! `berth status` - show the resources recorded in state

use anyhow::Result;
use colored::Colorize;

use crate::resource::Status;
use crate::state::StateStore;

pub fn run() -> Result<()> {
    let store = StateStore::new(super::state_path()?);

    if !store.exists() {
        println!();
        println!("  {} No state; nothing is running", "○".dimmed());
        return Ok(());
    }

    let config = store.load();
    println!();
    println!(
        "  {:<44} {:<12} {}",
        "RESOURCE".bold(),
        "TYPE".bold(),
        "STATUS".bold()
    );

    for resource in &config.resources {
        let status = resource.status();
        let painted = match status {
            Status::Created => status.to_string().green(),
            Status::Failed => status.to_string().red(),
            Status::Disabled => status.to_string().dimmed(),
            Status::Pending | Status::Tainted => status.to_string().yellow(),
        };
        println!(
            "  {:<44} {:<12} {}",
            resource.id(),
            resource.type_tag(),
            painted
        );
    }

    Ok(())
}
