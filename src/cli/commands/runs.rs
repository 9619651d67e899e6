//! Run listing command.

use std::path::Path;

use console::style;

use crate::cli::helpers::open_database;
use crate::repository::runs::list_runs;

pub fn cmd_runs(database: &Path) -> anyhow::Result<()> {
    let db = open_database(database)?;
    let conn = db.connect()?;
    let runs = list_runs(&conn)?;
    if runs.is_empty() {
        println!("No runs yet");
        return Ok(());
    }
    for run in runs {
        println!(
            "{} {} {}",
            style(format!("#{}", run.id)).cyan(),
            run.created_at.format("%Y-%m-%d %H:%M"),
            run.constraints.canonical_json()
        );
    }
    Ok(())
}
