//! Initialize command.

use std::path::Path;

use anyhow::Context;
use console::style;

use crate::config::Config;
use crate::repository::Database;

/// Compile a schema DSL file and create the database.
pub fn cmd_init(database: &Path, config_path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config = Config::parse(&text)
        .with_context(|| format!("compiling {}", config_path.display()))?;

    let table_count = config.schema.tables().count();
    let choice_count = config.choices().len();
    Database::create(database, config)?;

    println!(
        "{} Initialized {} ({} tables, {} choice templates)",
        style("✓").green(),
        database.display(),
        table_count,
        choice_count
    );
    Ok(())
}
