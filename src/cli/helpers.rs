//! Shared helper functions for CLI commands.

use std::path::Path;

use anyhow::Context;

use crate::engine::Engine;
use crate::repository::{runs, Database};

/// Open an existing database, with a friendlier message than the raw
/// store error when it does not exist.
pub fn open_database(path: &Path) -> anyhow::Result<Database> {
    if !path.exists() {
        anyhow::bail!(
            "no database at {} (run `qrchoice init` first)",
            path.display()
        );
    }
    Database::open(path).with_context(|| format!("opening {}", path.display()))
}

/// Parse one `Table:field=value:field=value` run-constraint argument.
/// Fields may be empty (`Table` alone constrains nothing but still makes
/// the table a match candidate, in argument order).
pub fn parse_constraint(arg: &str) -> anyhow::Result<(String, Vec<(String, String)>)> {
    let mut parts = arg.split(':').map(str::trim);
    let table = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow::anyhow!("empty constraint argument"))?;
    let mut fields = Vec::new();
    for part in parts {
        let (field, value) = part
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected field=value, got {part:?} in {arg:?}"))?;
        fields.push((field.trim().to_string(), value.trim().to_string()));
    }
    Ok((table.to_string(), fields))
}

/// Bind an engine to the run an image belongs to.
pub fn engine_for_image<'a>(db: &'a Database, image_id: i64) -> anyhow::Result<Engine<'a>> {
    let conn = db.connect()?;
    let image = crate::repository::images::get_image(&conn, image_id)?
        .ok_or_else(|| anyhow::anyhow!("no image with id {image_id}"))?;
    let run = runs::get_run(&conn, image.run_id)?
        .ok_or_else(|| anyhow::anyhow!("image {image_id} references missing run"))?;
    Ok(Engine::new(db, run))
}
