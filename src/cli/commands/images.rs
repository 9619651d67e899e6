//! Image listing and per-image operations.

use std::path::Path;

use console::style;

use crate::cli::helpers::{engine_for_image, open_database};
use crate::repository::images::{image_fragments, list_images};

pub fn cmd_images(database: &Path, run: i64) -> anyhow::Result<()> {
    let db = open_database(database)?;
    let conn = db.connect()?;
    let images = list_images(&conn, run)?;
    if images.is_empty() {
        println!("No images in run {run}");
        return Ok(());
    }
    for image in images {
        let target = match (&image.target, image.target_id) {
            (Some(table), Some(id)) => format!("{table}#{id}"),
            _ => "-".to_string(),
        };
        let flag = if image.ignored {
            style("ignored").yellow().to_string()
        } else {
            String::new()
        };
        let fragments = image_fragments(&conn, image.id)?.len();
        println!(
            "{} {:30} {:12} {:3} fragment(s) {}",
            style(format!("#{}", image.id)).cyan(),
            image.name,
            target,
            fragments,
            flag
        );
    }
    Ok(())
}

pub fn cmd_ignore(database: &Path, image: i64, ignored: bool) -> anyhow::Result<()> {
    let db = open_database(database)?;
    let engine = engine_for_image(&db, image)?;
    engine.set_ignored(image, ignored)?;
    println!(
        "{} Image {} {}",
        style("✓").green(),
        image,
        if ignored { "ignored" } else { "included" }
    );
    Ok(())
}

pub fn cmd_redispatch(database: &Path, image: i64) -> anyhow::Result<()> {
    let db = open_database(database)?;
    let engine = engine_for_image(&db, image)?;
    engine.redispatch(image)?;
    println!("{} Re-dispatched image {}", style("✓").green(), image);
    Ok(())
}
