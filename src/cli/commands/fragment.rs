//! Manual fragment management.

use std::path::Path;

use console::style;

use crate::cli::helpers::{engine_for_image, open_database};
use crate::models::{Point, Polygon};
use crate::repository::images::fragment_image;

pub fn cmd_add(
    database: &Path,
    image: i64,
    text: Option<&str>,
    bounds: &[String],
) -> anyhow::Result<()> {
    let bounds = parse_bounds(bounds)?;
    let db = open_database(database)?;
    let engine = engine_for_image(&db, image)?;
    let id = engine.add_fragment(image, text, &bounds)?;
    println!(
        "{} Added fragment {} to image {}",
        style("✓").green(),
        id,
        image
    );
    Ok(())
}

pub fn cmd_rm(database: &Path, fragment: i64) -> anyhow::Result<()> {
    let db = open_database(database)?;
    let conn = db.connect()?;
    let Some(image) = fragment_image(&conn, fragment)? else {
        anyhow::bail!("no fragment with id {fragment}");
    };
    drop(conn);
    let engine = engine_for_image(&db, image)?;
    engine.remove_fragment(fragment)?;
    println!("{} Removed fragment {}", style("✓").green(), fragment);
    Ok(())
}

/// Four `x,y` pairs into a polygon.
fn parse_bounds(pairs: &[String]) -> anyhow::Result<Polygon> {
    let mut points = [Point { x: 0.0, y: 0.0 }; 4];
    if pairs.len() != 4 {
        anyhow::bail!("expected 4 corner points, got {}", pairs.len());
    }
    for (slot, pair) in points.iter_mut().zip(pairs) {
        let (x, y) = pair
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("expected x,y, got {pair:?}"))?;
        slot.x = x.trim().parse()?;
        slot.y = y.trim().parse()?;
    }
    Ok(Polygon(points))
}
