//! Batch ingestion command.

use std::path::Path;

use anyhow::Context;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::cli::helpers::{open_database, parse_constraint};
use crate::engine::{Engine, ProgressPhase};
use crate::models::{Detection, ImageInput, Polygon};

#[derive(Deserialize)]
struct ImageEntry {
    path: String,
    /// Defaults to the file name of `path`.
    name: Option<String>,
    detections: Vec<DetectionEntry>,
}

#[derive(Deserialize)]
struct DetectionEntry {
    text: String,
    bounds: Polygon,
}

pub fn cmd_ingest(database: &Path, detections: &Path, constrain: &[String]) -> anyhow::Result<()> {
    let db = open_database(database)?;
    let raw = constrain
        .iter()
        .map(|arg| parse_constraint(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let text = std::fs::read_to_string(detections)
        .with_context(|| format!("reading {}", detections.display()))?;
    let entries: Vec<ImageEntry> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", detections.display()))?;
    let inputs = entries
        .into_iter()
        .map(|entry| {
            let name = entry.name.unwrap_or_else(|| file_name(&entry.path));
            ImageInput {
                path: entry.path,
                name,
                detections: entry
                    .detections
                    .into_iter()
                    .map(|d| Detection {
                        text: d.text,
                        bounds: d.bounds,
                    })
                    .collect(),
            }
        })
        .collect::<Vec<_>>();

    let engine = Engine::create_or_get(&db, &raw)?;
    println!(
        "{} Run {} {}",
        style("→").cyan(),
        style(format!("#{}", engine.run().id)).cyan(),
        engine.run().constraints.canonical_json()
    );

    let total = inputs.len() as u64;
    let bars = MultiProgress::new();
    let bar_style = ProgressStyle::default_bar()
        .template("{msg:10} [{bar:40.cyan/blue}] {pos}/{len}")
        .expect("valid progress template")
        .progress_chars("=> ");
    let rows = bars.add(ProgressBar::new(total).with_style(bar_style.clone()));
    rows.set_message("images");
    let fragments = bars.add(ProgressBar::new(total).with_style(bar_style));
    fragments.set_message("fragments");

    let ingested = engine.update_images(&inputs, |phase, count| {
        match phase {
            ProgressPhase::Images => rows.set_position(count as u64),
            ProgressPhase::Fragments => fragments.set_position(count as u64),
        }
        true
    })?;
    rows.finish();
    fragments.finish();

    println!(
        "{} Ingested {} image(s)",
        style("✓").green(),
        ingested.len()
    );
    Ok(())
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
