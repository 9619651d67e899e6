//! Image and fragment rows.
//!
//! Fragments are append-only from the store's point of view: they are
//! inserted during ingestion or by hand, and removed explicitly, never
//! updated in place.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_datetime, Result, StoreError};
use crate::models::{Fragment, ImageRecord, Polygon};

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    let created_at: String = row.get(7)?;
    Ok(ImageRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        path: row.get(2)?,
        name: row.get(3)?,
        target: row.get(4)?,
        target_id: row.get(5)?,
        ignored: row.get(6)?,
        created_at: parse_datetime(&created_at),
    })
}

const IMAGE_COLUMNS: &str = "id, run_id, path, name, target, target_id, ignored, created_at";

pub fn find_image(conn: &Connection, run_id: i64, name: &str) -> Result<Option<ImageRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {IMAGE_COLUMNS} FROM qrc_image WHERE run_id = ? AND name = ?"),
            params![run_id, name],
            image_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn get_image(conn: &Connection, image_id: i64) -> Result<Option<ImageRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {IMAGE_COLUMNS} FROM qrc_image WHERE id = ?"),
            params![image_id],
            image_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn insert_image(conn: &Connection, run_id: i64, path: &str, name: &str) -> Result<ImageRecord> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO qrc_image (run_id, path, name, created_at) VALUES (?, ?, ?, ?)",
        params![run_id, path, name, created_at.to_rfc3339()],
    )?;
    Ok(ImageRecord {
        id: conn.last_insert_rowid(),
        run_id,
        path: path.to_string(),
        name: name.to_string(),
        target: None,
        target_id: None,
        ignored: false,
        created_at,
    })
}

/// All images of one run, in insertion order.
pub fn list_images(conn: &Connection, run_id: i64) -> Result<Vec<ImageRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {IMAGE_COLUMNS} FROM qrc_image WHERE run_id = ? ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(params![run_id], image_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_image_target(
    conn: &Connection,
    image_id: i64,
    target: Option<(&str, i64)>,
) -> Result<()> {
    let (table, id) = match target {
        Some((table, id)) => (Some(table), Some(id)),
        None => (None, None),
    };
    conn.execute(
        "UPDATE qrc_image SET target = ?, target_id = ? WHERE id = ?",
        params![table, id, image_id],
    )?;
    Ok(())
}

pub fn set_image_ignored(conn: &Connection, image_id: i64, ignored: bool) -> Result<()> {
    conn.execute(
        "UPDATE qrc_image SET ignored = ? WHERE id = ?",
        params![ignored, image_id],
    )?;
    Ok(())
}

/// Ids of non-ignored images in `run_id` currently resolved to the given
/// target row. The scan stays within the run on purpose; other runs'
/// images never participate in a resync.
pub fn images_pointing_at(
    conn: &Connection,
    run_id: i64,
    target: &str,
    target_id: i64,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM qrc_image
         WHERE run_id = ? AND target = ? AND target_id = ? AND ignored = 0
         ORDER BY id",
    )?;
    let ids = stmt
        .query_map(params![run_id, target, target_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn insert_fragment(
    conn: &Connection,
    image_id: i64,
    data: Option<&str>,
    bounds: &Polygon,
) -> Result<i64> {
    let bounds_json =
        serde_json::to_string(bounds).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    conn.execute(
        "INSERT INTO qrc_fragment (image_id, data, bounds) VALUES (?, ?, ?)",
        params![image_id, data, bounds_json],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The image a fragment belongs to.
pub fn fragment_image(conn: &Connection, fragment_id: i64) -> Result<Option<i64>> {
    let image_id = conn
        .query_row(
            "SELECT image_id FROM qrc_fragment WHERE id = ?",
            params![fragment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(image_id)
}

/// Remove one fragment; `Ok(false)` when no such fragment exists.
pub fn remove_fragment(conn: &Connection, fragment_id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM qrc_fragment WHERE id = ?", params![fragment_id])?;
    Ok(changed > 0)
}

pub fn image_fragments(conn: &Connection, image_id: i64) -> Result<Vec<Fragment>> {
    let mut stmt = conn.prepare(
        "SELECT id, image_id, data, bounds FROM qrc_fragment WHERE image_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![image_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, image_id, data, bounds_json)| {
            let bounds: Polygon = serde_json::from_str(&bounds_json).map_err(|_| {
                StoreError::Corrupt(format!("fragment {id} holds unreadable bounds"))
            })?;
            Ok(Fragment {
                id,
                image_id,
                data,
                bounds,
            })
        })
        .collect()
}

/// Decoded texts of an image's fragments, in fragment order, skipping
/// fragments that were never read.
pub fn fragment_texts(conn: &Connection, image_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT data FROM qrc_fragment
         WHERE image_id = ? AND data IS NOT NULL
         ORDER BY id",
    )?;
    let texts = stmt
        .query_map(params![image_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(texts)
}
