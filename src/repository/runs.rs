//! Detection runs: validated, canonicalized and deduplicated.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::{parse_datetime, Result, StoreError};
use crate::config::Config;
use crate::models::{DetectionRun, RunConstraints, Value};

/// Get the run identified by these constraints, creating it first if it
/// does not exist yet.
///
/// Raw values are validated against the schema and converted to their
/// declared scalar types before canonicalization, so `"7"` and `7` for an
/// int field name the same run. Within each table the field pairs are
/// sorted by name; the table order itself is preserved.
pub fn create_or_get_run(
    conn: &Connection,
    config: &Config,
    raw: &[(String, Vec<(String, String)>)],
) -> Result<DetectionRun> {
    let mut tables = Vec::with_capacity(raw.len());
    for (table_name, fields) in raw {
        let table = config
            .schema
            .table(table_name)
            .ok_or_else(|| StoreError::UnknownRunTable(table_name.clone()))?;
        let mut pairs = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            let ty = table
                .field_scalar(field)
                .ok_or_else(|| StoreError::UnknownRunField {
                    table: table_name.clone(),
                    field: field.clone(),
                })?;
            let converted =
                Value::convert(value, ty).ok_or_else(|| StoreError::InvalidRunValue {
                    table: table_name.clone(),
                    field: field.clone(),
                    value: value.clone(),
                    ty: ty.name(),
                })?;
            pairs.push((field.clone(), converted));
        }
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        tables.push((table_name.clone(), pairs));
    }
    let constraints = RunConstraints(tables);
    let key = constraints.canonical_json();

    let mut stmt =
        conn.prepare("SELECT id, created_at FROM qrc_run WHERE constraint_data = ? LIMIT 2")?;
    let existing = stmt
        .query_map(params![key], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match existing.as_slice() {
        [] => {}
        [(id, created_at)] => {
            debug!(id, "reusing existing run");
            return Ok(DetectionRun {
                id: *id,
                constraints,
                created_at: parse_datetime(created_at),
            });
        }
        _ => {
            return Err(StoreError::ConsistencyFault(format!(
                "{} runs share constraint data {key}",
                existing.len()
            )))
        }
    }

    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO qrc_run (constraint_data, created_at) VALUES (?, ?)",
        params![key, created_at.to_rfc3339()],
    )?;
    let id = conn.last_insert_rowid();
    info!(id, constraints = %key, "created detection run");
    Ok(DetectionRun {
        id,
        constraints,
        created_at,
    })
}

pub fn get_run(conn: &Connection, id: i64) -> Result<Option<DetectionRun>> {
    use rusqlite::OptionalExtension;
    let row = conn
        .query_row(
            "SELECT constraint_data, created_at FROM qrc_run WHERE id = ?",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    let Some((key, created_at)) = row else {
        return Ok(None);
    };
    let constraints = RunConstraints::from_canonical_json(&key).ok_or_else(|| {
        StoreError::Corrupt(format!("run {id} holds unreadable constraint data"))
    })?;
    Ok(Some(DetectionRun {
        id,
        constraints,
        created_at: parse_datetime(&created_at),
    }))
}

/// All runs, oldest first.
pub fn list_runs(conn: &Connection) -> Result<Vec<DetectionRun>> {
    let mut stmt =
        conn.prepare("SELECT id, constraint_data, created_at FROM qrc_run ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, key, created_at)| {
            let constraints = RunConstraints::from_canonical_json(&key).ok_or_else(|| {
                StoreError::Corrupt(format!("run {id} holds unreadable constraint data"))
            })?;
            Ok(DetectionRun {
                id,
                constraints,
                created_at: parse_datetime(&created_at),
            })
        })
        .collect()
}
